//! Cloud Controller API interaction module
//!
//! This module provides the transport side of the client: UAA
//! authentication, the HTTP wrapper, and the paged provider interface the
//! resource layer drains.
//!
//! # Module Structure
//!
//! - [`auth`] - OAuth2 token manager and grant strategies
//! - [`client`] - Cloud Controller client implementing [`provider::ResourceProvider`]
//! - [`http`] - HTTP utilities for REST API calls
//! - [`provider`] - Raw records, pages and the provider trait
//!
//! # Example
//!
//! ```ignore
//! use cfkit::cf::auth::Credentials;
//! use cfkit::cf::client::{CfClient, LoginOptions};
//!
//! async fn example() -> cfkit::error::CfResult<()> {
//!     let credentials = Credentials::password("admin", "secret");
//!     let client = CfClient::login("https://api.example.com", credentials, &LoginOptions::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod provider;
