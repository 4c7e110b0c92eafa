//! cfkit - Cloud Foundry client-side aggregation layer
//!
//! Turns the Cloud Controller's paged, multi-version REST resources into
//! immutable domain entities, behind an OAuth2 token manager.
//!
//! # Module Structure
//!
//! - [`cf`] - Transport: HTTP client, UAA token manager, provider interface
//! - [`resource`] - Aggregation: pagination drain, adapters, entity cache,
//!   route resolution and the caller-facing client
//! - [`config`] - Persistent user configuration
//! - [`error`] - Typed errors shared by every layer

pub mod cf;
pub mod config;
pub mod error;
pub mod resource;

/// Version injected at compile time via CFKIT_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CFKIT_VERSION") {
    Some(v) => v,
    None => "dev",
};
