//! Resource aggregation layer
//!
//! Turns paged, multi-version Cloud Controller records into immutable
//! domain entities.
//!
//! # Architecture
//!
//! - [`fetcher`] - Drains paged queries and derives entities, with optional
//!   per-record auxiliary fetches
//! - [`adapter`] - Record adapters implementing [`Derivable`]
//! - [`model`] - Domain entities
//! - [`cache`] - Insert-if-absent entity cache for reference data
//! - [`routes`] - Route URI resolution against known domains
//! - [`operations`] - The caller-facing [`CloudControllerClient`]
//!
//! # Example
//!
//! ```ignore
//! use cfkit::resource::CloudControllerClient;
//! use std::sync::Arc;
//!
//! async fn list_apps(cf: cfkit::cf::client::CfClient) -> cfkit::error::CfResult<()> {
//!     let client = CloudControllerClient::new(Arc::new(cf));
//!     for app in client.get_applications().await? {
//!         println!("{} {:?}", app.name, app.state);
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod cache;
pub mod fetcher;
pub mod model;
pub mod operations;
pub mod routes;

pub use adapter::Derivable;
pub use cache::EntityCache;
pub use fetcher::{
    drain, drain_all, fetch_all, fetch_all_with_auxiliary, fetch_one, fetch_one_with_auxiliary,
};
pub use operations::{CloudControllerClient, TaskRequest, UserProvidedServiceRequest};
pub use routes::{resolve, RouteDescriptor};
