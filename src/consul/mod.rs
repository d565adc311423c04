//! Consul catalog integration
//!
//! [`RegistryClient`] is the seam between the reconciliation engine and the
//! registry. [`ConsulCatalog`] implements it over Consul's HTTP catalog API.

mod client;
mod config;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::model::DiscoveryRecord;
use crate::Error;

pub use client::ConsulCatalog;
pub use config::{BasicAuth, ConsulConfig, DEFAULT_CONSUL_ADDRESS};

/// Trait abstracting registry operations
///
/// Every call is independent and immediately visible; there is no batching
/// or transaction across calls.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Upsert a record. Registering an existing record changes nothing.
    async fn register(&self, record: &DiscoveryRecord) -> Result<(), Error>;

    /// Remove a record, identified by its node, address and service ID
    async fn deregister(&self, record: &DiscoveryRecord) -> Result<(), Error>;

    /// List records registered under `name`, optionally filtered by `tag`
    /// (empty string = no filter)
    async fn query(&self, name: &str, tag: &str) -> Result<Vec<DiscoveryRecord>, Error>;
}
