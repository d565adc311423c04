//! kube2consul - registers Kubernetes headless services into Consul
//!
//! Headless services have no cluster address, so their consumers resolve the
//! individual backing endpoints instead. kube2consul watches Services and
//! Endpoints in every namespace and keeps one Consul catalog entry per ready
//! endpoint address, named `<service>.<namespace>`.
//!
//! # Architecture
//!
//! - Two watch sources (Services, Endpoints) feed per-kind event queues
//! - The reconcile engine consumes each queue sequentially, correlating the
//!   two kinds through in-memory indexes
//! - Every apply registers the derived records, then deregisters registry
//!   entries that are no longer derived
//!
//! # Modules
//!
//! - [`model`] - Snapshots of Kubernetes objects and registry records
//! - [`index`] - In-memory last-known state per resource kind
//! - [`watch`] - Kubernetes watch sources producing resource events
//! - [`controller`] - Record derivation, diffing and the reconcile engine
//! - [`consul`] - Registry client trait and the Consul catalog implementation
//! - [`startup`] - Bootstrap gate on API server reachability
//! - [`config`] - Command-line flags and Kubernetes client construction
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod consul;
pub mod controller;
pub mod error;
pub mod index;
pub mod model;
pub mod startup;
pub mod watch;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-known Kubernetes objects
// =============================================================================

/// Service polled by the bootstrap gate
pub const KUBERNETES_SERVICE_NAME: &str = "kubernetes";

/// Namespace of [`KUBERNETES_SERVICE_NAME`]
pub const KUBERNETES_SERVICE_NAMESPACE: &str = "default";
