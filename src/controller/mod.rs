//! Reconciliation of headless services into the registry
//!
//! [`derive`](derive_records) and the diff helpers are pure; [`ReconcileEngine`]
//! applies their results through a [`RegistryClient`](crate::consul::RegistryClient).

mod derive;
mod engine;

pub use derive::{contains_endpoint, derive_records, derived_name, stale_records};
pub use engine::{ApplyOutcome, ReconcileEngine};
