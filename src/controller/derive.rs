//! Discovery record derivation and diffing
//!
//! Pure functions: no registry or Kubernetes access happens here.

use crate::model::{DiscoveryRecord, EndpointSet, ServiceDescriptor};

/// Protocol (lower-cased) whose ports are tagged in the registry
const TAGGED_PROTOCOL: &str = "udp";

/// Registry name for a service: `name.namespace`
pub fn derived_name(name: &str, namespace: &str) -> String {
    format!("{name}.{namespace}")
}

/// Compute the records that should exist in the registry for a service
///
/// One record per subset address. The record's port is the LAST port of its
/// subset (0 when the subset has none). Each UDP port of the subset appends
/// `["udp", <port name>]` to the tags; other protocols add nothing.
/// Records whose `(node, address, port)` was already emitted are dropped.
pub fn derive_records(
    service: &ServiceDescriptor,
    endpoints: &EndpointSet,
) -> Vec<DiscoveryRecord> {
    let name = service.derived_name();
    let mut records: Vec<DiscoveryRecord> = Vec::new();

    for subset in &endpoints.subsets {
        let mut port = 0;
        let mut tags = Vec::new();
        for p in &subset.ports {
            port = p.port;
            let protocol = p.protocol.to_lowercase();
            if protocol == TAGGED_PROTOCOL {
                tags.push(protocol);
                tags.push(p.name.clone());
            }
        }

        for addr in &subset.addresses {
            let record = DiscoveryRecord::new(&name, &addr.node, &addr.ip, port, tags.clone());
            if !contains_endpoint(&records, &record) {
                records.push(record);
            }
        }
    }

    records
}

/// True when `records` has an entry with the same `(node, address, port)`
pub fn contains_endpoint(records: &[DiscoveryRecord], record: &DiscoveryRecord) -> bool {
    records.iter().any(|r| r.same_endpoint(record))
}

/// Existing records with no counterpart in `desired`
///
/// Linear scan per record; fine for per-service endpoint counts.
pub fn stale_records<'a>(
    existing: &'a [DiscoveryRecord],
    desired: &[DiscoveryRecord],
) -> Vec<&'a DiscoveryRecord> {
    existing
        .iter()
        .filter(|record| !contains_endpoint(desired, record))
        .collect()
}
