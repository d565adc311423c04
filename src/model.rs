//! Snapshot types mirrored from the Kubernetes API and the registry record type
//!
//! Watched objects are converted into these plain snapshots at the edge so
//! the reconciliation logic never touches `k8s_openapi` types directly.

use std::fmt;

use k8s_openapi::api::core::v1 as corev1;
use kube::Resource;
use tracing::warn;

use crate::controller::derived_name;
use crate::Error;

/// `spec.clusterIP` value Kubernetes uses to mark a service as headless
const CLUSTER_IP_NONE: &str = "None";

/// Identity of a namespaced object, shared by a Service and its Endpoints
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectKey {
    /// Create a key from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Snapshots that can be stored in a [`LocalIndex`](crate::index::LocalIndex)
pub trait Keyed {
    /// The identity key of this snapshot
    fn key(&self) -> ObjectKey;
}

/// The parts of a Kubernetes Service the engine cares about
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Namespace of the service
    pub namespace: String,
    /// Name of the service
    pub name: String,
    /// Whether the service has a cluster IP (i.e. is NOT headless)
    pub has_assigned_address: bool,
}

impl ServiceDescriptor {
    /// Create a descriptor
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        has_assigned_address: bool,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            has_assigned_address,
        }
    }

    /// Create a descriptor for a headless service
    pub fn headless(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(namespace, name, false)
    }

    /// True when consumers must resolve individual endpoints
    pub fn is_headless(&self) -> bool {
        !self.has_assigned_address
    }

    /// Registry name for this service: `name.namespace`
    pub fn derived_name(&self) -> String {
        derived_name(&self.name, &self.namespace)
    }
}

impl Keyed for ServiceDescriptor {
    fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

impl TryFrom<&corev1::Service> for ServiceDescriptor {
    type Error = Error;

    fn try_from(svc: &corev1::Service) -> Result<Self, Self::Error> {
        let (namespace, name) = namespaced_name(svc, "Service")?;
        let has_assigned_address = svc
            .spec
            .as_ref()
            .and_then(|spec| spec.cluster_ip.as_deref())
            .map(|ip| !ip.is_empty() && ip != CLUSTER_IP_NONE)
            .unwrap_or(false);

        Ok(Self {
            namespace,
            name,
            has_assigned_address,
        })
    }
}

/// A single backing address of an endpoint subset
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointAddress {
    /// IP address of the endpoint
    pub ip: String,
    /// Name of the backing object (pod name, else node name)
    pub node: String,
}

impl EndpointAddress {
    /// Create an address
    pub fn new(ip: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            node: node.into(),
        }
    }
}

/// A port exposed by an endpoint subset
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointPort {
    /// Port number
    pub port: u16,
    /// Port name, empty when unnamed
    pub name: String,
    /// Protocol as reported by the API (`TCP`, `UDP`, `SCTP`), empty when unset
    pub protocol: String,
}

impl EndpointPort {
    /// Create a port
    pub fn new(port: u16, name: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            port,
            name: name.into(),
            protocol: protocol.into(),
        }
    }
}

/// Addresses sharing the same set of ports
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointSubset {
    /// Ready addresses, in API order
    pub addresses: Vec<EndpointAddress>,
    /// Exposed ports, in API order
    pub ports: Vec<EndpointPort>,
}

/// The endpoints backing one service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointSet {
    /// Namespace of the endpoints object
    pub namespace: String,
    /// Name of the endpoints object (same as the service)
    pub name: String,
    /// Subsets, in API order
    pub subsets: Vec<EndpointSubset>,
}

impl EndpointSet {
    /// Create an endpoint set
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        subsets: Vec<EndpointSubset>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            subsets,
        }
    }
}

impl Keyed for EndpointSet {
    fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

impl TryFrom<&corev1::Endpoints> for EndpointSet {
    type Error = Error;

    fn try_from(eps: &corev1::Endpoints) -> Result<Self, Self::Error> {
        let (namespace, name) = namespaced_name(eps, "Endpoints")?;
        let key = ObjectKey::new(&namespace, &name);

        let subsets = eps
            .subsets
            .iter()
            .flatten()
            .map(|subset| EndpointSubset {
                addresses: subset
                    .addresses
                    .iter()
                    .flatten()
                    .filter_map(|addr| convert_address(&key, addr))
                    .collect(),
                ports: subset
                    .ports
                    .iter()
                    .flatten()
                    .filter_map(|port| convert_port(&key, port))
                    .collect(),
            })
            .collect();

        Ok(Self {
            namespace,
            name,
            subsets,
        })
    }
}

fn namespaced_name<K: Resource>(obj: &K, kind: &str) -> Result<(String, String), Error> {
    let meta = obj.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| Error::invalid_object(format!("{kind} has no metadata.name")))?;
    let namespace = meta.namespace.clone().ok_or_else(|| {
        Error::invalid_object(format!("{kind} {name} has no metadata.namespace"))
    })?;
    Ok((namespace, name))
}

fn convert_address(key: &ObjectKey, addr: &corev1::EndpointAddress) -> Option<EndpointAddress> {
    let node = addr
        .target_ref
        .as_ref()
        .and_then(|r| r.name.clone())
        .or_else(|| addr.node_name.clone())
        .or_else(|| addr.hostname.clone());

    match node {
        Some(node) => Some(EndpointAddress::new(&addr.ip, node)),
        None => {
            warn!(
                endpoints = %key,
                ip = %addr.ip,
                "Endpoint address has no backing object, skipping"
            );
            None
        }
    }
}

fn convert_port(key: &ObjectKey, port: &corev1::EndpointPort) -> Option<EndpointPort> {
    match u16::try_from(port.port) {
        Ok(number) if number != 0 => Some(EndpointPort::new(
            number,
            port.name.clone().unwrap_or_default(),
            port.protocol.clone().unwrap_or_default(),
        )),
        _ => {
            warn!(endpoints = %key, port = port.port, "Endpoint port out of range, skipping");
            None
        }
    }
}

/// One resolvable endpoint in the registry
///
/// Identity within a derived name is `(node, address, port)`; `id` is only
/// unique per node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryRecord {
    /// Registry service ID: `node:address`
    pub id: String,
    /// Derived service name: `service.namespace`
    pub name: String,
    /// Backing node name
    pub node: String,
    /// Endpoint IP address
    pub address: String,
    /// Endpoint port
    pub port: u16,
    /// Registry tags
    pub tags: Vec<String>,
}

impl DiscoveryRecord {
    /// Create a record, computing its ID from node and address
    pub fn new(
        name: impl Into<String>,
        node: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        tags: Vec<String>,
    ) -> Self {
        let node = node.into();
        let address = address.into();
        Self {
            id: format!("{node}:{address}"),
            name: name.into(),
            node,
            address,
            port,
            tags,
        }
    }

    /// True when both records describe the same `(node, address, port)`
    pub fn same_endpoint(&self, other: &DiscoveryRecord) -> bool {
        self.node == other.node && self.address == other.address && self.port == other.port
    }
}
