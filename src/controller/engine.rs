//! Reconciliation engine
//!
//! Correlates Service and Endpoints snapshots by `(namespace, name)` and keeps
//! the registry in line with what [`derive_records`] says should exist.
//! Each resource kind is consumed by its own sequential loop; the two loops
//! only share the local indexes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::derive::{derive_records, stale_records};
use crate::consul::RegistryClient;
use crate::index::{EndpointsIndex, ServiceIndex};
use crate::model::{DiscoveryRecord, EndpointSet, Keyed, ServiceDescriptor};
use crate::watch::ResourceEvent;

/// Registry calls made by one apply or deregistration pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Successful register calls
    pub registered: usize,
    /// Successful deregister calls
    pub deregistered: usize,
    /// Calls that returned an error
    pub failed: usize,
}

impl ApplyOutcome {
    /// True when every call succeeded
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Drives registry state from Service and Endpoints events
pub struct ReconcileEngine {
    registry: Arc<dyn RegistryClient>,
    services: Arc<ServiceIndex>,
    endpoints: Arc<EndpointsIndex>,
}

impl ReconcileEngine {
    /// Create an engine over the given registry and indexes
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        services: Arc<ServiceIndex>,
        endpoints: Arc<EndpointsIndex>,
    ) -> Self {
        Self {
            registry,
            services,
            endpoints,
        }
    }

    /// Last known Service snapshots
    pub fn services(&self) -> &ServiceIndex {
        &self.services
    }

    /// Last known Endpoints snapshots
    pub fn endpoints(&self) -> &EndpointsIndex {
        &self.endpoints
    }

    /// Process one Service event
    pub async fn handle_service_event(&self, event: ResourceEvent<ServiceDescriptor>) {
        match event {
            ResourceEvent::Added(service) | ResourceEvent::Updated(service) => {
                let key = service.key();
                self.services.upsert(service.clone());

                if !service.is_headless() {
                    debug!(service = %key, "Service has a cluster address, skipping");
                    return;
                }

                match self.endpoints.get(&key) {
                    Some(endpoints) => {
                        self.apply(&service, &endpoints).await;
                    }
                    None => {
                        debug!(service = %key, "No endpoints known yet, deferring registration");
                    }
                }
            }
            ResourceEvent::Deleted(service) => {
                self.deregister_service(&service).await;
                self.services.delete(&service.key());
            }
        }
    }

    /// Process one Endpoints event
    pub async fn handle_endpoints_event(&self, event: ResourceEvent<EndpointSet>) {
        match event {
            ResourceEvent::Added(endpoints) | ResourceEvent::Updated(endpoints) => {
                let key = endpoints.key();
                self.endpoints.upsert(endpoints.clone());

                let Some(service) = self.services.get(&key) else {
                    debug!(endpoints = %key, "No service known for endpoints, skipping");
                    return;
                };
                if !service.is_headless() {
                    debug!(endpoints = %key, "Service has a cluster address, skipping");
                    return;
                }

                self.apply(&service, &endpoints).await;
            }
            ResourceEvent::Deleted(endpoints) => {
                debug!(endpoints = %endpoints.key(), "Endpoints deleted");
                self.endpoints.delete(&endpoints.key());
            }
        }
    }

    /// Register every derived record, then remove registry records that are
    /// no longer derived
    ///
    /// A failed register is counted and the pass continues. A failed query
    /// abandons the removal step.
    pub async fn apply(
        &self,
        service: &ServiceDescriptor,
        endpoints: &EndpointSet,
    ) -> ApplyOutcome {
        let name = service.derived_name();
        let desired = derive_records(service, endpoints);
        let mut outcome = ApplyOutcome::default();

        for record in &desired {
            self.register(record, &mut outcome).await;
        }

        match self.registry.query(&name, "").await {
            Ok(existing) => {
                for record in stale_records(&existing, &desired) {
                    self.deregister(record, &mut outcome).await;
                }
            }
            Err(e) => {
                error!(
                    service = %name,
                    error = %e,
                    "Failed to query registry, skipping stale record removal"
                );
                outcome.failed += 1;
            }
        }

        log_outcome(&name, "apply", &outcome);
        outcome
    }

    /// Remove every registry record carrying the service's derived name
    pub async fn deregister_service(&self, service: &ServiceDescriptor) -> ApplyOutcome {
        let name = service.derived_name();
        let mut outcome = ApplyOutcome::default();

        match self.registry.query(&name, "").await {
            Ok(existing) => {
                for record in &existing {
                    self.deregister(record, &mut outcome).await;
                }
            }
            Err(e) => {
                error!(service = %name, error = %e, "Failed to query registry for deleted service");
                outcome.failed += 1;
            }
        }

        log_outcome(&name, "deregister", &outcome);
        outcome
    }

    async fn register(&self, record: &DiscoveryRecord, outcome: &mut ApplyOutcome) {
        match self.registry.register(record).await {
            Ok(()) => {
                info!(
                    service = %record.name,
                    node = %record.node,
                    address = %record.address,
                    port = record.port,
                    "Registered"
                );
                outcome.registered += 1;
            }
            Err(e) => {
                error!(
                    service = %record.name,
                    node = %record.node,
                    address = %record.address,
                    error = %e,
                    "Failed to register"
                );
                outcome.failed += 1;
            }
        }
    }

    async fn deregister(&self, record: &DiscoveryRecord, outcome: &mut ApplyOutcome) {
        match self.registry.deregister(record).await {
            Ok(()) => {
                info!(
                    service = %record.name,
                    node = %record.node,
                    address = %record.address,
                    "Deregistered"
                );
                outcome.deregistered += 1;
            }
            Err(e) => {
                error!(
                    service = %record.name,
                    node = %record.node,
                    address = %record.address,
                    error = %e,
                    "Failed to deregister"
                );
                outcome.failed += 1;
            }
        }
    }

    /// Consume Service events until the sender side closes
    pub async fn run_service_loop(&self, mut rx: mpsc::Receiver<ResourceEvent<ServiceDescriptor>>) {
        while let Some(event) = rx.recv().await {
            debug!(service = %event.snapshot().key(), action = event.action(), "Service event");
            self.handle_service_event(event).await;
        }
        warn!("Service event queue closed");
    }

    /// Consume Endpoints events until the sender side closes
    pub async fn run_endpoints_loop(&self, mut rx: mpsc::Receiver<ResourceEvent<EndpointSet>>) {
        while let Some(event) = rx.recv().await {
            debug!(endpoints = %event.snapshot().key(), action = event.action(), "Endpoints event");
            self.handle_endpoints_event(event).await;
        }
        warn!("Endpoints event queue closed");
    }

    /// Run both event loops concurrently until both queues close
    pub async fn run(
        self: Arc<Self>,
        services: mpsc::Receiver<ResourceEvent<ServiceDescriptor>>,
        endpoints: mpsc::Receiver<ResourceEvent<EndpointSet>>,
    ) {
        tokio::join!(
            self.run_service_loop(services),
            self.run_endpoints_loop(endpoints)
        );
    }
}

fn log_outcome(name: &str, pass: &str, outcome: &ApplyOutcome) {
    if outcome.is_clean() {
        debug!(
            service = %name,
            pass,
            registered = outcome.registered,
            deregistered = outcome.deregistered,
            "Reconciled"
        );
    } else {
        warn!(
            service = %name,
            pass,
            registered = outcome.registered,
            deregistered = outcome.deregistered,
            failed = outcome.failed,
            "Reconciled with failures"
        );
    }
}
