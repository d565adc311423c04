//! Startup helpers
//!
//! The bootstrap gate holds startup until the API server answers a read of the
//! well-known `default/kubernetes` Service.

mod polling;

use std::time::Duration;

use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use tracing::info;

pub use polling::poll_until_ready;

use crate::{Error, KUBERNETES_SERVICE_NAME, KUBERNETES_SERVICE_NAMESPACE};

/// Interval between bootstrap gate attempts
pub const BOOTSTRAP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Block until the `kubernetes` Service in `default` can be read
///
/// Retries every second, forever. The fetched Service is discarded.
pub async fn wait_for_kubernetes_service(client: Client) {
    let api: Api<Service> = Api::namespaced(client, KUBERNETES_SERVICE_NAMESPACE);
    let description = format!("{KUBERNETES_SERVICE_NAMESPACE}/{KUBERNETES_SERVICE_NAME} service");

    poll_until_ready(&description, BOOTSTRAP_POLL_INTERVAL, || {
        let api = api.clone();
        async move {
            api.get(KUBERNETES_SERVICE_NAME).await?;
            Ok::<_, Error>(())
        }
    })
    .await;

    info!("Kubernetes API is reachable");
}
