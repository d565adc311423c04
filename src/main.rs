//! kube2consul - register Kubernetes headless services into Consul

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::Api;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kube2consul::config::{create_kube_client, Cli};
use kube2consul::consul::ConsulCatalog;
use kube2consul::controller::ReconcileEngine;
use kube2consul::index::{EndpointsIndex, ServiceIndex};
use kube2consul::startup::wait_for_kubernetes_service;
use kube2consul::watch::{spawn_source, EVENT_QUEUE_CAPACITY};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Both kube and reqwest build rustls configs from the process default
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install rustls crypto provider: {:?}", e);
        std::process::exit(1);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let client = create_kube_client(cli.kube_master.as_ref(), cli.kube_config.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let catalog = ConsulCatalog::new(cli.consul.clone())
        .map_err(|e| anyhow::anyhow!("Failed to create Consul client: {}", e))?;
    tracing::info!(consul = %catalog.base_url(), "Using Consul");

    let engine = Arc::new(ReconcileEngine::new(
        Arc::new(catalog),
        Arc::new(ServiceIndex::new()),
        Arc::new(EndpointsIndex::new()),
    ));

    let (service_tx, service_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (endpoints_tx, endpoints_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

    let resync = cli.resync_period();
    let service_source = spawn_source(Api::<Service>::all(client.clone()), resync, service_tx);
    let endpoints_source =
        spawn_source(Api::<Endpoints>::all(client.clone()), resync, endpoints_tx);

    let loops = tokio::spawn(engine.run(service_rx, endpoints_rx));

    wait_for_kubernetes_service(client).await;
    tracing::info!("kube2consul started, watching services and endpoints");

    tokio::select! {
        result = loops => {
            result.map_err(|e| anyhow::anyhow!("Event loops panicked: {}", e))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    service_source.abort();
    endpoints_source.abort();
    tracing::info!("kube2consul stopped");
    Ok(())
}
