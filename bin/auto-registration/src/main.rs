use anyhow::{Context, Result};
use clap::Parser;
use registration_agent::AgentRegistrar;
use registration_core::{
    DiscoveryStore, ExtensionExtractor, Reconciler, Registrar, SyncMetrics, SyncScheduler,
    WorkloadTracker,
};
use registration_kube::{
    check_permissions, create_client, run_pod_watch, run_service_watch, service_cache,
    PodEventDispatcher, ServiceEventDispatcher, WatchScope,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod config;
mod health;
mod logging;

use config::Args;
use health::HealthState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level, args.log_format)?;

    args.validate().context("Invalid configuration")?;

    info!("Starting auto-registration {}...", env!("CARGO_PKG_VERSION"));

    let client = create_client(args.request_timeout())
        .await
        .context("Could not connect to the Kubernetes API")?;
    check_permissions(&client, args.namespace())
        .await
        .into_result()
        .context("Required permissions are missing")?;

    let metrics = Arc::new(SyncMetrics::new()?);
    let store = Arc::new(DiscoveryStore::new());
    let registrar: Arc<dyn Registrar> = Arc::new(AgentRegistrar::new(args.agent_config())?);
    info!("Registering extensions with the agent at {}", args.agent_config().base_url);

    let reconciler = Reconciler::new(store.clone(), registrar, metrics.clone());
    let (scheduler, trigger) = SyncScheduler::new(args.scheduler_config(), reconciler);

    let health = HealthState {
        metrics: metrics.clone(),
        sync_state: scheduler.subscribe(),
    };
    let health_port = args.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port, health).await {
            error!("Health server error: {}", e);
        }
    });

    info!("Initial delay of {:?} before starting the discovery", args.initial_delay());
    tokio::time::sleep(args.initial_delay()).await;

    let mut scheduler_task = tokio::spawn(scheduler.run());

    let (services, service_writer) = service_cache();
    let tracker = Arc::new(WorkloadTracker::new(
        ExtensionExtractor::new(args.extractor_config()),
        store,
        Arc::new(services.clone()),
        trigger,
    ));

    let scope = WatchScope::new(client, args.namespace_filter.clone());
    match scope.namespace() {
        Some(ns) => info!("Discovering extensions in namespace {}", ns),
        None => info!("Discovering extensions in all namespaces"),
    }

    let pods = PodEventDispatcher::new(tracker);
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
    let service_events = ServiceEventDispatcher::new(service_writer, refresh_tx);
    let mut service_watch = tokio::spawn(run_service_watch(scope.api(), service_events));

    info!("Start Kubernetes cache sync.");
    tokio::select! {
        ready = services.wait_until_ready() => {
            ready.context("Service cache closed before it was synced")?;
            info!("Service cache synced, {} service(s)", services.len());
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, exiting...");
            return Ok(());
        }
    }

    let mut pod_watch = tokio::spawn(run_pod_watch(scope.api(), pods, refresh_rx));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, exiting...");
        }
        _ = &mut pod_watch => warn!("Pod watch stopped, exiting..."),
        _ = &mut service_watch => warn!("Service watch stopped, exiting..."),
        _ = &mut scheduler_task => warn!("Sync scheduler stopped, exiting..."),
    }

    Ok(())
}
