// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Foreground control-plane runner.
//!
//! Exactly one control plane may manage a store at a time. On top of sled's
//! file lock, a lease key in the store guards against a second instance
//! pointed at a copy of the data directory; the lease is taken with
//! compare-and-swap, refreshed on a timer, and released on shutdown.

use anyhow::{bail, Context, Result};
use gridplane_core::application::discovery::DiscoveryConfig;
use gridplane_core::application::registry::{ContainerEventHandler, RegistryConfig};
use gridplane_core::domain::container::ContainerId;
use gridplane_core::domain::events::ContainerEvent;
use gridplane_core::domain::store::SharedStore;
use gridplane_core::infrastructure::docker::DockerEngine;
use gridplane_core::infrastructure::http::HttpContainerApi;
use gridplane_core::infrastructure::store::spawn_ttl_sweeper;
use gridplane_core::{
    CommunicationHub, ContainerDiscovery, ContainerRegistry, DistributedAgentManager,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const LEASE_KEY: &str = "controlplane/lease";
const LEASE_TTL: Duration = Duration::from_secs(60);
const LEASE_REFRESH: Duration = Duration::from_secs(20);

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    info!(node_id = %config.node.id, "starting gridplane control plane");

    let store = super::open_store(&config)?;
    acquire_lease(store.as_ref(), &config.node.id).await?;

    let engine = Arc::new(
        DockerEngine::new(config.docker.socket_path.clone())
            .context("cannot connect to the container engine")?,
    );
    engine
        .healthcheck()
        .await
        .context("container engine did not answer a ping")?;
    let api = Arc::new(HttpContainerApi::new().context("cannot build the container API client")?);

    let hub = CommunicationHub::new(
        ContainerId::new(config.node.id.clone()),
        Arc::clone(&store),
        api.clone(),
        config.hub.clone(),
    )
    .await;
    if !hub.encryption_enabled() && config.hub.encrypt {
        warn!("hub running without payload encryption");
    }

    let registry = ContainerRegistry::new(
        Arc::clone(&store),
        Arc::clone(&hub),
        RegistryConfig {
            heartbeat_timeout: config.heartbeat_timeout(),
            cleanup_interval: config.intervals.cleanup(),
        },
    );
    let manager = Arc::new(
        DistributedAgentManager::new(
            Arc::clone(&registry),
            Arc::clone(&hub),
            api.clone(),
            Arc::clone(&store),
        )
        .await
        .context("cannot restore agent placements")?,
    );
    registry.register_handler(Arc::new(FailureRecoveryHandler {
        manager: Arc::clone(&manager),
    }));
    let discovery = Arc::new(ContainerDiscovery::new(
        engine,
        Arc::clone(&registry),
        Arc::clone(&hub),
        api.clone(),
        DiscoveryConfig {
            discovery_interval: config.intervals.discovery(),
            health_interval: config.intervals.health(),
            labels: config.labels.clone(),
        },
    ));

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();
    handles.extend(hub.spawn_loops(cancel.clone()));
    handles.extend(registry.spawn_loops(cancel.clone()));
    handles.extend(discovery.spawn_loops(cancel.clone()));
    handles.push(spawn_ttl_sweeper(
        Arc::clone(&store),
        config.intervals.sweep(),
        cancel.clone(),
    ));
    handles.push(spawn_lease_refresher(
        Arc::clone(&store),
        config.node.id.clone(),
        cancel.clone(),
    ));

    info!(
        agents = manager.agent_count(),
        "control plane running; press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for shutdown signal")?;
    info!("shutting down");
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("background task panicked: {}", e);
        }
    }
    release_lease(store.as_ref(), &config.node.id).await;
    info!("shutdown complete");
    Ok(())
}

/// Evacuates agents from any container the registry deregisters.
struct FailureRecoveryHandler {
    manager: Arc<DistributedAgentManager>,
}

impl ContainerEventHandler for FailureRecoveryHandler {
    fn name(&self) -> &str {
        "failure-recovery"
    }

    fn on_event(&self, event: &ContainerEvent) {
        if let ContainerEvent::Deregistered { container_id, .. } = event {
            let manager = Arc::clone(&self.manager);
            let container_id = container_id.clone();
            tokio::spawn(async move {
                match manager.handle_container_failure(&container_id).await {
                    Ok(outcomes) if outcomes.is_empty() => {}
                    Ok(outcomes) => {
                        info!(
                            container_id = %container_id,
                            recovered = outcomes.iter().filter(|o| o.result.is_ok()).count(),
                            total = outcomes.len(),
                            "failure recovery finished"
                        );
                    }
                    Err(e) => error!(container_id = %container_id, "failure recovery errored: {}", e),
                }
            });
        }
    }
}

async fn acquire_lease(store: &dyn SharedStore, node_id: &str) -> Result<()> {
    let lease = Value::String(node_id.to_string());
    let taken = store
        .compare_and_swap(LEASE_KEY, None, Some(lease), Some(LEASE_TTL))
        .await
        .context("cannot reach the store for lease acquisition")?;
    if !taken {
        let holder = store
            .get(LEASE_KEY)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        bail!("another control plane ({holder}) holds the instance lease");
    }
    info!("instance lease acquired");
    Ok(())
}

/// Refresh the lease until cancelled. Losing the lease mid-run means a
/// second instance took over; this one stops refreshing and logs loudly.
fn spawn_lease_refresher(
    store: Arc<dyn SharedStore>,
    node_id: String,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let lease = Value::String(node_id);
        let mut ticker = tokio::time::interval(LEASE_REFRESH);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match store
                        .compare_and_swap(
                            LEASE_KEY,
                            Some(lease.clone()),
                            Some(lease.clone()),
                            Some(LEASE_TTL),
                        )
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => {
                            error!("instance lease lost; another control plane took over");
                            cancel.cancel();
                            break;
                        }
                        Err(e) => warn!("lease refresh failed: {}", e),
                    }
                }
            }
        }
    })
}

async fn release_lease(store: &dyn SharedStore, node_id: &str) {
    let lease = Value::String(node_id.to_string());
    match store.compare_and_swap(LEASE_KEY, Some(lease), None, None).await {
        Ok(true) => info!("instance lease released"),
        Ok(false) => warn!("lease was no longer held at shutdown"),
        Err(e) => warn!("lease release failed: {}", e),
    }
}
