// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Container Discovery
//!
//! Scans the container engine for compatible workloads, auto-registers them
//! with the registry and the hub, and runs the periodic health loop that
//! samples resources, scores containers, and deregisters workloads the
//! engine no longer knows about.
//!
//! Compatibility check order: the enabled label, then the capabilities
//! label, then an exec probe for the marker file. The exec probe runs last
//! since it is the expensive path.

use crate::application::hub::CommunicationHub;
use crate::application::registry::ContainerRegistry;
use crate::config::LabelConventions;
use crate::domain::api::ContainerApi;
use crate::domain::container::{
    Capability, ContainerId, ContainerRecord, ContainerStatus, ResourceSnapshot,
};
use crate::domain::engine::{ContainerEngine, WorkloadDetails, WorkloadSummary};
use crate::domain::error::{DiscoveryError, EngineError, RegistryError};
use crate::domain::events::ContainerEvent;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MISSING_REASON: &str = "container_missing";

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub discovery_interval: Duration,
    pub health_interval: Duration,
    pub labels: LabelConventions,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(30),
            health_interval: Duration::from_secs(15),
            labels: LabelConventions::default(),
        }
    }
}

/// Outcome counters for one discovery sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryCycleReport {
    pub scanned: usize,
    pub compatible: usize,
    pub newly_registered: usize,
    pub removed: usize,
}

pub struct ContainerDiscovery {
    engine: Arc<dyn ContainerEngine>,
    registry: Arc<ContainerRegistry>,
    hub: Arc<CommunicationHub>,
    api: Arc<dyn ContainerApi>,
    config: DiscoveryConfig,
    /// Compatible ids seen by the previous sweep; vanished ids get a
    /// removal event on the next one.
    known: Mutex<BTreeSet<ContainerId>>,
}

impl ContainerDiscovery {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        registry: Arc<ContainerRegistry>,
        hub: Arc<CommunicationHub>,
        api: Arc<dyn ContainerApi>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            hub,
            api,
            config,
            known: Mutex::new(BTreeSet::new()),
        }
    }

    // ---- discovery -----------------------------------------------------

    /// One full sweep: scan, filter for compatibility, register newcomers.
    pub async fn run_discovery_cycle(&self) -> Result<DiscoveryCycleReport, DiscoveryError> {
        let workloads = self.engine.list_workloads().await?;
        let mut report = DiscoveryCycleReport {
            scanned: workloads.len(),
            ..Default::default()
        };

        let mut current = BTreeSet::new();
        for workload in workloads {
            if !workload.running {
                continue;
            }
            if !self.is_compatible(&workload).await {
                continue;
            }
            report.compatible += 1;
            current.insert(workload.id.clone());

            if self.registry.get_container(&workload.id).await?.is_some() {
                continue;
            }
            match self.register_workload(&workload).await {
                Ok(()) => report.newly_registered += 1,
                Err(e) => {
                    warn!(container_id = %workload.id, "registration failed: {}", e);
                }
            }
        }

        let vanished: Vec<ContainerId> = {
            let mut known = self.known.lock();
            let gone = known.difference(&current).cloned().collect();
            *known = current;
            gone
        };
        for id in vanished {
            report.removed += 1;
            info!(container_id = %id, "container disappeared from the scan");
            self.publish(ContainerEvent::Removed {
                container_id: id,
                at: Utc::now(),
            })
            .await;
        }

        debug!(
            scanned = report.scanned,
            compatible = report.compatible,
            registered = report.newly_registered,
            removed = report.removed,
            "discovery cycle complete"
        );
        metrics::counter!("gridplane_discovery_cycles_total").increment(1);
        Ok(report)
    }

    /// A workload is compatible when it carries the enabled label, advertises
    /// capabilities, or contains the marker file.
    async fn is_compatible(&self, workload: &WorkloadSummary) -> bool {
        let labels = &self.config.labels;
        if let Some(value) = workload.labels.get(&labels.enabled) {
            return value == "true";
        }
        if workload.labels.contains_key(&labels.capabilities) {
            return true;
        }
        match self
            .engine
            .exec_probe(&workload.id, &["test", "-f", &labels.marker_file])
            .await
        {
            Ok(found) => found,
            Err(e) => {
                debug!(container_id = %workload.id, "marker probe failed: {}", e);
                false
            }
        }
    }

    async fn register_workload(&self, workload: &WorkloadSummary) -> Result<(), DiscoveryError> {
        let details = self.engine.inspect(&workload.id).await?;
        let resources = match self.engine.sample_resources(&workload.id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(container_id = %workload.id, "initial resource sample failed: {}", e);
                ResourceSnapshot::default()
            }
        };
        let capabilities = self.assess_capabilities(&details, &resources);
        let api_endpoint = self.api_endpoint(&details);

        let now = Utc::now();
        let record = ContainerRecord {
            id: details.id.clone(),
            name: details.name.clone(),
            host_address: details.host_address.clone(),
            api_endpoint: api_endpoint.clone(),
            capabilities: capabilities.clone(),
            resources,
            status: ContainerStatus::Active,
            health_score: 100,
            registered_at: now,
            last_heartbeat: now,
        };
        self.registry.register_container(record).await?;
        if let Err(e) = self
            .hub
            .register_container(details.id.clone(), api_endpoint)
            .await
        {
            warn!(container_id = %details.id, "hub registration failed: {}", e);
        }

        info!(
            container_id = %details.id,
            name = %details.name,
            ?capabilities,
            "discovered compatible container"
        );
        self.publish(ContainerEvent::Discovered {
            container_id: details.id.clone(),
            name: details.name,
            capabilities,
            at: now,
        })
        .await;
        Ok(())
    }

    async fn publish(&self, event: ContainerEvent) {
        match serde_json::to_value(&event) {
            Ok(payload) => {
                if let Err(e) = self.hub.send_event(None, payload).await {
                    warn!("failed to publish discovery event: {}", e);
                }
            }
            Err(e) => warn!("cannot serialize discovery event: {}", e),
        }
    }

    /// Derive capability tags from the capabilities label, falling back to
    /// resource-shape heuristics when the label is absent.
    fn assess_capabilities(
        &self,
        details: &WorkloadDetails,
        resources: &ResourceSnapshot,
    ) -> BTreeSet<Capability> {
        let mut capabilities = BTreeSet::from([Capability::AgentRunner]);

        if let Some(value) = details.labels.get(&self.config.labels.capabilities) {
            for tag in value.split(',') {
                match Capability::from_str(tag) {
                    Ok(cap) => {
                        capabilities.insert(cap);
                    }
                    Err(e) => warn!(container_id = %details.id, "{}", e),
                }
            }
            return capabilities;
        }

        // 8 GiB of memory or visible GPU devices imply the matching tags.
        if resources.memory_limit_bytes >= 8 * 1024 * 1024 * 1024 {
            capabilities.insert(Capability::HighMemory);
        }
        if details
            .env
            .iter()
            .any(|e| e.starts_with("NVIDIA_VISIBLE_DEVICES=") && !e.ends_with("=void"))
        {
            capabilities.insert(Capability::GpuCompute);
        }
        capabilities
    }

    fn api_endpoint(&self, details: &WorkloadDetails) -> Option<String> {
        details
            .labels
            .get(&self.config.labels.api_port)
            .and_then(|port| port.parse::<u16>().ok())
            .map(|port| format!("http://{}:{}", details.host_address, port))
    }

    // ---- health --------------------------------------------------------

    /// Sample every registered container, probe its API for liveness, and
    /// refresh its health score. A container the engine no longer knows
    /// about is deregistered.
    pub async fn run_health_cycle(&self) -> Result<(), DiscoveryError> {
        for record in self.registry.list_containers().await? {
            match self.engine.sample_resources(&record.id).await {
                Ok(resources) => {
                    let alive = match record.api_endpoint.as_deref() {
                        Some(endpoint) => self.api.health(endpoint).await.unwrap_or(false),
                        // No API surface to probe; only resource pressure
                        // can count against the score.
                        None => true,
                    };
                    let score = health_score(&resources, alive);
                    let status = if score > 50 {
                        ContainerStatus::Active
                    } else {
                        ContainerStatus::Unhealthy
                    };
                    if let Err(e) = self
                        .registry
                        .update_health(&record.id, score, status, resources)
                        .await
                    {
                        warn!(container_id = %record.id, "health update failed: {}", e);
                    }
                }
                Err(EngineError::NotFound(_)) => {
                    info!(container_id = %record.id, "container gone from engine");
                    match self
                        .registry
                        .deregister_container(&record.id, MISSING_REASON)
                        .await
                    {
                        Ok(()) | Err(RegistryError::ContainerNotFound(_)) => {}
                        Err(e) => {
                            warn!(container_id = %record.id, "deregistration failed: {}", e);
                        }
                    }
                    if let Err(e) = self.hub.unregister_container(&record.id).await {
                        warn!(container_id = %record.id, "hub unregistration failed: {}", e);
                    }
                }
                Err(e) => {
                    warn!(container_id = %record.id, "resource sample failed: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Active containers currently eligible to host agents, optionally
    /// narrowed to those advertising a capability.
    pub async fn get_available_containers(
        &self,
        capability: Option<Capability>,
    ) -> Result<Vec<ContainerRecord>, DiscoveryError> {
        let records = self.registry.list_containers().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.is_active())
            .filter(|r| capability.map_or(true, |c| r.capabilities.contains(&c)))
            .collect())
    }

    // ---- background loops ----------------------------------------------

    pub fn spawn_loops(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let discovery = {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(this.config.discovery_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = this.run_discovery_cycle().await {
                                warn!("discovery cycle failed: {}", e);
                            }
                        }
                    }
                }
                debug!("discovery loop stopped");
            })
        };
        handles.push(discovery);

        let health = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.health_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_health_cycle().await {
                            warn!("health cycle failed: {}", e);
                        }
                    }
                }
            }
            debug!("health loop stopped");
        });
        handles.push(health);

        handles
    }
}

/// Score a container 0-100: 20 points off above 90% CPU, 20 off above 90%
/// memory, 30 off when the liveness probe fails.
pub fn health_score(resources: &ResourceSnapshot, liveness_ok: bool) -> u8 {
    let mut score: i32 = 100;
    if resources.cpu_percent > 90.0 {
        score -= 20;
    }
    if resources.memory_percent > 90.0 {
        score -= 20;
    }
    if !liveness_ok {
        score -= 30;
    }
    score.max(0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_score_penalizes_pressure_and_failed_liveness() {
        let healthy = ResourceSnapshot {
            cpu_percent: 10.0,
            memory_percent: 40.0,
            ..Default::default()
        };
        assert_eq!(health_score(&healthy, true), 100);
        assert_eq!(health_score(&healthy, false), 70);

        let strained = ResourceSnapshot {
            cpu_percent: 95.0,
            memory_percent: 95.0,
            ..Default::default()
        };
        // 100 - 20 (cpu) - 20 (memory) - 30 (liveness)
        assert_eq!(health_score(&strained, false), 30);
        assert_eq!(health_score(&strained, true), 60);
    }

    #[test]
    fn high_cpu_alone_keeps_a_live_container_active() {
        let busy = ResourceSnapshot {
            cpu_percent: 92.0,
            memory_percent: 60.0,
            ..Default::default()
        };
        assert_eq!(health_score(&busy, true), 80);
    }
}
