// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Container Registry
//!
//! Durable source of truth for container records. Maintains the capability
//! and name indices, accepts heartbeats, evicts stale entries, and
//! aggregates cluster status. Registration is an idempotent upsert: a second
//! registration for a known id is an update, never an error.
//!
//! Invariant: container C is indexed under capability X iff X is in
//! C.capabilities; every capability-affecting write rebuilds C's index
//! membership across all capability sets.

use crate::application::hub::CommunicationHub;
use crate::domain::container::{
    ArchivedContainer, Capability, ClusterStatus, ContainerId, ContainerRecord, ContainerStatus,
    HeartbeatPayload, ResourceSnapshot,
};
use crate::domain::error::RegistryError;
use crate::domain::events::ContainerEvent;
use crate::domain::message::{ContainerMessage, MessageType};
use crate::domain::store::SharedStore;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONTAINERS: &str = "containers";
const ARCHIVE: &str = "containers:archive";
const NAME_INDEX: &str = "name-index";
const REGISTERED_IDS: &str = "registered-ids";
const CAPABILITY_INDEX_PREFIX: &str = "capability-index/";

const EVICTION_REASON: &str = "heartbeat_timeout";

fn capability_index_key(capability: Capability) -> String {
    format!("{CAPABILITY_INDEX_PREFIX}{capability}")
}

fn encode<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, RegistryError> {
    Ok(serde_json::to_value(value).map_err(crate::domain::error::StoreError::Serialization)?)
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub heartbeat_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

/// Callback invoked for every container event observed on the hub.
/// Extension point; the registry installs only a logging handler itself.
pub trait ContainerEventHandler: Send + Sync {
    fn name(&self) -> &str;
    fn on_event(&self, event: &ContainerEvent);
}

struct LoggingEventHandler;

impl ContainerEventHandler for LoggingEventHandler {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_event(&self, event: &ContainerEvent) {
        debug!(?event, "container event");
    }
}

pub struct ContainerRegistry {
    store: Arc<dyn SharedStore>,
    hub: Arc<CommunicationHub>,
    config: RegistryConfig,
    handlers: RwLock<Vec<Arc<dyn ContainerEventHandler>>>,
}

impl ContainerRegistry {
    pub fn new(
        store: Arc<dyn SharedStore>,
        hub: Arc<CommunicationHub>,
        config: RegistryConfig,
    ) -> Arc<Self> {
        let registry = Arc::new(Self {
            store,
            hub,
            config,
            handlers: RwLock::new(Vec::new()),
        });
        registry.register_handler(Arc::new(LoggingEventHandler));
        registry
    }

    // ---- registration --------------------------------------------------

    /// Insert or update a container record. Returns `true` when the call
    /// updated an existing registration.
    pub async fn register_container(
        &self,
        mut record: ContainerRecord,
    ) -> Result<bool, RegistryError> {
        record.health_score = record.health_score.min(100);
        let id = record.id.clone();
        let existing = self.get_container(&id).await?;
        let was_update = existing.is_some();

        // A renamed container must not leave a dangling name-index entry.
        if let Some(previous) = &existing {
            if previous.name != record.name {
                self.store.hash_delete(NAME_INDEX, &previous.name).await?;
            }
        }

        self.store
            .hash_put(CONTAINERS, id.as_str(), encode(&record)?)
            .await?;
        self.store
            .hash_put(NAME_INDEX, &record.name, encode(&id.as_str())?)
            .await?;
        self.store.set_add(REGISTERED_IDS, id.as_str()).await?;
        self.rebuild_capability_membership(&record).await?;

        let event = if was_update {
            info!(container_id = %id, "container registration updated");
            ContainerEvent::Updated {
                container_id: id.clone(),
                at: Utc::now(),
            }
        } else {
            info!(container_id = %id, name = %record.name, "container registered");
            ContainerEvent::Registered {
                container_id: id.clone(),
                name: record.name.clone(),
                at: Utc::now(),
            }
        };
        self.publish(event).await;
        self.update_container_gauge().await;
        Ok(was_update)
    }

    /// Re-derive this container's membership in every capability index set.
    async fn rebuild_capability_membership(
        &self,
        record: &ContainerRecord,
    ) -> Result<(), RegistryError> {
        for capability in Capability::ALL {
            let key = capability_index_key(capability);
            if record.has_capability(capability) {
                self.store.set_add(&key, record.id.as_str()).await?;
            } else {
                self.store.set_remove(&key, record.id.as_str()).await?;
            }
        }
        Ok(())
    }

    // ---- heartbeats ----------------------------------------------------

    /// Refresh a container's liveness. Returns `false` for unknown ids.
    pub async fn heartbeat(&self, payload: HeartbeatPayload) -> Result<bool, RegistryError> {
        let Some(mut record) = self.get_container(&payload.container_id).await? else {
            debug!(container_id = %payload.container_id, "heartbeat from unknown container");
            return Ok(false);
        };

        record.last_heartbeat = Utc::now();
        record.status = ContainerStatus::Active;
        if let Some(score) = payload.health_score {
            record.health_score = score.min(100);
        }
        if let Some(resources) = payload.resources {
            record.resources = resources;
        }

        self.store
            .hash_put(CONTAINERS, record.id.as_str(), encode(&record)?)
            .await?;
        self.hub.touch_container(&record.id);
        Ok(true)
    }

    /// Health-loop write path: new score/status/resources, refreshing the
    /// heartbeat (the caller just observed the container alive). Returns
    /// whether the status changed.
    pub async fn update_health(
        &self,
        id: &ContainerId,
        health_score: u8,
        status: ContainerStatus,
        resources: ResourceSnapshot,
    ) -> Result<bool, RegistryError> {
        let Some(mut record) = self.get_container(id).await? else {
            return Err(RegistryError::ContainerNotFound(id.clone()));
        };

        let changed = record.status != status;
        record.health_score = health_score.min(100);
        record.status = status;
        record.resources = resources;
        record.last_heartbeat = Utc::now();

        self.store
            .hash_put(CONTAINERS, id.as_str(), encode(&record)?)
            .await?;

        if changed {
            self.publish(ContainerEvent::HealthChanged {
                container_id: id.clone(),
                health_score: record.health_score,
                status,
                at: Utc::now(),
            })
            .await;
        }
        Ok(changed)
    }

    // ---- deregistration ------------------------------------------------

    /// Remove a container from every index and archive its record.
    pub async fn deregister_container(
        &self,
        id: &ContainerId,
        reason: &str,
    ) -> Result<(), RegistryError> {
        let Some(mut record) = self.get_container(id).await? else {
            return Err(RegistryError::ContainerNotFound(id.clone()));
        };
        record.status = ContainerStatus::Terminated;

        self.store
            .hash_put(
                ARCHIVE,
                id.as_str(),
                encode(&ArchivedContainer {
                    record: record.clone(),
                    deregistered_at: Utc::now(),
                    reason: reason.to_string(),
                })?,
            )
            .await?;

        self.store.set_remove(REGISTERED_IDS, id.as_str()).await?;
        for capability in Capability::ALL {
            self.store
                .set_remove(&capability_index_key(capability), id.as_str())
                .await?;
        }
        self.store.hash_delete(NAME_INDEX, &record.name).await?;
        self.store.hash_delete(CONTAINERS, id.as_str()).await?;

        info!(container_id = %id, reason, "container deregistered");
        self.publish(ContainerEvent::Deregistered {
            container_id: id.clone(),
            reason: reason.to_string(),
            at: Utc::now(),
        })
        .await;
        self.update_container_gauge().await;
        Ok(())
    }

    // ---- reads ---------------------------------------------------------

    pub async fn get_container(
        &self,
        id: &ContainerId,
    ) -> Result<Option<ContainerRecord>, RegistryError> {
        match self.store.hash_get(CONTAINERS, id.as_str()).await? {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value).map_err(
                crate::domain::error::StoreError::Serialization,
            )?)),
        }
    }

    pub async fn get_container_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ContainerRecord>, RegistryError> {
        let Some(id) = self.store.hash_get(NAME_INDEX, name).await? else {
            return Ok(None);
        };
        let Some(id) = id.as_str().map(ContainerId::new) else {
            return Ok(None);
        };
        self.get_container(&id).await
    }

    pub async fn list_containers(&self) -> Result<Vec<ContainerRecord>, RegistryError> {
        let mut records = Vec::new();
        for (_, value) in self.store.hash_entries(CONTAINERS).await? {
            match serde_json::from_value(value) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping unreadable container record: {}", e),
            }
        }
        Ok(records)
    }

    /// Containers advertising `capability`, resolved through the index.
    pub async fn containers_with_capability(
        &self,
        capability: Capability,
    ) -> Result<Vec<ContainerRecord>, RegistryError> {
        let ids = self
            .store
            .set_members(&capability_index_key(capability))
            .await?;
        let mut records = Vec::new();
        for id in ids {
            if let Some(record) = self.get_container(&ContainerId::new(id)).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn get_archived(
        &self,
        id: &ContainerId,
    ) -> Result<Option<ArchivedContainer>, RegistryError> {
        match self.store.hash_get(ARCHIVE, id.as_str()).await? {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value).map_err(
                crate::domain::error::StoreError::Serialization,
            )?)),
        }
    }

    pub async fn get_cluster_status(&self) -> Result<ClusterStatus, RegistryError> {
        let records = self.list_containers().await?;
        let mut status = ClusterStatus {
            total_containers: records.len(),
            ..Default::default()
        };
        let mut distribution: BTreeMap<Capability, usize> = BTreeMap::new();

        for record in &records {
            if record.is_active() {
                status.active_containers += 1;
                status.total_cpu_cores += record.resources.cpu_cores;
                status.total_memory_bytes += record.resources.memory_limit_bytes;
                status.used_memory_bytes += record.resources.memory_used_bytes;
            }
            for capability in &record.capabilities {
                *distribution.entry(*capability).or_default() += 1;
            }
        }
        status.inactive_containers = status.total_containers - status.active_containers;
        status.capability_distribution = distribution;
        Ok(status)
    }

    // ---- event handlers ------------------------------------------------

    pub fn register_handler(&self, handler: Arc<dyn ContainerEventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Remove a handler by name. Returns whether one was removed.
    pub fn unregister_handler(&self, name: &str) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| h.name() != name);
        handlers.len() < before
    }

    fn dispatch_to_handlers(&self, event: &ContainerEvent) {
        let handlers: Vec<_> = self.handlers.read().iter().cloned().collect();
        for handler in handlers {
            handler.on_event(event);
        }
    }

    /// Publish a container event on the hub. Bus failures are logged, never
    /// escalated: registry writes must not fail because the bus is down.
    async fn publish(&self, event: ContainerEvent) {
        match serde_json::to_value(&event) {
            Ok(payload) => {
                if let Err(e) = self.hub.send_event(None, payload).await {
                    warn!("failed to publish container event: {}", e);
                }
            }
            Err(e) => warn!("failed to serialize container event: {}", e),
        }
    }

    async fn update_container_gauge(&self) {
        if let Ok(ids) = self.store.set_members(REGISTERED_IDS).await {
            metrics::gauge!("gridplane_registry_containers").set(ids.len() as f64);
        }
    }

    // ---- background loops ----------------------------------------------

    /// Evict every container whose heartbeat is older than the timeout.
    /// Returns the number evicted.
    pub async fn run_cleanup_cycle(&self) -> Result<usize, RegistryError> {
        let timeout = chrono::TimeDelta::from_std(self.config.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::TimeDelta::seconds(60));
        let now = Utc::now();
        let mut evicted = 0;

        for record in self.list_containers().await? {
            if now - record.last_heartbeat > timeout {
                info!(
                    container_id = %record.id,
                    last_heartbeat = %record.last_heartbeat,
                    "evicting stale container"
                );
                match self.deregister_container(&record.id, EVICTION_REASON).await {
                    Ok(()) => evicted += 1,
                    // Concurrent removal is benign; the record is gone either way.
                    Err(RegistryError::ContainerNotFound(_)) => {}
                    Err(e) => warn!(container_id = %record.id, "eviction failed: {}", e),
                }
            }
        }
        Ok(evicted)
    }

    /// Spawn the cleanup loop and the hub event-dispatch loop.
    pub fn spawn_loops(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let cleanup = {
            let registry = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(registry.config.cleanup_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = registry.run_cleanup_cycle().await {
                                warn!("registry cleanup cycle failed: {}", e);
                            }
                        }
                    }
                }
                debug!("registry cleanup loop stopped");
            })
        };
        handles.push(cleanup);

        // Subscribe before spawning so events published between this call
        // and the task's first poll still reach the handlers.
        let events = {
            let registry = Arc::clone(self);
            let rx = self.hub.subscribe_broadcast();
            tokio::spawn(async move {
                registry.run_event_loop(rx, cancel).await;
            })
        };
        handles.push(events);

        handles
    }

    /// Listen on the hub's event channel and dispatch container events to
    /// the registered handler callbacks.
    async fn run_event_loop(
        &self,
        mut rx: broadcast::Receiver<ContainerMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => msg,
            };
            match msg {
                Ok(msg) if msg.message_type == MessageType::Event => {
                    let payload = match self.hub.open_payload(&msg) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!("cannot open event payload: {}", e);
                            continue;
                        }
                    };
                    // Non-container events on the same channel are ignored.
                    if let Ok(event) = serde_json::from_value::<ContainerEvent>(payload) {
                        self.dispatch_to_handlers(&event);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("registry event loop lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("registry event loop stopped");
    }
}
