// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Distributed Agent Manager
//!
//! Places agents onto eligible containers, migrates them between containers
//! with rollback on failure, recovers agents from failed containers, and
//! rebalances load across the cluster.
//!
//! Invariant: every agent appears in the placement map on at most one
//! container. Deploys and migrations each serialize behind their own
//! async mutex; reads go through a `parking_lot::RwLock` snapshot.
//!
//! The placement map is written through to the shared store on every
//! mutation so a restarted control plane resumes with its agents intact.

use crate::application::hub::CommunicationHub;
use crate::application::registry::ContainerRegistry;
use crate::application::strategy::{self, CandidateLoad};
use crate::domain::agent::{
    AgentDeploymentRecord, AgentId, DeploymentHistoryEntry, DeploymentOutcome, DeploymentRequest,
    DeploymentStrategy, FailureOutcome, MigrationReason, MigrationReport, MigrationRequest,
};
use crate::domain::api::{ContainerApi, DeploySpec};
use crate::domain::container::{Capability, ContainerId, ContainerRecord};
use crate::domain::error::{PlacementError, RegistryError, StoreError};
use crate::domain::events::{AgentEvent, ContainerEvent};
use crate::domain::store::SharedStore;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const DEPLOYMENTS: &str = "deployments";
const HISTORY: &str = "history";
const ROUND_ROBIN_CURSOR: &str = "round-robin-cursor";

/// Agents per container above the cluster mean that triggers a move during
/// rebalancing.
const REBALANCE_THRESHOLD: f64 = 1.0;

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, PlacementError> {
    Ok(serde_json::to_value(value).map_err(StoreError::Serialization)?)
}

pub struct DistributedAgentManager {
    registry: Arc<ContainerRegistry>,
    hub: Arc<CommunicationHub>,
    api: Arc<dyn ContainerApi>,
    store: Arc<dyn SharedStore>,
    /// agent id -> live placement.
    deployments: RwLock<HashMap<AgentId, AgentDeploymentRecord>>,
    deploy_lock: Mutex<()>,
    migrate_lock: Mutex<()>,
}

impl DistributedAgentManager {
    /// Build a manager, restoring the placement map from the store.
    pub async fn new(
        registry: Arc<ContainerRegistry>,
        hub: Arc<CommunicationHub>,
        api: Arc<dyn ContainerApi>,
        store: Arc<dyn SharedStore>,
    ) -> Result<Self, PlacementError> {
        let mut deployments = HashMap::new();
        for (field, value) in store.hash_entries(DEPLOYMENTS).await? {
            match serde_json::from_value::<AgentDeploymentRecord>(value) {
                Ok(record) => {
                    deployments.insert(record.agent_id, record);
                }
                Err(e) => warn!(field, "skipping unreadable deployment record: {}", e),
            }
        }
        if !deployments.is_empty() {
            info!(count = deployments.len(), "restored agent placements");
        }
        Ok(Self {
            registry,
            hub,
            api,
            store,
            deployments: RwLock::new(deployments),
            deploy_lock: Mutex::new(()),
            migrate_lock: Mutex::new(()),
        })
    }

    // ---- reads ---------------------------------------------------------

    pub fn get_deployment(&self, agent_id: &AgentId) -> Option<AgentDeploymentRecord> {
        self.deployments.read().get(agent_id).cloned()
    }

    pub fn list_deployments(&self) -> Vec<AgentDeploymentRecord> {
        self.deployments.read().values().cloned().collect()
    }

    pub fn agents_on(&self, container_id: &ContainerId) -> Vec<AgentDeploymentRecord> {
        self.deployments
            .read()
            .values()
            .filter(|r| &r.container_id == container_id)
            .cloned()
            .collect()
    }

    pub fn agent_count(&self) -> usize {
        self.deployments.read().len()
    }

    pub async fn deployment_history(
        &self,
    ) -> Result<Vec<DeploymentHistoryEntry>, PlacementError> {
        let mut entries = Vec::new();
        for (_, value) in self.store.hash_entries(HISTORY).await? {
            match serde_json::from_value(value) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("skipping unreadable history entry: {}", e),
            }
        }
        entries.sort_by_key(|e: &DeploymentHistoryEntry| e.timestamp);
        Ok(entries)
    }

    // ---- deployment ----------------------------------------------------

    /// Place a new agent. Candidate selection and the container call happen
    /// under the deploy lock so concurrent deploys observe each other's load.
    pub async fn deploy_agent(
        &self,
        request: DeploymentRequest,
    ) -> Result<AgentDeploymentRecord, PlacementError> {
        let _guard = self.deploy_lock.lock().await;

        let agent_id = AgentId::new();
        let target = self.choose_target(&request).await?;
        let endpoint = self.require_endpoint(&target)?;

        let spec = DeploySpec {
            agent_id,
            agent_type: request.agent_type.clone(),
            agent_config: request.agent_config.clone(),
            resource_requirements: request.resource_requirements.clone(),
            deployment_timestamp: Utc::now(),
            migration: false,
            previous_container: None,
            agent_state: None,
        };

        let details = match self.api.deploy_agent(&endpoint, &spec).await {
            Ok(details) => details,
            Err(e) => {
                let placement_error = PlacementError::from(e);
                self.record_history(
                    agent_id,
                    &target.id,
                    request.strategy,
                    DeploymentOutcome::Failed {
                        error: placement_error.to_string(),
                    },
                )
                .await?;
                metrics::counter!("gridplane_deployments_failed_total").increment(1);
                return Err(placement_error);
            }
        };

        let record = AgentDeploymentRecord {
            agent_id,
            container_id: target.id.clone(),
            agent_type: request.agent_type,
            strategy: request.strategy,
            deployed_at: Utc::now(),
        };
        self.commit_placement(&record).await?;
        self.record_history(
            agent_id,
            &target.id,
            request.strategy,
            DeploymentOutcome::Deployed { details },
        )
        .await?;

        info!(
            agent_id = %agent_id,
            container_id = %target.id,
            strategy = %request.strategy,
            "agent deployed"
        );
        metrics::counter!("gridplane_deployments_total").increment(1);
        self.publish_agent_event(AgentEvent::Deployed {
            agent_id,
            container_id: target.id.clone(),
            agent_type: record.agent_type.clone(),
            strategy: record.strategy,
            at: record.deployed_at,
        })
        .await;
        Ok(record)
    }

    /// Resolve the deployment target: the preferred container when given and
    /// eligible, otherwise whatever the strategy selects.
    async fn choose_target(
        &self,
        request: &DeploymentRequest,
    ) -> Result<ContainerRecord, PlacementError> {
        let candidates = self.eligible_candidates(request, None).await?;

        if let Some(preferred) = &request.preferred_container {
            return candidates
                .into_iter()
                .map(|c| c.record)
                .find(|r| &r.id == preferred)
                .ok_or_else(|| PlacementError::InvalidTarget(preferred.clone()));
        }

        if candidates.is_empty() {
            return Err(PlacementError::NoEligibleContainers(format!(
                "no active container satisfies constraints for agent type {}",
                request.agent_type
            )));
        }

        let index = match request.strategy {
            DeploymentStrategy::RoundRobin => {
                let cursor = self.advance_round_robin_cursor().await?;
                strategy::select(request.strategy, &request.agent_type, &candidates, cursor)
            }
            _ => strategy::select(request.strategy, &request.agent_type, &candidates, 0),
        };
        // Candidates are non-empty, so selection cannot come back empty.
        let index = index.ok_or_else(|| {
            PlacementError::NoEligibleContainers("strategy returned no selection".into())
        })?;
        Ok(candidates[index].record.clone())
    }

    /// Active containers satisfying the request's constraints, annotated
    /// with their current agent load. `exclude` drops one container from
    /// consideration (the migration source or a failed container).
    async fn eligible_candidates(
        &self,
        request: &DeploymentRequest,
        exclude: Option<&ContainerId>,
    ) -> Result<Vec<CandidateLoad>, PlacementError> {
        let records = self.registry.list_containers().await?;
        let deployments = self.deployments.read();
        let mut candidates = Vec::new();
        for record in records {
            if !record.is_active() {
                continue;
            }
            if !record.has_capability(Capability::AgentRunner) {
                continue;
            }
            if exclude == Some(&record.id) {
                continue;
            }
            if !request.constraints.satisfied_by(&record) {
                continue;
            }
            let agent_count = deployments
                .values()
                .filter(|d| d.container_id == record.id)
                .count();
            let same_type_count = deployments
                .values()
                .filter(|d| d.container_id == record.id && d.agent_type == request.agent_type)
                .count();
            candidates.push(CandidateLoad {
                record,
                agent_count,
                same_type_count,
            });
        }
        // A stable order keeps the round-robin cursor meaningful.
        candidates.sort_by(|a, b| a.record.id.cmp(&b.record.id));
        Ok(candidates)
    }

    /// Increment and persist the shared round-robin cursor, returning the
    /// pre-increment value.
    async fn advance_round_robin_cursor(&self) -> Result<u64, PlacementError> {
        let cursor = match self.store.get(ROUND_ROBIN_CURSOR).await? {
            Some(value) => value.as_u64().unwrap_or(0),
            None => 0,
        };
        self.store
            .put(
                ROUND_ROBIN_CURSOR,
                Value::from(cursor.wrapping_add(1)),
                None,
            )
            .await?;
        Ok(cursor)
    }

    // ---- migration -----------------------------------------------------

    /// Move a running agent to another container.
    ///
    /// Order of operations: capture state, deploy to the target, stop on the
    /// source, commit the map. A failed target deploy leaves the agent where
    /// it was. A failed source stop after a successful target deploy rolls
    /// the target deploy back; if that rollback also fails the agent is
    /// removed from the map entirely and the error says so.
    pub async fn migrate_agent(
        &self,
        request: MigrationRequest,
    ) -> Result<MigrationReport, PlacementError> {
        let _guard = self.migrate_lock.lock().await;

        let current = self
            .get_deployment(&request.agent_id)
            .ok_or(PlacementError::AgentNotFound(request.agent_id))?;
        let source = self
            .registry
            .get_container(&current.container_id)
            .await?
            .ok_or_else(|| RegistryError::ContainerNotFound(current.container_id.clone()))?;

        let target = self
            .resolve_migration_target(&current, request.target_container_id.as_ref())
            .await?;
        if target.id == current.container_id {
            return Err(PlacementError::InvalidTarget(target.id));
        }
        let target_endpoint = self.require_endpoint(&target)?;

        // State capture is best-effort; an unreachable source must not block
        // evacuation during a container failure.
        let agent_state = if request.preserve_state {
            match source.api_endpoint.as_deref() {
                Some(endpoint) => match self.api.fetch_state(endpoint, current.agent_id).await {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(agent_id = %current.agent_id, "state capture failed: {}", e);
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };
        let state_preserved = agent_state.is_some();

        let spec = DeploySpec {
            agent_id: current.agent_id,
            agent_type: current.agent_type.clone(),
            agent_config: Value::Null,
            resource_requirements: Value::Null,
            deployment_timestamp: Utc::now(),
            migration: true,
            previous_container: Some(current.container_id.clone()),
            agent_state,
        };
        self.api.deploy_agent(&target_endpoint, &spec).await?;

        // Stop on the source only after the target copy is running.
        let stop_result = match source.api_endpoint.as_deref() {
            Some(endpoint) => self.api.stop_agent(endpoint, current.agent_id).await,
            // No endpoint means nothing to stop; failure recovery hits this.
            None => Ok(()),
        };
        if let Err(stop_error) = stop_result {
            warn!(
                agent_id = %current.agent_id,
                "source stop failed after target deploy, rolling back: {}",
                stop_error
            );
            if let Err(rollback_error) =
                self.api.stop_agent(&target_endpoint, current.agent_id).await
            {
                // Both copies are in an unknown state; drop the placement so
                // the agent cannot be double-counted.
                error!(
                    agent_id = %current.agent_id,
                    "rollback failed, marking agent unplaced: {}",
                    rollback_error
                );
                self.remove_placement(&current.agent_id).await?;
                return Err(PlacementError::RollbackFailed {
                    agent_id: current.agent_id,
                    original: current.container_id.clone(),
                    error: stop_error.to_string(),
                    rollback_error: rollback_error.to_string(),
                });
            }
            return Err(stop_error.into());
        }

        let record = AgentDeploymentRecord {
            agent_id: current.agent_id,
            container_id: target.id.clone(),
            agent_type: current.agent_type.clone(),
            strategy: current.strategy,
            deployed_at: Utc::now(),
        };
        self.commit_placement(&record).await?;
        self.record_history(
            current.agent_id,
            &target.id,
            current.strategy,
            DeploymentOutcome::Migrated {
                from: current.container_id.clone(),
            },
        )
        .await?;

        info!(
            agent_id = %current.agent_id,
            from = %current.container_id,
            to = %target.id,
            reason = %request.reason,
            "agent migrated"
        );
        metrics::counter!("gridplane_migrations_total").increment(1);
        self.publish_agent_event(AgentEvent::Migrated {
            agent_id: current.agent_id,
            from: current.container_id.clone(),
            to: target.id.clone(),
            reason: request.reason,
            at: Utc::now(),
        })
        .await;
        Ok(MigrationReport {
            agent_id: current.agent_id,
            from: current.container_id,
            to: target.id,
            reason: request.reason,
            state_preserved,
        })
    }

    async fn resolve_migration_target(
        &self,
        current: &AgentDeploymentRecord,
        explicit: Option<&ContainerId>,
    ) -> Result<ContainerRecord, PlacementError> {
        if let Some(id) = explicit {
            let record = self
                .registry
                .get_container(id)
                .await?
                .ok_or_else(|| PlacementError::InvalidTarget(id.clone()))?;
            if !record.is_active() {
                return Err(PlacementError::InvalidTarget(id.clone()));
            }
            return Ok(record);
        }

        let request = DeploymentRequest {
            agent_type: current.agent_type.clone(),
            agent_config: Value::Null,
            resource_requirements: Value::Null,
            preferred_container: None,
            strategy: DeploymentStrategy::LeastLoaded,
            constraints: Default::default(),
        };
        let candidates = self
            .eligible_candidates(&request, Some(&current.container_id))
            .await?;
        let index = strategy::select(
            DeploymentStrategy::LeastLoaded,
            &current.agent_type,
            &candidates,
            0,
        )
        .ok_or_else(|| {
            PlacementError::NoEligibleContainers("no migration target available".into())
        })?;
        Ok(candidates[index].record.clone())
    }

    // ---- failure handling ----------------------------------------------

    /// Evacuate every agent placed on a failed container. Migration skips
    /// the source stop (the container is gone) and proceeds per agent; one
    /// agent's failure never blocks the rest.
    pub async fn handle_container_failure(
        &self,
        container_id: &ContainerId,
    ) -> Result<Vec<FailureOutcome>, PlacementError> {
        let stranded = self.agents_on(container_id);
        if stranded.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            container_id = %container_id,
            agents = stranded.len(),
            "recovering agents from failed container"
        );

        let mut outcomes = Vec::with_capacity(stranded.len());
        for deployment in stranded {
            let result = self.evacuate_agent(&deployment, container_id).await;
            match &result {
                Ok(new_container) => {
                    info!(
                        agent_id = %deployment.agent_id,
                        to = %new_container,
                        "agent recovered"
                    );
                }
                Err(e) => {
                    error!(agent_id = %deployment.agent_id, "agent recovery failed: {}", e);
                    metrics::counter!("gridplane_recovery_failures_total").increment(1);
                }
            }
            outcomes.push(FailureOutcome {
                agent_id: deployment.agent_id,
                result: result.map_err(|e| e.to_string()),
            });
        }
        self.publish_container_event(ContainerEvent::Failed {
            container_id: container_id.clone(),
            outcomes: outcomes.clone(),
            at: Utc::now(),
        })
        .await;
        Ok(outcomes)
    }

    /// Redeploy one agent off a dead container. State is unrecoverable, so
    /// this is a fresh deploy rather than a migration through the API.
    async fn evacuate_agent(
        &self,
        deployment: &AgentDeploymentRecord,
        failed: &ContainerId,
    ) -> Result<ContainerId, PlacementError> {
        let request = DeploymentRequest {
            agent_type: deployment.agent_type.clone(),
            agent_config: Value::Null,
            resource_requirements: Value::Null,
            preferred_container: None,
            strategy: DeploymentStrategy::LeastLoaded,
            constraints: Default::default(),
        };
        let candidates = self.eligible_candidates(&request, Some(failed)).await?;
        let index = strategy::select(
            DeploymentStrategy::LeastLoaded,
            &deployment.agent_type,
            &candidates,
            0,
        )
        .ok_or_else(|| {
            PlacementError::NoEligibleContainers("no recovery target available".into())
        })?;
        let target = candidates[index].record.clone();
        let endpoint = self.require_endpoint(&target)?;

        let spec = DeploySpec {
            agent_id: deployment.agent_id,
            agent_type: deployment.agent_type.clone(),
            agent_config: Value::Null,
            resource_requirements: Value::Null,
            deployment_timestamp: Utc::now(),
            migration: true,
            previous_container: Some(failed.clone()),
            agent_state: None,
        };
        if let Err(e) = self.api.deploy_agent(&endpoint, &spec).await {
            // Unrecoverable placements are dropped so the map never points
            // at the dead container.
            self.remove_placement(&deployment.agent_id).await?;
            return Err(e.into());
        }

        let record = AgentDeploymentRecord {
            agent_id: deployment.agent_id,
            container_id: target.id.clone(),
            agent_type: deployment.agent_type.clone(),
            strategy: deployment.strategy,
            deployed_at: Utc::now(),
        };
        self.commit_placement(&record).await?;
        self.record_history(
            deployment.agent_id,
            &target.id,
            deployment.strategy,
            DeploymentOutcome::Migrated {
                from: failed.clone(),
            },
        )
        .await?;
        Ok(target.id)
    }

    // ---- rebalancing ---------------------------------------------------

    /// Move agents off containers carrying notably more than the cluster
    /// mean. Returns the successful migrations; individual failures are
    /// logged and skipped.
    pub async fn rebalance_agents(&self) -> Result<Vec<MigrationReport>, PlacementError> {
        let containers = self.registry.list_containers().await?;
        let active: Vec<_> = containers.into_iter().filter(|c| c.is_active()).collect();
        if active.len() < 2 {
            return Ok(Vec::new());
        }

        let counts: HashMap<ContainerId, usize> = active
            .iter()
            .map(|c| (c.id.clone(), self.agents_on(&c.id).len()))
            .collect();
        let total: usize = counts.values().sum();
        let mean = total as f64 / active.len() as f64;

        let mut moves = Vec::new();
        for container in &active {
            let count = counts[&container.id];
            // Only containers above mean + 1 shed agents, and only down to
            // the mean; a balanced cluster is a no-op.
            if (count as f64) <= mean + REBALANCE_THRESHOLD {
                continue;
            }
            let mut excess = (count as f64 - mean).floor() as i64;
            debug!(
                container_id = %container.id,
                count,
                mean,
                "container over rebalance threshold"
            );
            for deployment in self.agents_on(&container.id) {
                if excess <= 0 {
                    break;
                }
                let request = MigrationRequest {
                    agent_id: deployment.agent_id,
                    target_container_id: None,
                    reason: MigrationReason::Rebalancing,
                    preserve_state: true,
                };
                match self.migrate_agent(request).await {
                    Ok(report) => {
                        moves.push(report);
                        excess -= 1;
                    }
                    Err(e) => {
                        warn!(agent_id = %deployment.agent_id, "rebalance move failed: {}", e);
                    }
                }
            }
        }
        if !moves.is_empty() {
            info!(moves = moves.len(), "rebalance complete");
        }
        Ok(moves)
    }

    // ---- stop ----------------------------------------------------------

    /// Stop an agent and forget its placement.
    pub async fn stop_agent(&self, agent_id: &AgentId) -> Result<(), PlacementError> {
        let deployment = self
            .get_deployment(agent_id)
            .ok_or(PlacementError::AgentNotFound(*agent_id))?;
        if let Some(container) = self.registry.get_container(&deployment.container_id).await? {
            if let Some(endpoint) = container.api_endpoint.as_deref() {
                self.api.stop_agent(endpoint, *agent_id).await?;
            }
        }
        self.remove_placement(agent_id).await?;
        info!(agent_id = %agent_id, "agent stopped");
        self.publish_agent_event(AgentEvent::Stopped {
            agent_id: *agent_id,
            container_id: deployment.container_id,
            at: Utc::now(),
        })
        .await;
        Ok(())
    }

    // ---- events --------------------------------------------------------

    /// Bus failures are logged, never escalated; placement already committed.
    async fn publish_agent_event(&self, event: AgentEvent) {
        match serde_json::to_value(&event) {
            Ok(payload) => {
                if let Err(e) = self.hub.send_event(None, payload).await {
                    warn!("failed to publish agent event: {}", e);
                }
            }
            Err(e) => warn!("failed to serialize agent event: {}", e),
        }
    }

    async fn publish_container_event(&self, event: ContainerEvent) {
        match serde_json::to_value(&event) {
            Ok(payload) => {
                if let Err(e) = self.hub.send_event(None, payload).await {
                    warn!("failed to publish container event: {}", e);
                }
            }
            Err(e) => warn!("failed to serialize container event: {}", e),
        }
    }

    // ---- persistence ---------------------------------------------------

    fn require_endpoint(&self, record: &ContainerRecord) -> Result<String, PlacementError> {
        record
            .api_endpoint
            .clone()
            .ok_or_else(|| PlacementError::InvalidTarget(record.id.clone()))
    }

    async fn commit_placement(
        &self,
        record: &AgentDeploymentRecord,
    ) -> Result<(), PlacementError> {
        self.store
            .hash_put(DEPLOYMENTS, &record.agent_id.to_string(), encode(record)?)
            .await?;
        self.deployments
            .write()
            .insert(record.agent_id, record.clone());
        metrics::gauge!("gridplane_agents_placed").set(self.agent_count() as f64);
        Ok(())
    }

    async fn remove_placement(&self, agent_id: &AgentId) -> Result<(), PlacementError> {
        self.store
            .hash_delete(DEPLOYMENTS, &agent_id.to_string())
            .await?;
        self.deployments.write().remove(agent_id);
        metrics::gauge!("gridplane_agents_placed").set(self.agent_count() as f64);
        Ok(())
    }

    async fn record_history(
        &self,
        agent_id: AgentId,
        container_id: &ContainerId,
        strategy: DeploymentStrategy,
        outcome: DeploymentOutcome,
    ) -> Result<(), PlacementError> {
        let entry = DeploymentHistoryEntry {
            agent_id,
            container_id: container_id.clone(),
            timestamp: Utc::now(),
            strategy,
            outcome,
        };
        let field = format!("{}:{}", entry.timestamp.timestamp_millis(), agent_id);
        self.store.hash_put(HISTORY, &field, encode(&entry)?).await?;
        Ok(())
    }
}
