// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures: in-memory fakes for the container engine and the
//! container API, plus record factories and service wiring helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use gridplane_core::application::registry::RegistryConfig;
use gridplane_core::config::HubSettings;
use gridplane_core::domain::agent::AgentId;
use gridplane_core::domain::api::{ContainerApi, DeploySpec, ProxyResponse};
use gridplane_core::domain::container::{
    Capability, ContainerId, ContainerRecord, ContainerStatus, ResourceSnapshot,
};
use gridplane_core::domain::engine::{ContainerEngine, WorkloadDetails, WorkloadSummary};
use gridplane_core::domain::error::{ApiError, EngineError};
use gridplane_core::infrastructure::store::MemoryStore;
use gridplane_core::{CommunicationHub, ContainerRegistry};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

// ---- record factories ---------------------------------------------------

pub fn record(id: &str) -> ContainerRecord {
    let now = Utc::now();
    ContainerRecord {
        id: ContainerId::new(id),
        name: format!("worker-{id}"),
        host_address: "10.0.0.1".to_string(),
        api_endpoint: Some(format!("http://10.0.0.1:9000/{id}")),
        capabilities: BTreeSet::from([Capability::AgentRunner]),
        resources: ResourceSnapshot {
            cpu_cores: 4,
            cpu_percent: 10.0,
            memory_limit_bytes: 8 * 1024 * 1024 * 1024,
            memory_used_bytes: 1024 * 1024 * 1024,
            memory_percent: 12.5,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
        },
        status: ContainerStatus::Active,
        health_score: 100,
        registered_at: now,
        last_heartbeat: now,
    }
}

pub fn stale_record(id: &str, seconds_ago: i64) -> ContainerRecord {
    let mut r = record(id);
    r.last_heartbeat = Utc::now() - ChronoDuration::seconds(seconds_ago);
    r
}

// ---- service wiring -----------------------------------------------------

pub async fn hub_with(
    api: Arc<dyn ContainerApi>,
    encrypt: bool,
) -> (Arc<CommunicationHub>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let hub = CommunicationHub::new(
        ContainerId::new("controlplane"),
        store.clone(),
        api,
        HubSettings {
            encrypt,
            ..Default::default()
        },
    )
    .await;
    (hub, store)
}

pub async fn registry_with(
    api: Arc<dyn ContainerApi>,
    heartbeat_timeout: Duration,
) -> (Arc<ContainerRegistry>, Arc<CommunicationHub>, Arc<MemoryStore>) {
    let (hub, store) = hub_with(api, false).await;
    let registry = ContainerRegistry::new(
        store.clone(),
        hub.clone(),
        RegistryConfig {
            heartbeat_timeout,
            cleanup_interval: Duration::from_millis(50),
        },
    );
    (registry, hub, store)
}

// ---- fake container engine ----------------------------------------------

#[derive(Default)]
pub struct FakeEngineState {
    pub workloads: Vec<WorkloadSummary>,
    pub details: HashMap<ContainerId, WorkloadDetails>,
    pub resources: HashMap<ContainerId, ResourceSnapshot>,
    pub marker_present: HashSet<ContainerId>,
    /// Ids the engine pretends not to know anymore.
    pub missing: HashSet<ContainerId>,
}

#[derive(Default)]
pub struct FakeEngine {
    pub state: Mutex<FakeEngineState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_workload(&self, id: &str, labels: &[(&str, &str)]) {
        let labels: HashMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let cid = ContainerId::new(id);
        let mut state = self.state.lock();
        state.workloads.push(WorkloadSummary {
            id: cid.clone(),
            name: format!("worker-{id}"),
            labels: labels.clone(),
            running: true,
        });
        state.details.insert(
            cid.clone(),
            WorkloadDetails {
                id: cid.clone(),
                name: format!("worker-{id}"),
                host_address: "10.0.0.1".to_string(),
                labels,
                env: Vec::new(),
            },
        );
        state.resources.insert(cid, ResourceSnapshot::default());
    }

    pub fn mark_missing(&self, id: &str) {
        self.state.lock().missing.insert(ContainerId::new(id));
    }

    pub fn remove_workload(&self, id: &str) {
        let cid = ContainerId::new(id);
        self.state.lock().workloads.retain(|w| w.id != cid);
    }

    pub fn set_resources(&self, id: &str, resources: ResourceSnapshot) {
        self.state
            .lock()
            .resources
            .insert(ContainerId::new(id), resources);
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn list_workloads(&self) -> Result<Vec<WorkloadSummary>, EngineError> {
        Ok(self.state.lock().workloads.clone())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<WorkloadDetails, EngineError> {
        self.state
            .lock()
            .details
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    async fn sample_resources(&self, id: &ContainerId) -> Result<ResourceSnapshot, EngineError> {
        let state = self.state.lock();
        if state.missing.contains(id) {
            return Err(EngineError::NotFound(id.clone()));
        }
        state
            .resources
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    async fn exec_probe(&self, id: &ContainerId, _command: &[&str]) -> Result<bool, EngineError> {
        Ok(self.state.lock().marker_present.contains(id))
    }
}

// ---- fake container API -------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeployCall {
    pub endpoint: String,
    pub agent_id: AgentId,
    pub migration: bool,
}

#[derive(Default)]
pub struct FakeApiState {
    pub deploys: Vec<DeployCall>,
    pub stops: Vec<(String, AgentId)>,
    /// Endpoints whose deploy calls fail.
    pub fail_deploy: HashSet<String>,
    /// Endpoints whose stop calls fail.
    pub fail_stop: HashSet<String>,
    /// Endpoints whose liveness probes report dead.
    pub fail_health: HashSet<String>,
    /// Canned per-agent state payloads served by `fetch_state`.
    pub states: HashMap<AgentId, Value>,
}

#[derive(Default)]
pub struct FakeContainerApi {
    pub state: Mutex<FakeApiState>,
}

impl FakeContainerApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_deploy_on(&self, endpoint: &str) {
        self.state.lock().fail_deploy.insert(endpoint.to_string());
    }

    pub fn fail_stop_on(&self, endpoint: &str) {
        self.state.lock().fail_stop.insert(endpoint.to_string());
    }

    pub fn fail_health_on(&self, endpoint: &str) {
        self.state.lock().fail_health.insert(endpoint.to_string());
    }

    pub fn deploy_calls(&self) -> Vec<DeployCall> {
        self.state.lock().deploys.clone()
    }

    pub fn stop_calls(&self) -> Vec<(String, AgentId)> {
        self.state.lock().stops.clone()
    }
}

#[async_trait]
impl ContainerApi for FakeContainerApi {
    async fn deploy_agent(&self, endpoint: &str, spec: &DeploySpec) -> Result<Value, ApiError> {
        let mut state = self.state.lock();
        if state.fail_deploy.contains(endpoint) {
            return Err(ApiError::Communication(format!(
                "deploy refused by {endpoint}"
            )));
        }
        state.deploys.push(DeployCall {
            endpoint: endpoint.to_string(),
            agent_id: spec.agent_id,
            migration: spec.migration,
        });
        Ok(serde_json::json!({ "status": "deployed" }))
    }

    async fn stop_agent(&self, endpoint: &str, agent_id: AgentId) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        if state.fail_stop.contains(endpoint) {
            return Err(ApiError::Communication(format!(
                "stop refused by {endpoint}"
            )));
        }
        state.stops.push((endpoint.to_string(), agent_id));
        Ok(())
    }

    async fn fetch_state(
        &self,
        _endpoint: &str,
        agent_id: AgentId,
    ) -> Result<Option<Value>, ApiError> {
        Ok(self.state.lock().states.get(&agent_id).cloned())
    }

    async fn health(&self, endpoint: &str) -> Result<bool, ApiError> {
        Ok(!self.state.lock().fail_health.contains(endpoint))
    }

    async fn proxy(
        &self,
        _endpoint: &str,
        _method: &str,
        path: &str,
        _body: Option<Value>,
    ) -> Result<ProxyResponse, ApiError> {
        Ok(ProxyResponse {
            status: 200,
            data: serde_json::json!({ "path": path }),
            headers: BTreeMap::new(),
        })
    }
}
