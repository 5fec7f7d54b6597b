// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::container::{Capability, ContainerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a deployed agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Placement algorithm selecting a target container for a new agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    RoundRobin,
    #[default]
    LeastLoaded,
    ResourceBased,
    CapabilityBased,
    AffinityBased,
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStrategy::RoundRobin => "round_robin",
            DeploymentStrategy::LeastLoaded => "least_loaded",
            DeploymentStrategy::ResourceBased => "resource_based",
            DeploymentStrategy::CapabilityBased => "capability_based",
            DeploymentStrategy::AffinityBased => "affinity_based",
        };
        f.write_str(s)
    }
}

/// Hard placement constraints applied before any strategy runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeploymentConstraints {
    /// Minimum free memory on the target, in bytes.
    pub min_memory_bytes: Option<u64>,
    /// Minimum free CPU share on the target, in percent.
    pub min_cpu_percent: Option<f64>,
    #[serde(default)]
    pub required_capabilities: BTreeSet<Capability>,
}

impl DeploymentConstraints {
    pub fn satisfied_by(&self, record: &crate::domain::container::ContainerRecord) -> bool {
        if let Some(min_memory) = self.min_memory_bytes {
            if record.resources.free_memory_bytes() < min_memory {
                return false;
            }
        }
        if let Some(min_cpu) = self.min_cpu_percent {
            if record.resources.free_cpu_percent() < min_cpu {
                return false;
            }
        }
        self.required_capabilities
            .iter()
            .all(|cap| record.has_capability(*cap))
    }
}

/// Request to place a new agent on the best available container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub agent_type: String,
    #[serde(default)]
    pub agent_config: serde_json::Value,
    #[serde(default)]
    pub resource_requirements: serde_json::Value,
    pub preferred_container: Option<ContainerId>,
    #[serde(default)]
    pub strategy: DeploymentStrategy,
    #[serde(default)]
    pub constraints: DeploymentConstraints,
}

/// Why a migration was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationReason {
    Manual,
    Rebalancing,
    ContainerFailure,
}

impl fmt::Display for MigrationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationReason::Manual => "manual",
            MigrationReason::Rebalancing => "rebalancing",
            MigrationReason::ContainerFailure => "container_failure",
        };
        f.write_str(s)
    }
}

/// Request to move a running agent to a different container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub agent_id: AgentId,
    /// Explicit target, or `None` to auto-select via least-loaded.
    pub target_container_id: Option<ContainerId>,
    pub reason: MigrationReason,
    pub preserve_state: bool,
}

/// Live placement of an agent: exactly one container at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDeploymentRecord {
    pub agent_id: AgentId,
    pub container_id: ContainerId,
    pub agent_type: String,
    pub strategy: DeploymentStrategy,
    pub deployed_at: DateTime<Utc>,
}

/// Terminal state of one history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeploymentOutcome {
    Deployed {
        /// Response body returned by the container's deploy endpoint.
        #[serde(default)]
        details: serde_json::Value,
    },
    Migrated { from: ContainerId },
    Failed { error: String },
}

/// Append-only log entry for deploys and migrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistoryEntry {
    pub agent_id: AgentId,
    pub container_id: ContainerId,
    pub timestamp: DateTime<Utc>,
    pub strategy: DeploymentStrategy,
    pub outcome: DeploymentOutcome,
}

/// Result of a successful migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub agent_id: AgentId,
    pub from: ContainerId,
    pub to: ContainerId,
    pub reason: MigrationReason,
    pub state_preserved: bool,
}

/// Per-agent outcome of a container-failure recovery sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureOutcome {
    pub agent_id: AgentId,
    /// New container on success, error description on failure.
    pub result: Result<ContainerId, String>,
}
