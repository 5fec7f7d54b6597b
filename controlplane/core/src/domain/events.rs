// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::agent::{AgentId, DeploymentStrategy, FailureOutcome, MigrationReason};
use crate::domain::container::{Capability, ContainerId, ContainerStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Container lifecycle events published on the hub's event channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerEvent {
    Discovered {
        container_id: ContainerId,
        name: String,
        capabilities: BTreeSet<Capability>,
        at: DateTime<Utc>,
    },
    Removed {
        container_id: ContainerId,
        at: DateTime<Utc>,
    },
    Registered {
        container_id: ContainerId,
        name: String,
        at: DateTime<Utc>,
    },
    Updated {
        container_id: ContainerId,
        at: DateTime<Utc>,
    },
    Deregistered {
        container_id: ContainerId,
        reason: String,
        at: DateTime<Utc>,
    },
    HealthChanged {
        container_id: ContainerId,
        health_score: u8,
        status: ContainerStatus,
        at: DateTime<Utc>,
    },
    Failed {
        container_id: ContainerId,
        outcomes: Vec<FailureOutcome>,
        at: DateTime<Utc>,
    },
}

/// Agent placement events published on the hub's event channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Deployed {
        agent_id: AgentId,
        container_id: ContainerId,
        agent_type: String,
        strategy: DeploymentStrategy,
        at: DateTime<Utc>,
    },
    Migrated {
        agent_id: AgentId,
        from: ContainerId,
        to: ContainerId,
        reason: MigrationReason,
        at: DateTime<Utc>,
    },
    Stopped {
        agent_id: AgentId,
        container_id: ContainerId,
        at: DateTime<Utc>,
    },
}
