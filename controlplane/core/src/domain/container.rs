// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Runtime-assigned container identifier (the engine's id string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Validated capability tags a container can advertise.
///
/// A closed enum rather than free-form strings: unknown tags are rejected at
/// the serialization boundary instead of silently failing string comparisons
/// deep inside placement logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    AgentRunner,
    GpuCompute,
    HighMemory,
    Storage,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::AgentRunner,
        Capability::GpuCompute,
        Capability::HighMemory,
        Capability::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::AgentRunner => "agent-runner",
            Capability::GpuCompute => "gpu-compute",
            Capability::HighMemory => "high-memory",
            Capability::Storage => "storage",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "agent-runner" => Ok(Capability::AgentRunner),
            "gpu-compute" => Ok(Capability::GpuCompute),
            "high-memory" => Ok(Capability::HighMemory),
            "storage" => Ok(Capability::Storage),
            other => Err(format!("unknown capability tag: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Discovered,
    Registering,
    Active,
    Unhealthy,
    Disconnected,
    Terminated,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Discovered => "discovered",
            ContainerStatus::Registering => "registering",
            ContainerStatus::Active => "active",
            ContainerStatus::Unhealthy => "unhealthy",
            ContainerStatus::Disconnected => "disconnected",
            ContainerStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Point-in-time resource usage captured from the container engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceSnapshot {
    pub cpu_cores: u32,
    pub cpu_percent: f64,
    pub memory_limit_bytes: u64,
    pub memory_used_bytes: u64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

impl ResourceSnapshot {
    /// Free memory in bytes, saturating at zero when usage exceeds the limit.
    pub fn free_memory_bytes(&self) -> u64 {
        self.memory_limit_bytes.saturating_sub(self.memory_used_bytes)
    }

    /// Unused CPU share, clamped to `[0, 100]`.
    pub fn free_cpu_percent(&self) -> f64 {
        (100.0 - self.cpu_percent).clamp(0.0, 100.0)
    }
}

/// Canonical container record, owned by the registry.
///
/// Mutated by discovery (initial probe) and by the registry (heartbeats and
/// updates); archived rather than hard-deleted on deregistration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub name: String,
    pub host_address: String,
    pub api_endpoint: Option<String>,
    pub capabilities: BTreeSet<Capability>,
    pub resources: ResourceSnapshot,
    pub status: ContainerStatus,
    /// 0–100, derived by the discovery health loop or supplied by heartbeats.
    pub health_score: u8,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl ContainerRecord {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_active(&self) -> bool {
        self.status == ContainerStatus::Active
    }
}

/// A deregistered container, retained for audit instead of hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedContainer {
    pub record: ContainerRecord,
    pub deregistered_at: DateTime<Utc>,
    pub reason: String,
}

/// Aggregated view of the cluster, computed by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterStatus {
    pub total_containers: usize,
    pub active_containers: usize,
    pub inactive_containers: usize,
    /// Summed over active containers only.
    pub total_cpu_cores: u32,
    pub total_memory_bytes: u64,
    pub used_memory_bytes: u64,
    pub capability_distribution: BTreeMap<Capability, usize>,
}

/// Inbound registration payload from a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub container_name: String,
    pub host_address: String,
    pub api_port: Option<u16>,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub resources: ResourceSnapshot,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Inbound heartbeat payload from a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub container_id: ContainerId,
    /// 0–100; values above 100 are clamped on receipt.
    pub health_score: Option<u8>,
    pub resources: Option<ResourceSnapshot>,
    #[serde(default)]
    pub active_agents: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_round_trips_through_kebab_case() {
        for cap in Capability::ALL {
            let json = serde_json::to_string(&cap).unwrap();
            assert_eq!(json, format!("\"{}\"", cap.as_str()));
            let parsed: Capability = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, cap);
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
    }

    #[test]
    fn unknown_capability_is_rejected() {
        assert!("quantum-annealer".parse::<Capability>().is_err());
        assert!(serde_json::from_str::<Capability>("\"quantum-annealer\"").is_err());
    }

    #[test]
    fn free_resources_saturate() {
        let snapshot = ResourceSnapshot {
            cpu_percent: 130.0,
            memory_limit_bytes: 100,
            memory_used_bytes: 150,
            ..Default::default()
        };
        assert_eq!(snapshot.free_memory_bytes(), 0);
        assert_eq!(snapshot.free_cpu_percent(), 0.0);
    }
}
