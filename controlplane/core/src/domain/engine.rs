// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::container::{ContainerId, ResourceSnapshot};
use crate::domain::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;

/// One running workload as seen by a fleet scan.
#[derive(Debug, Clone)]
pub struct WorkloadSummary {
    pub id: ContainerId,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub running: bool,
}

/// Detail view of a single workload.
#[derive(Debug, Clone)]
pub struct WorkloadDetails {
    pub id: ContainerId,
    pub name: String,
    pub host_address: String,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
}

/// Seam to the container runtime (Docker in production, fakes in tests).
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn list_workloads(&self) -> Result<Vec<WorkloadSummary>, EngineError>;

    async fn inspect(&self, id: &ContainerId) -> Result<WorkloadDetails, EngineError>;

    /// One-shot resource sample; cpu% is derived from a usage-delta over
    /// time-delta ratio.
    async fn sample_resources(&self, id: &ContainerId) -> Result<ResourceSnapshot, EngineError>;

    /// Run a probe command inside the workload; `Ok(true)` means exit code 0.
    async fn exec_probe(&self, id: &ContainerId, command: &[&str]) -> Result<bool, EngineError>;
}
