// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Outbound contract every workload container implements:
//! `POST /agents/deploy`, `POST /agents/{id}/stop`, `GET /agents/{id}/state`,
//! plus an arbitrary-path proxy facade. Defined here as a trait so placement
//! logic never touches HTTP directly and tests can substitute fakes.

use crate::domain::agent::AgentId;
use crate::domain::container::ContainerId;
use crate::domain::error::ApiError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Body of `POST /agents/deploy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySpec {
    pub agent_id: AgentId,
    pub agent_type: String,
    pub agent_config: Value,
    pub resource_requirements: Value,
    pub deployment_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub migration: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_container: Option<ContainerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_state: Option<Value>,
}

/// Normalized result of a proxied HTTP call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub status: u16,
    pub data: Value,
    pub headers: BTreeMap<String, String>,
}

#[async_trait]
pub trait ContainerApi: Send + Sync {
    /// Deploy an agent onto the container behind `endpoint`. Returns the
    /// container's reported deployment details.
    async fn deploy_agent(&self, endpoint: &str, spec: &DeploySpec) -> Result<Value, ApiError>;

    async fn stop_agent(&self, endpoint: &str, agent_id: AgentId) -> Result<(), ApiError>;

    /// Fetch serialized agent state; `None` when the container reports 404.
    async fn fetch_state(&self, endpoint: &str, agent_id: AgentId)
        -> Result<Option<Value>, ApiError>;

    /// Short-timeout liveness probe against the container's API.
    async fn health(&self, endpoint: &str) -> Result<bool, ApiError>;

    /// Forward an HTTP-style call and normalize the result.
    async fn proxy(
        &self,
        endpoint: &str,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<ProxyResponse, ApiError>;
}
