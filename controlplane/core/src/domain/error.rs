// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Control-plane error taxonomy.
//!
//! Duplicate registration is deliberately absent: the registry treats it as
//! an upsert, never an error. Encryption setup failure is non-fatal and
//! downgrades the hub to plaintext.

use crate::domain::agent::AgentId;
use crate::domain::container::ContainerId;
use thiserror::Error;

/// Shared-store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Container-engine (Docker) failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("container {0} not found")]
    NotFound(ContainerId),

    #[error("container engine error: {0}")]
    Engine(String),
}

/// Failures talking to a container's HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("communication failure: {0}")]
    Communication(String),

    #[error("container API returned {code}: {body}")]
    Status { code: u16, body: String },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("container {0} is not registered")]
    ContainerNotFound(ContainerId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("engine scan failed: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("encryption setup failed: {0}")]
    EncryptionSetup(String),

    #[error("payload encryption failed: {0}")]
    Encryption(String),

    #[error("no response within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("container {0} is not registered with the hub")]
    UnknownContainer(ContainerId),

    #[error("communication failure: {0}")]
    Communication(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ApiError> for HubError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Timeout(msg) => HubError::Communication(format!("timeout: {msg}")),
            other => HubError::Communication(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no eligible container: {0}")]
    NoEligibleContainers(String),

    #[error("agent {0} has no known placement")]
    AgentNotFound(AgentId),

    #[error("container {0} is not a valid target")]
    InvalidTarget(ContainerId),

    #[error("deployment call failed: {0}")]
    Communication(String),

    #[error("deployment timed out: {0}")]
    Timeout(String),

    #[error("migration of {agent_id} failed ({error}) and rollback to {original} also failed ({rollback_error}); agent is now unplaced")]
    RollbackFailed {
        agent_id: AgentId,
        original: ContainerId,
        error: String,
        rollback_error: String,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ApiError> for PlacementError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Timeout(msg) => PlacementError::Timeout(msg),
            ApiError::Communication(msg) => PlacementError::Communication(msg),
            ApiError::Status { code, body } => {
                PlacementError::Communication(format!("status {code}: {body}"))
            }
        }
    }
}
