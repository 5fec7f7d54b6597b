// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod api;
pub mod container;
pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod store;

pub use agent::*;
pub use api::{ContainerApi, DeploySpec, ProxyResponse};
pub use container::*;
pub use engine::{ContainerEngine, WorkloadDetails, WorkloadSummary};
pub use error::*;
pub use events::*;
pub use message::*;
pub use store::SharedStore;
