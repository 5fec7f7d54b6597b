// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Gridplane Core
//!
//! Control-plane primitives for placing and keeping AI-worker agents running
//! across a churning fleet of compute containers.
//!
//! # Architecture
//!
//! - **`domain`**: value types, events, error taxonomy, and the trait seams
//!   (`SharedStore`, `ContainerEngine`, `ContainerApi`) the rest of the
//!   system is built against.
//! - **`application`**: the four services: [`ContainerDiscovery`],
//!   [`ContainerRegistry`], [`CommunicationHub`], and
//!   [`DistributedAgentManager`].
//! - **`infrastructure`**: concrete adapters: sled/in-memory stores, the
//!   bollard Docker engine, and the reqwest container API client.
//!
//! Services are explicit objects constructed by the process bootstrapper and
//! passed by `Arc`; there are no module-level singletons, so tests can run
//! multiple isolated control planes in one process.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::discovery::ContainerDiscovery;
pub use application::hub::CommunicationHub;
pub use application::manager::DistributedAgentManager;
pub use application::registry::ContainerRegistry;
pub use domain::*;
