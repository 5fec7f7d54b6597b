// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod discovery;
pub mod hub;
pub mod manager;
pub mod registry;
pub mod strategy;
