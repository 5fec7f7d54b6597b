// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod docker;
pub mod http;
pub mod store;
