// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod cluster;
pub mod config;
pub mod run;

pub use config::ConfigCommand;

use anyhow::{Context, Result};
use gridplane_core::config::GridplaneConfig;
use gridplane_core::domain::store::SharedStore;
use gridplane_core::infrastructure::store::SledStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Load configuration the same way the daemon does.
pub fn load_config(cli_path: Option<PathBuf>) -> Result<GridplaneConfig> {
    GridplaneConfig::load_or_default(cli_path)
}

/// Open the embedded store for offline inspection. Fails while the control
/// plane is running; sled holds an exclusive lock on the data directory.
pub fn open_store(config: &GridplaneConfig) -> Result<Arc<dyn SharedStore>> {
    let store = SledStore::open(&config.data_dir).with_context(|| {
        format!(
            "cannot open store at {:?} (is the control plane running?)",
            config.data_dir
        )
    })?;
    Ok(Arc::new(store))
}
