// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! `SharedStore` implementations: sled for production, an in-memory store
//! for development and tests.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use crate::domain::store::SharedStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically purge expired keys. Lazy expiry on read already hides stale
/// entries; the sweep reclaims the space.
pub fn spawn_ttl_sweeper(
    store: Arc<dyn SharedStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(purged = n, "TTL sweep removed expired keys"),
                        Err(e) => tracing::warn!("TTL sweep failed: {}", e),
                    }
                }
            }
        }
        tracing::debug!("TTL sweeper stopped");
    })
}
