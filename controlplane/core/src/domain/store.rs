// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Shared Store Contract
//!
//! The shared key/hash/set store with TTL is the single source of truth for
//! container records, capability indices, the agent placement map, message
//! TTL copies, and response slots. The contract is defined here in the
//! domain layer and implemented in `crate::infrastructure::store`:
//!
//! | Implementation | Use |
//! |----------------|-----|
//! | `SledStore` | production (embedded, durable) |
//! | `MemoryStore` | tests and development |
//!
//! All writes are last-writer-wins; `compare_and_swap` is the single
//! primitive offering stronger semantics, used for the control-plane
//! instance lease.

use crate::domain::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a key, honoring expiry: an expired entry reads as absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a key, optionally bounded by a TTL.
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Delete a key. Returns whether it was present.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Value>, StoreError>;

    async fn hash_put(&self, key: &str, field: &str, value: Value) -> Result<(), StoreError>;

    /// Delete a hash field. Returns whether it was present.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    async fn hash_entries(&self, key: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Add a member to a set. Returns whether it was newly added.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove a member from a set. Returns whether it was present.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, StoreError>;

    /// Atomically replace `current` with `new` (either side may be absent).
    /// Returns `false` without writing when the stored value does not match
    /// `current`.
    async fn compare_and_swap(
        &self,
        key: &str,
        current: Option<Value>,
        new: Option<Value>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Drop expired keys eagerly. Returns the number purged.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}
