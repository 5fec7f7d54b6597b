// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::error::StoreError;
use crate::domain::store::SharedStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// In-memory `SharedStore` with the same TTL semantics as the sled store.
#[derive(Default)]
pub struct MemoryStore {
    kv: DashMap<String, Entry>,
    hashes: DashMap<String, HashMap<String, Value>>,
    sets: DashMap<String, BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expiry(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|d| chrono::TimeDelta::from_std(d).ok())
        .map(|delta| Utc::now() + delta)
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        if let Some(entry) = self.kv.get(key) {
            if entry.expired() {
                drop(entry);
                self.kv.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.kv.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: expiry(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.kv.remove(key).is_some())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hash_put(&self, key: &str, field: &str, value: Value) -> Result<(), StoreError> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        Ok(self
            .hashes
            .get_mut(key)
            .map(|mut h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn hash_entries(&self, key: &str) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self
            .sets
            .get_mut(key)
            .map(|mut s| s.remove(member))
            .unwrap_or(false))
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.sets.get(key).map(|s| s.clone()).unwrap_or_default())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        current: Option<Value>,
        new: Option<Value>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        // The entry lock makes the read-compare-write atomic.
        let entry = self.kv.entry(key.to_string());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(mut occ) => {
                let stored = if occ.get().expired() {
                    None
                } else {
                    Some(occ.get().value.clone())
                };
                if stored != current {
                    return Ok(false);
                }
                match new {
                    Some(value) => {
                        occ.insert(Entry {
                            value,
                            expires_at: expiry(ttl),
                        });
                    }
                    None => {
                        occ.remove();
                    }
                }
                Ok(true)
            }
            dashmap::mapref::entry::Entry::Vacant(vac) => {
                if current.is_some() {
                    return Ok(false);
                }
                if let Some(value) = new {
                    vac.insert(Entry {
                        value,
                        expires_at: expiry(ttl),
                    });
                }
                Ok(true)
            }
        }
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let before = self.kv.len();
        self.kv.retain(|_, entry| !entry.expired());
        Ok(before - self.kv.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_ttl_expiry_hides_entry() {
        let store = MemoryStore::new();
        store
            .put("k", json!(1), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();

        // Set-if-absent.
        assert!(store
            .compare_and_swap("lease", None, Some(json!("a")), None)
            .await
            .unwrap());
        // Second claim fails.
        assert!(!store
            .compare_and_swap("lease", None, Some(json!("b")), None)
            .await
            .unwrap());
        // Swap with correct witness succeeds.
        assert!(store
            .compare_and_swap("lease", Some(json!("a")), Some(json!("b")), None)
            .await
            .unwrap());
        assert_eq!(store.get("lease").await.unwrap(), Some(json!("b")));
        // Delete via CAS.
        assert!(store
            .compare_and_swap("lease", Some(json!("b")), None, None)
            .await
            .unwrap());
        assert_eq!(store.get("lease").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hash_and_set_ops() {
        let store = MemoryStore::new();
        store.hash_put("h", "a", json!(1)).await.unwrap();
        store.hash_put("h", "b", json!(2)).await.unwrap();
        assert_eq!(store.hash_get("h", "a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.hash_entries("h").await.unwrap().len(), 2);
        assert!(store.hash_delete("h", "a").await.unwrap());
        assert!(!store.hash_delete("h", "a").await.unwrap());

        assert!(store.set_add("s", "x").await.unwrap());
        assert!(!store.set_add("s", "x").await.unwrap());
        assert!(store.set_members("s").await.unwrap().contains("x"));
        assert!(store.set_remove("s", "x").await.unwrap());
        assert!(store.set_members("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired_counts() {
        let store = MemoryStore::new();
        store
            .put("a", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.put("b", json!(2), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.get("b").await.unwrap(), Some(json!(2)));
    }
}
