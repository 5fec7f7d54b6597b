// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::error::StoreError;
use crate::domain::store::SharedStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Separator between hash key and field (and set key and member) in the
/// composite tree keys. Must not occur in key names.
const SEP: u8 = 0x1f;

/// Value envelope stored in the kv tree; TTL lives inside the value.
#[derive(Debug, Serialize, Deserialize)]
struct Stored {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Stored {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Durable `SharedStore` over an embedded sled database.
///
/// Expiry is lazy on read plus a periodic sweep
/// (`crate::infrastructure::store::spawn_ttl_sweeper`).
pub struct SledStore {
    kv: sled::Tree,
    hash: sled::Tree,
    set: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            kv: db.open_tree("kv")?,
            hash: db.open_tree("hash")?,
            set: db.open_tree("set")?,
        })
    }

    fn composite(key: &str, field: &str) -> Vec<u8> {
        let mut k = Vec::with_capacity(key.len() + 1 + field.len());
        k.extend_from_slice(key.as_bytes());
        k.push(SEP);
        k.extend_from_slice(field.as_bytes());
        k
    }

    fn prefix(key: &str) -> Vec<u8> {
        let mut p = Vec::with_capacity(key.len() + 1);
        p.extend_from_slice(key.as_bytes());
        p.push(SEP);
        p
    }

    fn encode(value: Value, ttl: Option<Duration>) -> Result<Vec<u8>, StoreError> {
        let expires_at = ttl
            .and_then(|d| chrono::TimeDelta::from_std(d).ok())
            .map(|delta| Utc::now() + delta);
        Ok(serde_json::to_vec(&Stored { value, expires_at })?)
    }

    /// Read the live value at `key`, removing it when expired.
    fn read_live(&self, key: &str) -> Result<Option<(sled::IVec, Stored)>, StoreError> {
        match self.kv.get(key.as_bytes())? {
            None => Ok(None),
            Some(bytes) => {
                let stored: Stored = serde_json::from_slice(&bytes)?;
                if stored.expired() {
                    self.kv.remove(key.as_bytes())?;
                    Ok(None)
                } else {
                    Ok(Some((bytes, stored)))
                }
            }
        }
    }
}

#[async_trait]
impl SharedStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_live(key)?.map(|(_, stored)| stored.value))
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.kv.insert(key.as_bytes(), Self::encode(value, ttl)?)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.kv.remove(key.as_bytes())?.is_some())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Value>, StoreError> {
        match self.hash.get(Self::composite(key, field))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }

    async fn hash_put(&self, key: &str, field: &str, value: Value) -> Result<(), StoreError> {
        self.hash
            .insert(Self::composite(key, field), serde_json::to_vec(&value)?)?;
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        Ok(self.hash.remove(Self::composite(key, field))?.is_some())
    }

    async fn hash_entries(&self, key: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let prefix = Self::prefix(key);
        let mut entries = Vec::new();
        for item in self.hash.scan_prefix(&prefix) {
            let (k, v) = item?;
            let field = String::from_utf8_lossy(&k[prefix.len()..]).into_owned();
            entries.push((field, serde_json::from_slice(&v)?));
        }
        Ok(entries)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self
            .set
            .insert(Self::composite(key, member), &[] as &[u8])?
            .is_none())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self.set.remove(Self::composite(key, member))?.is_some())
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, StoreError> {
        let prefix = Self::prefix(key);
        let mut members = BTreeSet::new();
        for item in self.set.scan_prefix(&prefix) {
            let (k, _) = item?;
            members.insert(String::from_utf8_lossy(&k[prefix.len()..]).into_owned());
        }
        Ok(members)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        current: Option<Value>,
        new: Option<Value>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let live = self.read_live(key)?;
        let stored_value = live.as_ref().map(|(_, stored)| &stored.value);
        if stored_value != current.as_ref() {
            return Ok(false);
        }
        let old_bytes = live.as_ref().map(|(bytes, _)| bytes.clone());
        let new_bytes = match new {
            Some(value) => Some(Self::encode(value, ttl)?),
            None => None,
        };
        // sled CAS on the exact bytes we just read: a concurrent writer makes
        // this return a conflict, which callers observe as `false` and retry.
        match self.kv.compare_and_swap(key.as_bytes(), old_bytes, new_bytes)? {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut purged = 0usize;
        for item in self.kv.iter() {
            let (k, v) = item?;
            let expired = serde_json::from_slice::<Stored>(&v)
                .map(|stored| stored.expired())
                // Unreadable envelopes are purged rather than kept forever.
                .unwrap_or(true);
            if expired && self.kv.remove(&k)?.is_some() {
                purged += 1;
            }
        }
        Ok(purged)
    }
}
