//! Key-value store port
//!
//! Stateless-platform backends (Dummy, EC2 resource templates) persist their
//! fixture state here across requests. Writers go through `update`, a
//! per-key atomic read-modify-write, so concurrent requests for the same
//! user cannot lose updates to each other.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

// =============================================================================
// Port
// =============================================================================

/// Shared key-value store with per-key atomic updates
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically transform the value under `key`. The closure sees the
    /// current value (or `None`) and returns the replacement; returning
    /// `None` deletes the key. No other writer interleaves for this key.
    async fn update(
        &self,
        key: &str,
        f: Box<dyn FnOnce(Option<String>) -> Option<String> + Send>,
    ) -> Result<()>;
}

pub type KeyValueStoreRef = Arc<dyn KeyValueStore>;

// =============================================================================
// In-memory implementation
// =============================================================================

/// Process-local store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> KeyValueStoreRef {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn update(
        &self,
        key: &str,
        f: Box<dyn FnOnce(Option<String>) -> Option<String> + Send>,
    ) -> Result<()> {
        // The entry API holds the shard lock across the closure, which is
        // what makes this a per-key atomic read-modify-write.
        let entry = self.entries.entry(key.to_string());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(mut occ) => {
                match f(Some(occ.get().clone())) {
                    Some(next) => {
                        occ.insert(next);
                    }
                    None => {
                        occ.remove();
                    }
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vac) => {
                if let Some(next) = f(None) {
                    vac.insert(next);
                }
            }
        }
        Ok(())
    }
}
