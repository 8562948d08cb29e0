//! Pool cache
//!
//! Platform listing calls ("pools") are cached per backend instance, keyed
//! by pool name and content selector. Backend instances are per
//! authenticated user, so cached pools are never shared across users. Any
//! write through the owning backend flushes the cache; there is no implicit
//! mid-request refresh.

use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Cache of pool listings keyed by `(name, content)`
pub struct PoolCache<T> {
    pools: Mutex<HashMap<(String, String), Arc<T>>>,
}

impl<T> Default for PoolCache<T> {
    fn default() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> PoolCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached pool for `(name, content)`, loading it through
    /// `loader` when absent or when `force_reload` is set.
    pub async fn pool<F, Fut>(
        &self,
        name: &str,
        content: &str,
        force_reload: bool,
        loader: F,
    ) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = (name.to_string(), content.to_string());

        if !force_reload {
            if let Some(cached) = self.pools.lock().get(&key) {
                return Ok(cached.clone());
            }
        }

        let loaded = Arc::new(loader().await?);
        self.pools.lock().insert(key, loaded.clone());
        Ok(loaded)
    }

    /// Drop every cached pool. Called on any write through the owning
    /// backend instance and when request-scoped instances are recycled.
    pub fn flush(&self) {
        self.pools.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }
}
