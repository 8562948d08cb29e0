//! Per-kind fixture repository
//!
//! Dummy-backend state lives in the shared key-value store under
//! `{user}:{kind}` keys, seeded from the fixture document on first use.
//! Every mutation goes through the store's per-key atomic `update`, so
//! concurrent requests for the same user serialize per kind and cannot lose
//! writes to each other.

use crate::error::{Error, Result};
use crate::occi::Collection;
use crate::store::KeyValueStoreRef;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Repository over one resource kind's collection
pub struct FixtureRepository {
    store: KeyValueStoreRef,
    key: String,
    kind: &'static str,
}

impl FixtureRepository {
    /// Open the repository, seeding the store from `fixtures_dir/{kind}.json`
    /// only when no state exists yet for this user and kind.
    pub async fn open(
        store: KeyValueStoreRef,
        user: &str,
        kind: &'static str,
        fixtures_dir: &Path,
    ) -> Result<Self> {
        let repo = Self {
            store,
            key: format!("{}:{}", user, kind),
            kind,
        };

        let fixture = Collection::from_fixture_file(&fixtures_dir.join(format!("{}.json", kind)))?;
        let seed = serde_json::to_string(&fixture)?;
        repo.store
            .update(
                &repo.key,
                Box::new(move |current| match current {
                    Some(existing) => Some(existing),
                    None => Some(seed),
                }),
            )
            .await?;

        debug!(kind, resources = fixture.resources.len(), "repository opened");
        Ok(repo)
    }

    /// Current collection snapshot
    pub async fn read(&self) -> Result<Collection> {
        match self.store.get(&self.key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Collection::new()),
        }
    }

    /// Atomically transform the collection. The closure's result is returned
    /// to the caller; on error the stored state is left untouched.
    pub async fn mutate<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Collection) -> Result<R> + Send + 'static,
    {
        let outcome: Arc<Mutex<Option<Result<R>>>> = Arc::new(Mutex::new(None));
        let slot = outcome.clone();
        let kind = self.kind;

        self.store
            .update(
                &self.key,
                Box::new(move |current| {
                    let parsed: Result<Collection> = match &current {
                        Some(raw) => serde_json::from_str(raw).map_err(Error::from),
                        None => Ok(Collection::new()),
                    };
                    let mut collection = match parsed {
                        Ok(c) => c,
                        Err(e) => {
                            *slot.lock() = Some(Err(Error::Internal(format!(
                                "corrupt {} collection: {}",
                                kind, e
                            ))));
                            return current;
                        }
                    };

                    match f(&mut collection) {
                        Ok(result) => match serde_json::to_string(&collection) {
                            Ok(serialized) => {
                                *slot.lock() = Some(Ok(result));
                                Some(serialized)
                            }
                            Err(e) => {
                                *slot.lock() = Some(Err(Error::from(e)));
                                current
                            }
                        },
                        Err(e) => {
                            *slot.lock() = Some(Err(e));
                            current
                        }
                    }
                }),
            )
            .await?;

        let taken = outcome.lock().take();
        taken.unwrap_or_else(|| {
            Err(Error::Internal(format!("{} mutation produced no outcome", kind)))
        })
    }

    /// Drop all persisted state for this kind
    pub async fn drop_all(&self) -> Result<()> {
        self.store.delete(&self.key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occi::Resource;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;

    async fn repo(dir: &Path) -> FixtureRepository {
        FixtureRepository::open(MemoryStore::shared(), "alice", "compute", dir)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_seeds_from_fixture_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("compute.json"),
            r#"{"resources": [{"id": "c1", "kind": "compute"}]}"#,
        )
        .unwrap();

        let store = MemoryStore::shared();
        let repo = FixtureRepository::open(store.clone(), "alice", "compute", dir.path())
            .await
            .unwrap();
        assert!(repo.read().await.unwrap().contains("c1"));

        // Mutate, then reopen: live state wins over the fixture
        repo.mutate(|c| {
            c.remove("c1");
            Ok(())
        })
        .await
        .unwrap();
        let reopened = FixtureRepository::open(store, "alice", "compute", dir.path())
            .await
            .unwrap();
        assert!(!reopened.read().await.unwrap().contains("c1"));
    }

    #[tokio::test]
    async fn test_mutate_returns_closure_value() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(dir.path()).await;
        let count = repo
            .mutate(|c| {
                c.resources.push(Resource::compute("c1"));
                c.resources.push(Resource::compute("c2"));
                Ok(c.resources.len())
            })
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_mutation_error_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(dir.path()).await;
        repo.mutate(|c| {
            c.resources.push(Resource::compute("c1"));
            Ok(())
        })
        .await
        .unwrap();

        let result: Result<()> = repo
            .mutate(|c| {
                c.remove("c1");
                Err(Error::ResourceNotValid("rejected".into()))
            })
            .await;
        assert_matches!(result, Err(Error::ResourceNotValid(_)));
        assert!(repo.read().await.unwrap().contains("c1"));
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::shared();
        let alice = FixtureRepository::open(store.clone(), "alice", "compute", dir.path())
            .await
            .unwrap();
        let bob = FixtureRepository::open(store, "bob", "compute", dir.path())
            .await
            .unwrap();

        alice
            .mutate(|c| {
                c.resources.push(Resource::compute("only-alice"));
                Ok(())
            })
            .await
            .unwrap();

        assert!(alice.read().await.unwrap().contains("only-alice"));
        assert!(!bob.read().await.unwrap().contains("only-alice"));
    }
}
