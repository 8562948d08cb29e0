//! Generic per-kind facade over the fixture repository
//!
//! One `DummyFacade<K>` instance serves one resource kind. Kind-specific
//! behavior (initial state, creation validity, the action table) is supplied
//! by a `KindSpec`, so the lifecycle contract is written once.

use super::repository::FixtureRepository;
use crate::backend::{context, require_id, require_kind, Capabilities, ResourceBackend};
use crate::error::{Error, Result};
use crate::occi::{
    ActionInstance, Attributes, ComputeState, NetworkState, Resource, ResourceState, StorageState,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Kind specifications
// =============================================================================

/// Kind-specific lifecycle behavior
pub trait KindSpec: Send + Sync + 'static {
    const TERM: &'static str;
    /// Every action term the kind knows, in any state
    const ACTIONS: &'static [&'static str];

    /// State a freshly created resource settles into (the dummy platform
    /// allocates instantly; there is no transitional phase)
    fn initialize(resource: &mut Resource);

    /// Creation-time semantic validation
    fn validate(_resource: &Resource) -> Result<()> {
        Ok(())
    }

    /// Apply an action's state transition; only called once the current
    /// state has been checked to allow the term
    fn apply_action(resource: &mut Resource, term: &str);
}

pub struct ComputeSpec;

impl KindSpec for ComputeSpec {
    const TERM: &'static str = "compute";
    const ACTIONS: &'static [&'static str] = &["start", "stop", "restart", "suspend"];

    fn initialize(resource: &mut Resource) {
        resource.set_compute_state(ComputeState::Active);
    }

    fn validate(resource: &Resource) -> Result<()> {
        resource.require_single_mixin("os_tpl")?;
        if let Some(key) = resource.attributes.get_str("occi.credentials.ssh.publickey") {
            context::validate_ssh_public_key(key)?;
        }
        if let Some(data) = resource.attributes.get_str("occi.compute.userdata") {
            context::validate_user_data(data)?;
        }
        Ok(())
    }

    fn apply_action(resource: &mut Resource, term: &str) {
        let next = match term {
            "start" | "restart" => ComputeState::Active,
            "stop" => ComputeState::Inactive,
            "suspend" => ComputeState::Suspended,
            _ => unreachable!("unknown compute action {}", term),
        };
        resource.set_compute_state(next);
    }
}

pub struct NetworkSpec;

impl KindSpec for NetworkSpec {
    const TERM: &'static str = "network";
    const ACTIONS: &'static [&'static str] = &["up", "down"];

    fn initialize(resource: &mut Resource) {
        resource.set_network_state(NetworkState::Active);
    }

    fn apply_action(resource: &mut Resource, term: &str) {
        let next = match term {
            "up" => NetworkState::Active,
            "down" => NetworkState::Inactive,
            _ => unreachable!("unknown network action {}", term),
        };
        resource.set_network_state(next);
    }
}

pub struct StorageSpec;

impl KindSpec for StorageSpec {
    const TERM: &'static str = "storage";
    const ACTIONS: &'static [&'static str] =
        &["online", "offline", "backup", "snapshot", "resize"];

    fn initialize(resource: &mut Resource) {
        resource.set_storage_state(StorageState::Online);
    }

    fn apply_action(resource: &mut Resource, term: &str) {
        let next = match term {
            "online" => StorageState::Online,
            "offline" => StorageState::Offline,
            // Instant platform: transitional operations settle immediately
            "backup" | "snapshot" | "resize" => StorageState::Online,
            _ => unreachable!("unknown storage action {}", term),
        };
        resource.set_storage_state(next);
    }
}

// =============================================================================
// Facade
// =============================================================================

/// Facade over one kind's fixture repository
pub struct DummyFacade<K: KindSpec> {
    repo: Arc<FixtureRepository>,
    _spec: std::marker::PhantomData<K>,
}

impl<K: KindSpec> DummyFacade<K> {
    pub fn new(repo: Arc<FixtureRepository>) -> Self {
        Self {
            repo,
            _spec: std::marker::PhantomData,
        }
    }

    pub(super) fn repo(&self) -> &Arc<FixtureRepository> {
        &self.repo
    }
}

#[async_trait]
impl<K: KindSpec> ResourceBackend for DummyFacade<K> {
    fn capabilities(&self) -> Capabilities {
        Capabilities::full("dummy")
    }

    async fn list(&self, filter: &[String]) -> Result<Vec<Resource>> {
        let collection = self.repo.read().await?;
        Ok(collection.filtered(filter).into_iter().cloned().collect())
    }

    async fn list_ids(&self, filter: &[String]) -> Result<Vec<String>> {
        let collection = self.repo.read().await?;
        Ok(collection.filtered_ids(filter))
    }

    async fn get(&self, id: &str) -> Result<Resource> {
        require_id("id", id)?;
        let collection = self.repo.read().await?;
        collection
            .find(id)
            .cloned()
            .ok_or_else(|| Error::not_found(K::TERM, id))
    }

    async fn create(&self, resource: Resource) -> Result<String> {
        require_id("resource.id", &resource.id)?;
        require_kind(&resource, K::TERM)?;
        K::validate(&resource)?;

        let id = resource.id.clone();
        let mut resource = resource;
        K::initialize(&mut resource);

        let created = self
            .repo
            .mutate(move |collection| {
                if collection.contains(&resource.id) {
                    return Err(Error::conflict(K::TERM, &resource.id));
                }
                let id = resource.id.clone();
                collection.resources.push(resource);
                Ok(id)
            })
            .await?;

        info!(kind = K::TERM, id = %created, "resource created");
        Ok(id)
    }

    async fn update(&self, resource: Resource) -> Result<()> {
        require_id("resource.id", &resource.id)?;
        require_kind(&resource, K::TERM)?;

        self.repo
            .mutate(move |collection| {
                let stored = collection
                    .find_mut(&resource.id)
                    .ok_or_else(|| Error::not_found(K::TERM, &resource.id))?;
                // Full replacement of mutable state; platform-owned state
                // is not client-writable
                stored.title = resource.title.clone();
                stored.mixins = resource.mixins.clone();
                stored.attributes = resource.attributes.clone();
                stored.links = resource.links.clone();
                Ok(())
            })
            .await
    }

    async fn partial_update(
        &self,
        id: &str,
        mixins: &[String],
        attributes: &Attributes,
    ) -> Result<()> {
        require_id("id", id)?;
        let id = id.to_string();
        let mixins = mixins.to_vec();
        let attributes = attributes.clone();

        self.repo
            .mutate(move |collection| {
                let stored = collection
                    .find_mut(&id)
                    .ok_or_else(|| Error::not_found(K::TERM, &id))?;
                for mixin in mixins {
                    stored.mixins.insert(mixin);
                }
                stored.attributes.merge(&attributes);
                Ok(())
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        require_id("id", id)?;
        let id = id.to_string();
        self.repo
            .mutate(move |collection| {
                collection
                    .remove(&id)
                    .map(|_| ())
                    .ok_or_else(|| Error::not_found(K::TERM, &id))
            })
            .await?;
        debug!(kind = K::TERM, "resource deleted");
        Ok(())
    }

    async fn delete_all(&self, filter: &[String]) -> Result<()> {
        let filter = filter.to_vec();
        let removed = self
            .repo
            .mutate(move |collection| {
                let doomed = collection.filtered_ids(&filter);
                for id in &doomed {
                    collection.remove(id);
                }
                Ok(doomed.len())
            })
            .await?;
        debug!(kind = K::TERM, removed, "filtered delete");
        Ok(())
    }

    async fn trigger_action(&self, id: &str, action: &ActionInstance) -> Result<()> {
        require_id("id", id)?;
        let term = action.term().to_string();
        if !K::ACTIONS.contains(&term.as_str()) {
            return Err(Error::ActionNotImplemented(action.action.identifier()));
        }

        let id = id.to_string();
        self.repo
            .mutate(move |collection| {
                let stored = collection
                    .find_mut(&id)
                    .ok_or_else(|| Error::not_found(K::TERM, &id))?;

                let allowed = stored
                    .state
                    .map(|s| s.allows(&term))
                    .unwrap_or(false);
                if !allowed {
                    return Err(Error::ResourceState {
                        state: stored
                            .state
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "unknown".into()),
                        reason: format!("action {} not available", term),
                    });
                }

                K::apply_action(stored, &term);
                Ok(())
            })
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================
