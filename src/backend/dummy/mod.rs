//! Dummy backend
//!
//! A fully functional in-memory backend driven by fixture documents and the
//! shared key-value store. It exercises every facade contract without a real
//! platform and carries the reference semantics the other backends are
//! measured against.

mod compute;
mod facade;
mod repository;

pub use compute::DummyCompute;
pub use facade::{ComputeSpec, DummyFacade, NetworkSpec, StorageSpec};
pub use repository::FixtureRepository;

use crate::backend::{
    BackendProxy, ModelExtender, ModelExtenderRef, NetworkBackend, OtherBackends, StorageBackend,
};
use crate::config::DummyConfig;
use crate::error::Result;
use crate::occi::{Collection, Model};
use crate::store::KeyValueStoreRef;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

impl NetworkBackend for DummyFacade<NetworkSpec> {}
impl StorageBackend for DummyFacade<StorageSpec> {}

/// Build the dummy facade family and its model extender
pub async fn build(
    config: &DummyConfig,
    store: KeyValueStoreRef,
) -> Result<(BackendProxy, ModelExtenderRef)> {
    let compute_repo = Arc::new(
        FixtureRepository::open(store.clone(), &config.user, "compute", &config.fixtures_dir)
            .await?,
    );
    let network_repo = Arc::new(
        FixtureRepository::open(store.clone(), &config.user, "network", &config.fixtures_dir)
            .await?,
    );
    let storage_repo = Arc::new(
        FixtureRepository::open(store, &config.user, "storage", &config.fixtures_dir).await?,
    );

    let others = OtherBackends::new();
    let network: Arc<DummyFacade<NetworkSpec>> =
        Arc::new(DummyFacade::new(network_repo.clone()));
    let storage: Arc<DummyFacade<StorageSpec>> =
        Arc::new(DummyFacade::new(storage_repo.clone()));
    others.register_network(network.clone())?;
    others.register_storage(storage.clone())?;

    let compute = Arc::new(DummyCompute::new(
        DummyFacade::new(compute_repo.clone()),
        others,
    ));

    let proxy = BackendProxy::new()
        .with_compute(compute)
        .with_network(network)
        .with_storage(storage);

    let extender = Arc::new(DummyExtender {
        repos: vec![compute_repo, network_repo, storage_repo],
    });

    info!(user = %config.user, "dummy backend ready");
    Ok((proxy, extender))
}

/// Registers fixture-declared mixins into the capability model
struct DummyExtender {
    repos: Vec<Arc<FixtureRepository>>,
}

#[async_trait]
impl ModelExtender for DummyExtender {
    async fn extend_model(&self, model: &mut Model) -> Result<()> {
        // Skeletons must be packaged regardless of what fixtures declare
        for term in crate::occi::model::SKELETON_TERMS {
            model.skeleton(term)?;
        }

        let mut collections: Vec<Collection> = Vec::with_capacity(self.repos.len());
        for repo in &self.repos {
            collections.push(repo.read().await?);
        }
        for collection in collections {
            for mixin in collection.mixins {
                model.add_mixin(mixin);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
