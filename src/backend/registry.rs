//! Backend registry and cross-facade wiring
//!
//! Links cross resource-kind boundaries: a storagelink references both the
//! compute and the storage facade. Direct coupling between facade types
//! would be a dependency cycle, so facades resolve each other late, through
//! `OtherBackends` handles populated once after the whole family is built.
//! The proxy additionally resolves facades by kind term for the controller
//! layer; an unregistered term is a configuration error, not a data error.

use super::{ComputeBackendRef, NetworkBackendRef, StorageBackendRef};
use crate::error::{Error, Result};
use std::sync::{Arc, OnceLock};

// =============================================================================
// Facade reference
// =============================================================================

/// A facade resolved by kind term
#[derive(Clone, Debug)]
pub enum FacadeRef {
    Compute(ComputeBackendRef),
    Network(NetworkBackendRef),
    Storage(StorageBackendRef),
}

impl FacadeRef {
    pub fn term(&self) -> &'static str {
        match self {
            FacadeRef::Compute(_) => "compute",
            FacadeRef::Network(_) => "network",
            FacadeRef::Storage(_) => "storage",
        }
    }

    /// The kind-agnostic operation surface of the resolved facade
    pub fn resources(&self) -> &dyn super::ResourceBackend {
        match self {
            FacadeRef::Compute(b) => b.as_ref(),
            FacadeRef::Network(b) => b.as_ref(),
            FacadeRef::Storage(b) => b.as_ref(),
        }
    }
}

// =============================================================================
// Other-backend handles
// =============================================================================

/// Late-bound handles a facade uses to resolve entities served by its
/// sibling facades. Registered exactly once, after family construction.
#[derive(Default)]
pub struct OtherBackends {
    network: OnceLock<NetworkBackendRef>,
    storage: OnceLock<StorageBackendRef>,
}

impl OtherBackends {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register_network(&self, backend: NetworkBackendRef) -> Result<()> {
        self.network
            .set(backend)
            .map_err(|_| Error::Internal("network backend registered twice".into()))
    }

    pub fn register_storage(&self, backend: StorageBackendRef) -> Result<()> {
        self.storage
            .set(backend)
            .map_err(|_| Error::Internal("storage backend registered twice".into()))
    }

    pub fn network(&self) -> Result<&NetworkBackendRef> {
        self.network
            .get()
            .ok_or_else(|| Error::Configuration("network backend not wired".into()))
    }

    pub fn storage(&self) -> Result<&StorageBackendRef> {
        self.storage
            .get()
            .ok_or_else(|| Error::Configuration("storage backend not wired".into()))
    }
}

// =============================================================================
// Backend proxy
// =============================================================================

/// The live facade set for one request's backend family
#[derive(Default, Debug)]
pub struct BackendProxy {
    compute: Option<ComputeBackendRef>,
    network: Option<NetworkBackendRef>,
    storage: Option<StorageBackendRef>,
}

impl BackendProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compute(mut self, backend: ComputeBackendRef) -> Self {
        self.compute = Some(backend);
        self
    }

    pub fn with_network(mut self, backend: NetworkBackendRef) -> Self {
        self.network = Some(backend);
        self
    }

    pub fn with_storage(mut self, backend: StorageBackendRef) -> Self {
        self.storage = Some(backend);
        self
    }

    pub fn compute(&self) -> Result<&ComputeBackendRef> {
        self.compute
            .as_ref()
            .ok_or_else(|| Error::Configuration("no compute backend registered".into()))
    }

    pub fn network(&self) -> Result<&NetworkBackendRef> {
        self.network
            .as_ref()
            .ok_or_else(|| Error::Configuration("no network backend registered".into()))
    }

    pub fn storage(&self) -> Result<&StorageBackendRef> {
        self.storage
            .as_ref()
            .ok_or_else(|| Error::Configuration("no storage backend registered".into()))
    }

    /// Resolve a facade by resource-kind term. Link terms resolve to the
    /// facade owning the link's source side.
    pub fn resolve(&self, term: &str) -> Result<FacadeRef> {
        match term {
            "compute" | "networkinterface" | "storagelink" => {
                self.compute().map(|b| FacadeRef::Compute(b.clone()))
            }
            "network" | "ipreservation" => self.network().map(|b| FacadeRef::Network(b.clone())),
            "storage" => self.storage().map(|b| FacadeRef::Storage(b.clone())),
            other => Err(Error::Configuration(format!(
                "no backend registered for kind term {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_empty_proxy_resolution_is_configuration_error() {
        let proxy = BackendProxy::new();
        assert_matches!(proxy.resolve("compute"), Err(Error::Configuration(_)));
        assert_matches!(proxy.resolve("printer"), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_other_backends_unwired_is_configuration_error() {
        let others = OtherBackends::new();
        assert_matches!(others.network(), Err(Error::Configuration(_)));
        assert_matches!(others.storage(), Err(Error::Configuration(_)));
    }
}
