//! Backend facades
//!
//! A backend family (Dummy, OpenNebula, EC2, NOW) provides one facade per
//! resource kind. Facades are the whole surface the controller layer sees:
//! they validate arguments, delegate to the family's translator and platform
//! client, and never leak vendor error types. The registry wires facades of
//! one family together so a compute facade can resolve entities owned by the
//! network or storage facade without a dependency cycle.

pub mod context;
pub mod dummy;
pub mod ec2;
pub mod now;
pub mod opennebula;
pub mod poll;
pub mod pool;
pub mod registry;

pub use registry::{BackendProxy, FacadeRef, OtherBackends};

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::occi::{ActionInstance, Attributes, Link, Model, Resource};
use crate::store::KeyValueStoreRef;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Capabilities
// =============================================================================

/// Explicit per-facade operation coverage. Partially implemented backends
/// declare what they do not support instead of failing lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub backend: &'static str,
    pub create: bool,
    pub update: bool,
    pub partial_update: bool,
    pub delete: bool,
    pub actions: bool,
    pub links: bool,
}

impl Capabilities {
    pub fn full(backend: &'static str) -> Self {
        Self {
            backend,
            create: true,
            update: true,
            partial_update: true,
            delete: true,
            actions: true,
            links: true,
        }
    }

    /// Guard an operation behind its capability flag
    pub fn ensure(&self, operation: &str, enabled: bool) -> Result<()> {
        if enabled {
            Ok(())
        } else {
            Err(Error::MethodNotImplemented {
                backend: self.backend.to_string(),
                operation: operation.to_string(),
            })
        }
    }
}

// =============================================================================
// Argument validation
// =============================================================================

/// Mandatory non-empty identifier
pub(crate) fn require_id(argument: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        Err(Error::Argument(argument.to_string()))
    } else {
        Ok(())
    }
}

/// Mandatory resource of the expected kind term
pub(crate) fn require_kind(resource: &Resource, term: &str) -> Result<()> {
    if resource.kind != term {
        return Err(Error::ArgumentTypeMismatch {
            argument: "resource".to_string(),
            expected: format!("kind {}, got {}", term, resource.kind),
        });
    }
    Ok(())
}

/// Extract the trailing id segment from a URI-style reference
/// (`/compute/42` -> `42`); bare ids pass through
pub(crate) fn id_from_reference(reference: &str) -> Result<String> {
    let trimmed = reference.trim_end_matches('/');
    let id = trimmed.rsplit('/').next().unwrap_or("");
    if id.is_empty() {
        Err(Error::IdentifierNotValid(reference.to_string()))
    } else {
        Ok(id.to_string())
    }
}

// =============================================================================
// Facade contracts
// =============================================================================

/// Operations common to every resource kind
#[async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Operation coverage of this facade
    fn capabilities(&self) -> Capabilities;

    /// All resources carrying every mixin in `filter`
    async fn list(&self, filter: &[String]) -> Result<Vec<Resource>>;

    /// Identifiers only; cheaper than `list` on pool-based platforms
    async fn list_ids(&self, filter: &[String]) -> Result<Vec<String>>;

    /// The resource, or `ResourceNotFound`; never an absent value
    async fn get(&self, id: &str) -> Result<Resource>;

    /// Allocate on the platform. Returns the final identifier, which may
    /// differ from the supplied one when the platform is authoritative over
    /// naming. A supplied identifier that already exists is
    /// `IdentifierConflict`.
    async fn create(&self, resource: Resource) -> Result<String>;

    /// Full replacement of mutable state
    async fn update(&self, resource: Resource) -> Result<()>;

    /// Merge the given mixins and attributes into the stored resource
    async fn partial_update(
        &self,
        id: &str,
        mixins: &[String],
        attributes: &Attributes,
    ) -> Result<()>;

    /// Delete one resource; a missing id is `ResourceNotFound`
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete every resource matching `filter`; matching nothing is a no-op
    async fn delete_all(&self, filter: &[String]) -> Result<()>;

    /// Dispatch an action through the kind's action table. Unknown terms are
    /// `ActionNotImplemented`; actions invalid in the current state are
    /// `ResourceState`.
    async fn trigger_action(&self, id: &str, action: &ActionInstance) -> Result<()>;

    /// Apply `trigger_action` to every filtered id. Not atomic: aborts on
    /// the first failure, earlier effects stay applied.
    async fn trigger_action_on_all(
        &self,
        action: &ActionInstance,
        filter: &[String],
    ) -> Result<()> {
        for id in self.list_ids(filter).await? {
            self.trigger_action(&id, action).await?;
        }
        Ok(())
    }
}

/// Compute facade: resource operations plus link management
#[async_trait]
pub trait ComputeBackend: ResourceBackend {
    /// Attach a network interface; returns the derived link identifier
    async fn attach_network(&self, link: Link) -> Result<String>;

    async fn detach_network(&self, link_id: &str) -> Result<()>;

    async fn get_network_link(&self, link_id: &str) -> Result<Link>;

    /// Attach a storage volume; returns the derived link identifier
    async fn attach_storage(&self, link: Link) -> Result<String>;

    async fn detach_storage(&self, link_id: &str) -> Result<()>;

    async fn get_storage_link(&self, link_id: &str) -> Result<Link>;
}

/// Network facade
#[async_trait]
pub trait NetworkBackend: ResourceBackend {}

/// Storage facade
#[async_trait]
pub trait StorageBackend: ResourceBackend {}

pub type ComputeBackendRef = Arc<dyn ComputeBackend>;
pub type NetworkBackendRef = Arc<dyn NetworkBackend>;
pub type StorageBackendRef = Arc<dyn StorageBackend>;

impl std::fmt::Debug for dyn ComputeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ComputeBackend")
    }
}

impl std::fmt::Debug for dyn NetworkBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn NetworkBackend")
    }
}

impl std::fmt::Debug for dyn StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn StorageBackend")
    }
}

// =============================================================================
// Model extension
// =============================================================================

/// Populates the shared capability model with backend-specific mixins at
/// startup/refresh time
#[async_trait]
pub trait ModelExtender: Send + Sync {
    async fn extend_model(&self, model: &mut Model) -> Result<()>;
}

pub type ModelExtenderRef = Arc<dyn ModelExtender>;

impl std::fmt::Debug for dyn ModelExtender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ModelExtender")
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds a backend family by name
pub struct BackendFactory;

impl BackendFactory {
    /// Construct the facades and model extender for the named backend.
    /// Backend instances are per authenticated user/session; nothing built
    /// here is shared across users except the key-value store.
    pub async fn create(
        name: &str,
        config: &BridgeConfig,
        store: KeyValueStoreRef,
    ) -> Result<(BackendProxy, ModelExtenderRef)> {
        match name.to_lowercase().as_str() {
            "dummy" => dummy::build(&config.dummy, store).await,
            "opennebula" => opennebula::build(&config.opennebula),
            "ec2" => ec2::build(&config.ec2, store),
            "now" => now::build(&config.now),
            other => Err(Error::Configuration(format!(
                "unknown backend: {}",
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
    fn test_require_id_rejects_blank() {
        assert_matches!(require_id("compute_id", ""), Err(Error::Argument(_)));
        assert_matches!(require_id("compute_id", "  "), Err(Error::Argument(_)));
        assert!(require_id("compute_id", "42").is_ok());
    }

    #[test]
    fn test_require_kind_mismatch() {
        let res = Resource::network("n1");
        assert_matches!(
            require_kind(&res, "compute"),
            Err(Error::ArgumentTypeMismatch { .. })
        );
        assert!(require_kind(&res, "network").is_ok());
    }

    #[test]
    fn test_id_from_reference() {
        assert_eq!(id_from_reference("/compute/42").unwrap(), "42");
        assert_eq!(id_from_reference("/network/vnet-9/").unwrap(), "vnet-9");
        assert_eq!(id_from_reference("42").unwrap(), "42");
        assert_matches!(id_from_reference("/"), Err(Error::IdentifierNotValid(_)));
    }

    #[test]
    fn test_capabilities_guard() {
        let caps = Capabilities {
            update: false,
            ..Capabilities::full("now")
        };
        assert!(caps.ensure("create", caps.create).is_ok());
        assert_matches!(
            caps.ensure("update", caps.update),
            Err(Error::MethodNotImplemented { .. })
        );
    }

    #[tokio::test]
    async fn test_unknown_backend_is_configuration_error() {
        let config = BridgeConfig::default();
        let store = crate::store::MemoryStore::shared();
        assert_matches!(
            BackendFactory::create("nova", &config, store).await,
            Err(Error::Configuration(_))
        );
    }
}
