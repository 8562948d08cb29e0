//! Dummy compute facade with link management
//!
//! Wraps the generic compute facade and adds networkinterface/storagelink
//! handling. Link targets are resolved through the sibling facades at
//! retrieval time; targets that vanished out-of-band resolve to placeholder
//! resources instead of failing the owner.

use super::facade::{ComputeSpec, DummyFacade};
use crate::backend::{
    id_from_reference, require_id, Capabilities, ComputeBackend, OtherBackends, ResourceBackend,
};
use crate::error::{Error, Result};
use crate::occi::{ActionInstance, Attributes, Link, LinkId, LinkKind, Resource};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct DummyCompute {
    inner: DummyFacade<ComputeSpec>,
    others: Arc<OtherBackends>,
}

impl DummyCompute {
    pub fn new(inner: DummyFacade<ComputeSpec>, others: Arc<OtherBackends>) -> Self {
        Self { inner, others }
    }

    /// Replace link targets that no longer resolve with placeholders. Only
    /// lookup misses and permission failures are masked; transport errors
    /// propagate.
    async fn resolve_links(&self, resource: &mut Resource) -> Result<()> {
        for link in &mut resource.links {
            let target_id = link.target.id().to_string();
            let lookup = match link.kind {
                LinkKind::NetworkInterface => self.others.network()?.get(&target_id).await,
                LinkKind::StorageLink => self.others.storage()?.get(&target_id).await,
                LinkKind::SecurityGroupLink => continue,
            };
            match lookup {
                Ok(_) => {}
                Err(Error::ResourceNotFound { .. }) => {
                    warn!(link = %link.id, target = %target_id, "link target missing, substituting placeholder");
                    link.target = Resource::placeholder_target(link, "target no longer exists");
                }
                Err(Error::Authorization(_)) | Err(Error::Authentication(_)) => {
                    link.target =
                        Resource::placeholder_target(link, "target is not accessible");
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    async fn attach(&self, link: Link, kind: LinkKind) -> Result<String> {
        let source = id_from_reference(&link.source)?;
        let target = id_from_reference(link.target.id())?;

        // Both endpoints must exist before the platform-side attach
        self.inner.get(&source).await?;
        match kind {
            LinkKind::NetworkInterface => {
                self.others.network()?.get(&target).await?;
            }
            LinkKind::StorageLink => {
                self.others.storage()?.get(&target).await?;
            }
            LinkKind::SecurityGroupLink => {
                return Err(Error::MethodNotImplemented {
                    backend: "dummy".into(),
                    operation: "attach securitygrouplink".into(),
                })
            }
        }

        let mut derived = Link::derive("compute", &source, kind, &target);
        derived.attributes.merge(&link.attributes);
        derived
            .attributes
            .set("occi.core.id", derived.id.clone());
        let link_id = derived.id.clone();

        self.inner
            .repo()
            .mutate(move |collection| {
                let stored = collection
                    .find_mut(&source)
                    .ok_or_else(|| Error::not_found("compute", &source))?;
                if stored.links.iter().any(|l| l.id == derived.id) {
                    return Err(Error::conflict(derived.kind.term(), &derived.id));
                }
                stored.add_link(derived);
                Ok(())
            })
            .await?;

        debug!(link = %link_id, "link attached");
        Ok(link_id)
    }

    async fn detach(&self, link_id: &str, kind: LinkKind) -> Result<()> {
        let parsed = self.parse_owned(link_id, kind)?;
        let wanted = link_id.to_string();
        let owner = parsed.owner_id.clone();

        self.inner
            .repo()
            .mutate(move |collection| {
                let stored = collection
                    .find_mut(&owner)
                    .ok_or_else(|| Error::not_found("compute", &owner))?;
                let before = stored.links.len();
                stored.links.retain(|l| l.id != wanted);
                if stored.links.len() == before {
                    return Err(Error::not_found(kind.term(), &wanted));
                }
                Ok(())
            })
            .await
    }

    async fn get_link(&self, link_id: &str, kind: LinkKind) -> Result<Link> {
        let parsed = self.parse_owned(link_id, kind)?;
        let owner = self.inner.get(&parsed.owner_id).await?;
        let mut link = owner
            .links
            .iter()
            .find(|l| l.id == link_id)
            .cloned()
            .ok_or_else(|| Error::not_found(kind.term(), link_id))?;

        let target_id = link.target.id().to_string();
        let lookup = match kind {
            LinkKind::NetworkInterface => self.others.network()?.get(&target_id).await,
            LinkKind::StorageLink => self.others.storage()?.get(&target_id).await,
            LinkKind::SecurityGroupLink => {
                return Err(Error::MethodNotImplemented {
                    backend: "dummy".into(),
                    operation: "get securitygrouplink".into(),
                })
            }
        };
        if let Err(Error::ResourceNotFound { .. }) | Err(Error::Authorization(_)) = lookup {
            link.target = Resource::placeholder_target(&link, "target no longer exists");
        }
        Ok(link)
    }

    fn parse_owned(&self, link_id: &str, kind: LinkKind) -> Result<LinkId> {
        require_id("link_id", link_id)?;
        let parsed = LinkId::parse(link_id)?;
        if parsed.kind != kind || parsed.owner_kind != "compute" {
            return Err(Error::IdentifierNotValid(link_id.to_string()));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl ResourceBackend for DummyCompute {
    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn list(&self, filter: &[String]) -> Result<Vec<Resource>> {
        let mut resources = self.inner.list(filter).await?;
        for resource in &mut resources {
            self.resolve_links(resource).await?;
        }
        Ok(resources)
    }

    async fn list_ids(&self, filter: &[String]) -> Result<Vec<String>> {
        self.inner.list_ids(filter).await
    }

    async fn get(&self, id: &str) -> Result<Resource> {
        let mut resource = self.inner.get(id).await?;
        self.resolve_links(&mut resource).await?;
        Ok(resource)
    }

    async fn create(&self, resource: Resource) -> Result<String> {
        self.inner.create(resource).await
    }

    async fn update(&self, resource: Resource) -> Result<()> {
        self.inner.update(resource).await
    }

    async fn partial_update(
        &self,
        id: &str,
        mixins: &[String],
        attributes: &Attributes,
    ) -> Result<()> {
        self.inner.partial_update(id, mixins, attributes).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn delete_all(&self, filter: &[String]) -> Result<()> {
        self.inner.delete_all(filter).await
    }

    async fn trigger_action(&self, id: &str, action: &ActionInstance) -> Result<()> {
        self.inner.trigger_action(id, action).await
    }
}

#[async_trait]
impl ComputeBackend for DummyCompute {
    async fn attach_network(&self, link: Link) -> Result<String> {
        self.attach(link, LinkKind::NetworkInterface).await
    }

    async fn detach_network(&self, link_id: &str) -> Result<()> {
        self.detach(link_id, LinkKind::NetworkInterface).await
    }

    async fn get_network_link(&self, link_id: &str) -> Result<Link> {
        self.get_link(link_id, LinkKind::NetworkInterface).await
    }

    async fn attach_storage(&self, link: Link) -> Result<String> {
        self.attach(link, LinkKind::StorageLink).await
    }

    async fn detach_storage(&self, link_id: &str) -> Result<()> {
        self.detach(link_id, LinkKind::StorageLink).await
    }

    async fn get_storage_link(&self, link_id: &str) -> Result<Link> {
        self.get_link(link_id, LinkKind::StorageLink).await
    }
}
