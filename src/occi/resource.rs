//! Platform-neutral resources
//!
//! A resource carries a stable identifier, a kind term, an attached mixin
//! set, a typed attribute map, a per-kind state and its outbound links.
//! Identifiers never change once assigned within a backend+kind scope.

use super::attribute::{AttributeValue, Attributes};
use super::link::{Link, LinkKind, LinkTarget};
use super::state::{ComputeState, NetworkState, ResourceState, StorageState};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Resource kind terms served by the bridge
pub const KIND_COMPUTE: &str = "compute";
pub const KIND_NETWORK: &str = "network";
pub const KIND_STORAGE: &str = "storage";
pub const KIND_SECURITY_GROUP: &str = "securitygroup";
pub const KIND_IP_RESERVATION: &str = "ipreservation";

/// Mixin dependency identifiers used for classification
pub const OS_TPL_MIXIN: &str = "http://schemas.ogf.org/occi/infrastructure#os_tpl";
pub const RESOURCE_TPL_MIXIN: &str = "http://schemas.ogf.org/occi/infrastructure#resource_tpl";

// =============================================================================
// Resource
// =============================================================================

/// A platform-neutral OCCI resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    /// Kind term, e.g. `compute`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Attached mixin identifiers (`scheme#term`)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub mixins: BTreeSet<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ResourceState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

impl Resource {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        let id = id.into();
        let kind = kind.into();
        let mut attributes = Attributes::new();
        attributes.set("occi.core.id", id.clone());
        Self {
            id,
            kind,
            title: None,
            mixins: BTreeSet::new(),
            attributes,
            state: None,
            links: vec![],
        }
    }

    pub fn compute(id: impl Into<String>) -> Self {
        Self::new(id, KIND_COMPUTE)
    }

    pub fn network(id: impl Into<String>) -> Self {
        Self::new(id, KIND_NETWORK)
    }

    pub fn storage(id: impl Into<String>) -> Self {
        Self::new(id, KIND_STORAGE)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.attributes.set("occi.core.title", title.clone());
        self.title = Some(title);
        self
    }

    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_mixin(mut self, identifier: impl Into<String>) -> Self {
        self.mixins.insert(identifier.into());
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.set(key, value);
    }

    pub fn attach_mixin(&mut self, identifier: impl Into<String>) {
        self.mixins.insert(identifier.into());
    }

    pub fn add_link(&mut self, link: Link) {
        self.links.push(link);
    }

    /// Enabled action terms, recomputed from the current state
    pub fn actions(&self) -> &'static [&'static str] {
        self.state.map(|s| s.actions()).unwrap_or(&[])
    }

    pub fn set_compute_state(&mut self, state: ComputeState) {
        self.state = Some(ResourceState::Compute(state));
    }

    pub fn set_network_state(&mut self, state: NetworkState) {
        self.state = Some(ResourceState::Network(state));
    }

    pub fn set_storage_state(&mut self, state: StorageState) {
        self.state = Some(ResourceState::Storage(state));
    }

    /// Mixins whose term starts with the given prefix
    pub fn mixins_with_term_prefix(&self, prefix: &str) -> Vec<&str> {
        self.mixins
            .iter()
            .filter(|m| m.rsplit('#').next().map(|t| t.starts_with(prefix)) == Some(true))
            .map(|m| m.as_str())
            .collect()
    }

    /// The single mixin instance depending on the given parent identifier.
    /// Dependence is encoded positionally: instance identifiers carry the
    /// parent's term as a path segment in their scheme
    /// (e.g. `.../infrastructure/os_tpl#uuid_debian_12`).
    pub fn mixin_instances_of(&self, parent_term: &str) -> Vec<&str> {
        let needle = format!("/{}#", parent_term);
        self.mixins
            .iter()
            .filter(|m| m.contains(&needle))
            .map(|m| m.as_str())
            .collect()
    }

    /// Exactly-one rule for template-class mixins; zero or multiple is a
    /// validation failure
    pub fn require_single_mixin(&self, parent_term: &str) -> Result<&str> {
        let matches = self.mixin_instances_of(parent_term);
        match matches.len() {
            1 => Ok(matches[0]),
            0 => Err(Error::ResourceNotValid(format!(
                "exactly one {} mixin required, none attached",
                parent_term
            ))),
            n => Err(Error::ResourceNotValid(format!(
                "exactly one {} mixin required, {} attached",
                parent_term, n
            ))),
        }
    }

    /// Synthesize a placeholder target for a link whose real target cannot
    /// be resolved. The placeholder carries an explanatory title and a
    /// generated identifier derived from the link id.
    pub fn placeholder_for(link_id: &str, kind_term: &str, reason: &str) -> Self {
        let id = format!("generated_{}", link_id);
        Self::new(id, kind_term).with_title(format!(
            "Placeholder for an unresolvable target of link {}: {}",
            link_id, reason
        ))
    }

    /// Replace a link's target with a placeholder resource
    pub fn placeholder_target(link: &Link, reason: &str) -> LinkTarget {
        let resource = Self::placeholder_for(&link.id, link.kind.rel_term(), reason);
        LinkTarget::Placeholder {
            resource: Box::new(resource),
        }
    }

    /// Links of one kind
    pub fn links_of(&self, kind: LinkKind) -> Vec<&Link> {
        self.links.iter().filter(|l| l.kind == kind).collect()
    }
}
