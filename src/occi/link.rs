//! Links between resources
//!
//! Link identifiers are deterministically derived from the owning resource's
//! identifier plus a platform-native sub-identifier, so they can be
//! re-derived at any time without a separate index:
//! `{ownerKind}_{ownerId}_{subtype}_{subId}` (e.g. `compute_42_nic_3`,
//! `compute_i-22af91c7_disk_vol-0b15340c`).

use super::attribute::Attributes;
use super::resource::Resource;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Link Kind
// =============================================================================

/// Kind of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    NetworkInterface,
    StorageLink,
    SecurityGroupLink,
}

impl LinkKind {
    /// OCCI kind term
    pub fn term(&self) -> &'static str {
        match self {
            LinkKind::NetworkInterface => "networkinterface",
            LinkKind::StorageLink => "storagelink",
            LinkKind::SecurityGroupLink => "securitygrouplink",
        }
    }

    /// Sub-identifier tag used inside composite link ids
    pub fn subtype(&self) -> &'static str {
        match self {
            LinkKind::NetworkInterface => "nic",
            LinkKind::StorageLink => "disk",
            LinkKind::SecurityGroupLink => "sg",
        }
    }

    /// Term of the target's kind (`rel`)
    pub fn rel_term(&self) -> &'static str {
        match self {
            LinkKind::NetworkInterface => "network",
            LinkKind::StorageLink => "storage",
            LinkKind::SecurityGroupLink => "securitygroup",
        }
    }

    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype {
            "nic" => Some(LinkKind::NetworkInterface),
            "disk" => Some(LinkKind::StorageLink),
            "sg" => Some(LinkKind::SecurityGroupLink),
            _ => None,
        }
    }
}

// =============================================================================
// Link Id
// =============================================================================

/// Parsed composite link identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkId {
    pub owner_kind: String,
    pub owner_id: String,
    pub kind: LinkKind,
    pub sub_id: String,
}

impl LinkId {
    pub fn derive(owner_kind: &str, owner_id: &str, kind: LinkKind, sub_id: &str) -> Self {
        // parse() splits the sub-id from the tail, so it must stay atomic
        debug_assert!(
            !sub_id.contains('_'),
            "sub-identifier {} would not survive a parse round-trip",
            sub_id
        );
        Self {
            owner_kind: owner_kind.to_string(),
            owner_id: owner_id.to_string(),
            kind,
            sub_id: sub_id.to_string(),
        }
    }

    /// Parse a composite id. Owner ids may themselves contain underscores;
    /// the subtype and sub-id are taken from the tail, which is unambiguous
    /// for every supported platform's native identifier scheme.
    pub fn parse(id: &str) -> Result<Self> {
        let parts: Vec<&str> = id.split('_').collect();
        if parts.len() < 4 {
            return Err(Error::IdentifierNotValid(id.to_string()));
        }

        let sub_id = parts[parts.len() - 1];
        let subtype = parts[parts.len() - 2];
        let kind = LinkKind::from_subtype(subtype)
            .ok_or_else(|| Error::IdentifierNotValid(id.to_string()))?;

        let owner_kind = parts[0];
        let owner_id = parts[1..parts.len() - 2].join("_");
        if owner_kind.is_empty() || owner_id.is_empty() || sub_id.is_empty() {
            return Err(Error::IdentifierNotValid(id.to_string()));
        }

        Ok(Self {
            owner_kind: owner_kind.to_string(),
            owner_id,
            kind,
            sub_id: sub_id.to_string(),
        })
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.owner_kind,
            self.owner_id,
            self.kind.subtype(),
            self.sub_id
        )
    }
}

// =============================================================================
// Link Target
// =============================================================================

/// Target of a link: a live resource reference, or a synthesized placeholder
/// when the real target can no longer be resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum LinkTarget {
    Reference { id: String },
    Placeholder { resource: Box<Resource> },
}

impl LinkTarget {
    pub fn reference(id: impl Into<String>) -> Self {
        LinkTarget::Reference { id: id.into() }
    }

    /// Identifier of the target, whichever form it takes
    pub fn id(&self) -> &str {
        match self {
            LinkTarget::Reference { id } => id,
            LinkTarget::Placeholder { resource } => &resource.id,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, LinkTarget::Placeholder { .. })
    }
}

// =============================================================================
// Link
// =============================================================================

/// Directed edge from an owning resource to a target resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub kind: LinkKind,
    /// Identifier of the owning (source) resource
    pub source: String,
    pub target: LinkTarget,
    /// Identifier of the target's kind term
    pub rel: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Link {
    /// Build a link with its identifier derived from owner and sub-object
    pub fn derive(owner_kind: &str, owner_id: &str, kind: LinkKind, sub_id: &str) -> Self {
        let link_id = LinkId::derive(owner_kind, owner_id, kind, sub_id);
        let mut attributes = Attributes::new();
        attributes.set("occi.core.id", link_id.to_string());
        attributes.set("occi.core.source", format!("/{}/{}", owner_kind, owner_id));
        Self {
            id: link_id.to_string(),
            kind,
            source: owner_id.to_string(),
            target: LinkTarget::reference(sub_id),
            rel: kind.rel_term().to_string(),
            attributes,
        }
    }

    pub fn with_target(mut self, target: LinkTarget) -> Self {
        self.target = target;
        self
    }

    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<super::attribute::AttributeValue>,
    ) {
        self.attributes.set(key, value);
    }
}
