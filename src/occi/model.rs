//! Shared capability model
//!
//! The model holds every kind, mixin and action the bridge advertises. It is
//! populated once at startup: the packaged skeleton mixins (`os_tpl`,
//! `resource_tpl`, `availability_zone`, `floating_ip_pool`) are joined by one
//! concrete instance per platform object the active backend discovers, each
//! rewritten into a backend-specific namespace. The model is read-only from
//! the request path afterwards.

use super::category::{Action, Kind, Mixin};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Skeleton mixin terms replaced during model extension
pub const SKELETON_TERMS: &[&str] = &[
    "os_tpl",
    "resource_tpl",
    "availability_zone",
    "floating_ip_pool",
];

// =============================================================================
// Sanitization
// =============================================================================

/// Sanitize a platform object name for embedding in a mixin term: lower-case,
/// non-alphanumeric runs collapsed to single underscores, leading/trailing
/// underscores stripped.
pub fn sanitize_term(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Template/mixin term for a discovered platform object
pub fn template_term(name: &str, platform_id: &str) -> String {
    format!("uuid_{}_{}", sanitize_term(name), platform_id)
}

// =============================================================================
// Model
// =============================================================================

/// The capability model: kinds, mixins and actions keyed by identifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    kinds: BTreeMap<String, Kind>,
    mixins: BTreeMap<String, Mixin>,
    actions: BTreeMap<String, Action>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Model pre-populated with the infrastructure kinds and skeleton mixins
    /// the bridge always serves
    pub fn infrastructure() -> Self {
        let mut model = Self::new();
        for (term, location) in [
            ("compute", "/compute/"),
            ("network", "/network/"),
            ("storage", "/storage/"),
            ("networkinterface", "/link/networkinterface/"),
            ("storagelink", "/link/storagelink/"),
            ("securitygroup", "/securitygroup/"),
            ("ipreservation", "/ipreservation/"),
        ] {
            model.add_kind(Kind::new(term, location));
        }
        for term in SKELETON_TERMS {
            model.add_mixin(
                Mixin::new("http://schemas.ogf.org/occi/infrastructure#", *term)
                    .with_location(format!("/mixin/{}/", term)),
            );
        }
        model
    }

    pub fn add_kind(&mut self, kind: Kind) {
        self.kinds.insert(kind.identifier(), kind);
    }

    pub fn add_mixin(&mut self, mixin: Mixin) {
        self.mixins.insert(mixin.identifier(), mixin);
    }

    pub fn add_action(&mut self, action: Action) {
        self.actions.insert(action.identifier(), action);
    }

    pub fn kind(&self, identifier: &str) -> Option<&Kind> {
        self.kinds.get(identifier)
    }

    pub fn mixin(&self, identifier: &str) -> Option<&Mixin> {
        self.mixins.get(identifier)
    }

    pub fn mixins(&self) -> impl Iterator<Item = &Mixin> {
        self.mixins.values()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &Kind> {
        self.kinds.values()
    }

    /// The skeleton mixin for a category term. Absence is a packaging
    /// defect, not a transient condition.
    pub fn skeleton(&self, term: &str) -> Result<&Mixin> {
        self.mixins
            .values()
            .find(|m| m.term() == term && m.depends.is_empty())
            .ok_or_else(|| {
                Error::Internal(format!("skeleton mixin for category {} not found", term))
            })
    }

    /// Register one concrete instance of a skeleton category, discovered
    /// from a platform object. The instance's scheme and location are
    /// rewritten into the backend's namespace and it depends on the
    /// skeleton, so clients can disambiguate origin.
    pub fn extend_with(
        &mut self,
        skeleton_term: &str,
        backend_namespace: &str,
        name: &str,
        platform_id: &str,
    ) -> Result<String> {
        let skeleton = self.skeleton(skeleton_term)?;
        let skeleton_id = skeleton.identifier();

        let term = template_term(name, platform_id);
        let mixin = Mixin::new(
            format!("{}/{}#", backend_namespace.trim_end_matches('/'), skeleton_term),
            term.clone(),
        )
        .with_title(name.to_string())
        .with_location(format!("/mixin/{}/{}/", skeleton_term, term))
        .depends_on(skeleton_id);

        let identifier = mixin.identifier();
        self.add_mixin(mixin);
        Ok(identifier)
    }

    /// Drop every backend-contributed mixin, keeping skeletons; used on
    /// refresh before re-extension
    pub fn reset_extensions(&mut self) {
        self.mixins.retain(|_, m| m.depends.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_sanitize_term_rules() {
        assert_eq!(sanitize_term("Debian 12 (x86_64)"), "debian_12_x86_64");
        assert_eq!(sanitize_term("--CentOS--7--"), "centos_7");
        assert_eq!(sanitize_term("ubuntu"), "ubuntu");
        assert_eq!(sanitize_term("A  B"), "a_b");
    }

    #[test]
    fn test_template_term_format() {
        assert_eq!(
            template_term("Debian 12", "137"),
            "uuid_debian_12_137"
        );
    }

    #[test]
    fn test_infrastructure_model_has_skeletons() {
        let model = Model::infrastructure();
        assert!(model.skeleton("os_tpl").is_ok());
        assert!(model.skeleton("resource_tpl").is_ok());
        assert!(model.kind("http://schemas.ogf.org/occi/infrastructure#compute").is_some());
    }

    #[test]
    fn test_missing_skeleton_is_internal_error() {
        let model = Model::new();
        assert_matches!(model.skeleton("os_tpl"), Err(Error::Internal(_)));
    }

    #[test]
    fn test_extension_rewrites_namespace_and_depends() {
        let mut model = Model::infrastructure();
        let id = model
            .extend_with("os_tpl", "http://example.org/occi/opennebula", "Debian 12", "137")
            .unwrap();

        assert_eq!(
            id,
            "http://example.org/occi/opennebula/os_tpl#uuid_debian_12_137"
        );
        let mixin = model.mixin(&id).unwrap();
        assert_eq!(
            mixin.depends,
            vec!["http://schemas.ogf.org/occi/infrastructure#os_tpl".to_string()]
        );
        assert_eq!(
            mixin.location.as_deref(),
            Some("/mixin/os_tpl/uuid_debian_12_137/")
        );
    }

    #[test]
    fn test_reset_extensions_keeps_skeletons() {
        let mut model = Model::infrastructure();
        model
            .extend_with("resource_tpl", "http://example.org/occi/ec2", "t2.micro", "t2micro")
            .unwrap();
        let before = model.mixins().count();
        model.reset_extensions();
        assert_eq!(model.mixins().count(), before - 1);
        assert!(model.skeleton("resource_tpl").is_ok());
    }
}
