//! Categories: kinds, mixins, actions
//!
//! A category is identified by `scheme#term`. Kinds tag resources and links,
//! mixins contribute optional attribute sets, actions describe invocable
//! operations. Mixin instances discovered from a platform (os templates,
//! availability zones, ...) are produced by the model extender.

use super::attribute::Attributes;
use serde::{Deserialize, Serialize};

/// Core OCCI schemes
pub const CORE_SCHEME: &str = "http://schemas.ogf.org/occi/core#";
pub const INFRA_SCHEME: &str = "http://schemas.ogf.org/occi/infrastructure#";
pub const TEMPLATE_SCHEME: &str = "http://schemas.ogf.org/occi/infrastructure#";

// =============================================================================
// Category
// =============================================================================

/// Common identity shared by kinds, mixins and actions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub scheme: String,
    pub term: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Category {
    pub fn new(scheme: impl Into<String>, term: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            term: term.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Full `scheme#term` identifier. Schemes conventionally end in `#`.
    pub fn identifier(&self) -> String {
        format!("{}{}", self.scheme, self.term)
    }
}

// =============================================================================
// Kind
// =============================================================================

/// Type tag for resources and links
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kind {
    #[serde(flatten)]
    pub category: Category,
    /// Identifier of the parent kind, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// REST location, e.g. `/compute/`
    pub location: String,
}

impl Kind {
    pub fn new(term: &str, location: &str) -> Self {
        Self {
            category: Category::new(INFRA_SCHEME, term),
            parent: None,
            location: location.to_string(),
        }
    }

    pub fn identifier(&self) -> String {
        self.category.identifier()
    }

    pub fn term(&self) -> &str {
        &self.category.term
    }
}

// =============================================================================
// Mixin
// =============================================================================

/// Capability tag contributing optional typed attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mixin {
    #[serde(flatten)]
    pub category: Category,
    /// Identifiers of mixins this one depends on (e.g. an os_tpl instance
    /// depends on the generic os_tpl skeleton)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    /// REST location, e.g. `/mixin/os_tpl/debian12/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Names of the attributes this mixin contributes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
}

impl Mixin {
    pub fn new(scheme: impl Into<String>, term: impl Into<String>) -> Self {
        Self {
            category: Category::new(scheme, term),
            depends: vec![],
            location: None,
            attributes: vec![],
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.category.title = Some(title.into());
        self
    }

    pub fn depends_on(mut self, identifier: impl Into<String>) -> Self {
        self.depends.push(identifier.into());
        self
    }

    pub fn identifier(&self) -> String {
        self.category.identifier()
    }

    pub fn term(&self) -> &str {
        &self.category.term
    }
}

// =============================================================================
// Action
// =============================================================================

/// Invocable operation descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub category: Category,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
}

impl Action {
    pub fn new(scheme: impl Into<String>, term: impl Into<String>) -> Self {
        Self {
            category: Category::new(scheme, term),
            attributes: vec![],
        }
    }

    pub fn identifier(&self) -> String {
        self.category.identifier()
    }

    pub fn term(&self) -> &str {
        &self.category.term
    }
}

/// A concrete action invocation: the action plus caller-supplied attributes
/// (e.g. `method=graceful` on a stop)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInstance {
    pub action: Action,
    #[serde(default)]
    pub attributes: Attributes,
}

impl ActionInstance {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            attributes: Attributes::new(),
        }
    }

    /// Build from a bare term in the infrastructure compute action scheme
    pub fn compute(term: &str) -> Self {
        Self::new(Action::new(
            "http://schemas.ogf.org/occi/infrastructure/compute/action#",
            term,
        ))
    }

    pub fn network(term: &str) -> Self {
        Self::new(Action::new(
            "http://schemas.ogf.org/occi/infrastructure/network/action#",
            term,
        ))
    }

    pub fn storage(term: &str) -> Self {
        Self::new(Action::new(
            "http://schemas.ogf.org/occi/infrastructure/storage/action#",
            term,
        ))
    }

    pub fn term(&self) -> &str {
        self.action.term()
    }
}
