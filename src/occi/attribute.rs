//! Typed attribute maps
//!
//! OCCI attributes are namespaced string keys with typed values
//! (`occi.core.id`, `occi.compute.cores`, ...). Access goes through typed
//! accessors so a wrong-typed or missing mandatory attribute surfaces as a
//! taxonomy error instead of a silent default.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// Attribute Value
// =============================================================================

/// A single attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Int(_) => "int",
            AttributeValue::Float(_) => "float",
            AttributeValue::Str(_) => "string",
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{}", v),
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Str(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Str(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// Insertion-ordered attribute map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(IndexMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.0.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    /// Optional string attribute
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(AttributeValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Optional integer attribute; string digits are not coerced
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(AttributeValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Optional float attribute; integers widen
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(AttributeValue::Float(v)) => Some(*v),
            Some(AttributeValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    /// Mandatory string attribute
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            Some(AttributeValue::Str(s)) => Ok(s),
            Some(other) => Err(Error::ArgumentTypeMismatch {
                argument: key.to_string(),
                expected: format!("string, got {}", other.type_name()),
            }),
            None => Err(Error::Argument(key.to_string())),
        }
    }

    /// Mandatory integer attribute
    pub fn require_int(&self, key: &str) -> Result<i64> {
        match self.0.get(key) {
            Some(AttributeValue::Int(v)) => Ok(*v),
            Some(other) => Err(Error::ArgumentTypeMismatch {
                argument: key.to_string(),
                expected: format!("int, got {}", other.type_name()),
            }),
            None => Err(Error::Argument(key.to_string())),
        }
    }

    /// Copy a fixed set of keys from `other`, skipping absent ones. The
    /// transfer-table pattern used by resource translators.
    pub fn project_from(&mut self, other: &Attributes, keys: &[&str]) {
        for key in keys {
            if let Some(value) = other.get(key) {
                self.0.insert((*key).to_string(), value.clone());
            }
        }
    }

    /// Overlay all entries from `other`, replacing existing keys
    pub fn merge(&mut self, other: &Attributes) {
        for (k, v) in other.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
