//! Resource/mixin collections and the fixture document shape
//!
//! Fixture files are JSON documents containing `resources` and/or `mixins`
//! arrays, one document per resource kind. The Dummy backend reads these at
//! construction; they also serve as the persisted state shape in the
//! key-value store.

use super::category::Mixin;
use super::resource::Resource;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A set of resources and mixins of one kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub mixins: Vec<Mixin>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a fixture document from disk. An absent file yields an empty
    /// collection so backends can start without per-kind fixtures.
    pub fn from_fixture_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let collection = serde_json::from_str(&raw)?;
        Ok(collection)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.mixins.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn remove(&mut self, id: &str) -> Option<Resource> {
        let idx = self.resources.iter().position(|r| r.id == id)?;
        Some(self.resources.remove(idx))
    }

    /// Resources carrying every mixin in `filter`. An empty filter matches
    /// everything.
    pub fn filtered(&self, filter: &[String]) -> Vec<&Resource> {
        self.resources
            .iter()
            .filter(|r| filter.iter().all(|m| r.mixins.contains(m)))
            .collect()
    }

    pub fn filtered_ids(&self, filter: &[String]) -> Vec<String> {
        self.filtered(filter).iter().map(|r| r.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_fixture_is_empty() {
        let collection =
            Collection::from_fixture_file(Path::new("/nonexistent/compute.json")).unwrap();
        assert!(collection.is_empty());
    }

    #[test]
    fn test_fixture_document_shape() {
        let doc = r#"{
            "resources": [
                {
                    "id": "c1",
                    "kind": "compute",
                    "title": "vm one",
                    "mixins": ["http://example.org/occi/infrastructure/os_tpl#uuid_debian_12_7"],
                    "attributes": {
                        "occi.core.id": "c1",
                        "occi.compute.cores": 2
                    }
                }
            ],
            "mixins": [
                {
                    "scheme": "http://example.org/occi/infrastructure/os_tpl#",
                    "term": "uuid_debian_12_7",
                    "title": "debian12"
                }
            ]
        }"#;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compute.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(doc.as_bytes()).unwrap();

        let collection = Collection::from_fixture_file(&path).unwrap();
        assert_eq!(collection.resources.len(), 1);
        assert_eq!(collection.mixins.len(), 1);
        let res = collection.find("c1").unwrap();
        assert_eq!(res.attributes.get_int("occi.compute.cores"), Some(2));
    }

    #[test]
    fn test_filter_requires_all_mixins() {
        let mut collection = Collection::new();
        collection.resources.push(
            Resource::compute("a").with_mixin("m#one").with_mixin("m#two"),
        );
        collection.resources.push(Resource::compute("b").with_mixin("m#one"));

        assert_eq!(collection.filtered(&[]).len(), 2);
        assert_eq!(collection.filtered(&["m#one".into()]).len(), 2);
        assert_eq!(
            collection.filtered_ids(&["m#one".into(), "m#two".into()]),
            vec!["a".to_string()]
        );
        assert!(collection.filtered(&["m#three".into()]).is_empty());
    }
}
