//! Platform payload templating
//!
//! Backends that allocate via opaque vendor templates (OpenNebula) render
//! them from named template files plus a flat data context. Rendering is a
//! plain `{{key}}` substitution; anything richer belongs in the template
//! files themselves.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;

/// Flat string context for template rendering
pub type TemplateContext = BTreeMap<String, String>;

/// File-backed template store with a read-through cache
pub struct TemplateStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn load(&self, name: &str) -> Result<String> {
        if let Some(body) = self.cache.read().get(name) {
            return Ok(body.clone());
        }

        let path = self.dir.join(name);
        let body = std::fs::read_to_string(&path).map_err(|_| {
            Error::Configuration(format!("template {} not found in {}", name, self.dir.display()))
        })?;
        self.cache.write().insert(name.to_string(), body.clone());
        Ok(body)
    }

    /// Render a named template against a context. Unreferenced context keys
    /// are ignored; unresolved `{{key}}` markers are left in place so the
    /// platform rejects them visibly instead of silently dropping fields.
    pub fn render(&self, name: &str, context: &TemplateContext) -> Result<String> {
        let mut body = self.load(name)?;
        for (key, value) in context {
            body = body.replace(&format!("{{{{{}}}}}", key), value);
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_render_substitutes_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compute.tpl");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "NAME=\"{{{{name}}}}\"\nVCPU={{{{cores}}}}\n").unwrap();

        let store = TemplateStore::new(dir.path());
        let mut ctx = TemplateContext::new();
        ctx.insert("name".into(), "vm-1".into());
        ctx.insert("cores".into(), "4".into());

        let body = store.render("compute.tpl", &ctx).unwrap();
        assert_eq!(body, "NAME=\"vm-1\"\nVCPU=4\n");
    }

    #[test]
    fn test_missing_template_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        assert_matches!(
            store.render("absent.tpl", &TemplateContext::new()),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_unresolved_markers_stay_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.tpl");
        std::fs::write(&path, "A={{a}} B={{b}}").unwrap();

        let store = TemplateStore::new(dir.path());
        let mut ctx = TemplateContext::new();
        ctx.insert("a".into(), "1".into());

        assert_eq!(store.render("t.tpl", &ctx).unwrap(), "A=1 B={{b}}");
    }
}
