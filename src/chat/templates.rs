//! Community chat-template resolution and caching.
//!
//! A template name maps to a JSON descriptor (`generation_configs/<name>.json`)
//! which references a template-text asset under `chat_templates/`. The loaded
//! bundle is memoized for the process lifetime; in the current deployment only
//! one name is ever resolved, but the cache is a generic key → value map so a
//! future configuration can vary it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};

/// Template-derived generation settings: an optional system prompt, an
/// optional stop string, and the normalized single-line template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationConfig {
    pub system_prompt: Option<String>,
    pub stop_str: Option<String>,
    pub template: String,
}

/// On-disk descriptor format. `stop_str`/`system_prompt` default to empty
/// strings in the published community files, so both are optional here.
#[derive(Debug, Deserialize)]
struct TemplateDescriptor {
    chat_template: String,
    #[serde(default)]
    stop_str: String,
    #[serde(default)]
    system_prompt: String,
}

/// A memoized load failure. Stored so that repeated resolution of a broken
/// name fails identically without re-reading assets; only `clear()` retries.
#[derive(Debug, Clone)]
enum LoadError {
    NotFound { path: String },
    Malformed { reason: String },
}

impl LoadError {
    fn into_error(self, name: &str) -> Error {
        match self {
            LoadError::NotFound { path } => Error::TemplateNotFound {
                name: name.to_string(),
                path,
            },
            LoadError::Malformed { reason } => Error::TemplateMalformed {
                name: name.to_string(),
                reason,
            },
        }
    }
}

#[derive(Clone)]
enum CacheSlot {
    Ready(Arc<GenerationConfig>),
    Failed(LoadError),
}

/// Memoizing loader for community chat templates.
///
/// The entry map lock is held across the asset load, so concurrent first-time
/// resolution of the same name performs exactly one load.
pub struct TemplateCache {
    root: PathBuf,
    entries: Mutex<HashMap<String, CacheSlot>>,
    loads: AtomicUsize,
}

impl TemplateCache {
    /// Cache rooted at a directory containing `generation_configs/` and
    /// `chat_templates/`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Cache over the assets shipped with this crate.
    pub fn bundled() -> Self {
        Self::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("assets"))
    }

    /// Resolve a template name to its generation config, loading and
    /// memoizing on first use.
    pub fn resolve(&self, name: &str) -> Result<Arc<GenerationConfig>> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(slot) = entries.get(name) {
            return match slot.clone() {
                CacheSlot::Ready(config) => Ok(config),
                CacheSlot::Failed(err) => Err(err.into_error(name)),
            };
        }

        info!(template = name, "loading community chat template");
        self.loads.fetch_add(1, Ordering::SeqCst);
        let loaded = self.load(name);
        let slot = match &loaded {
            Ok(config) => CacheSlot::Ready(config.clone()),
            Err(err) => CacheSlot::Failed(err.clone()),
        };
        entries.insert(name.to_string(), slot);
        loaded.map_err(|err| err.into_error(name))
    }

    fn load(&self, name: &str) -> std::result::Result<Arc<GenerationConfig>, LoadError> {
        let descriptor_path = self
            .root
            .join("generation_configs")
            .join(format!("{name}.json"));
        let raw = fs::read_to_string(&descriptor_path).map_err(|_| LoadError::NotFound {
            path: descriptor_path.display().to_string(),
        })?;
        let descriptor: TemplateDescriptor =
            serde_json::from_str(&raw).map_err(|e| LoadError::Malformed {
                reason: e.to_string(),
            })?;
        if descriptor.chat_template.is_empty() {
            return Err(LoadError::Malformed {
                reason: "`chat_template` is empty".to_string(),
            });
        }

        // The descriptor stores a repo-relative path; only the file name
        // selects the asset.
        let file_name = descriptor
            .chat_template
            .rsplit('/')
            .next()
            .unwrap_or(descriptor.chat_template.as_str());
        let template_path = self.root.join("chat_templates").join(file_name);
        let template_raw = fs::read_to_string(&template_path).map_err(|_| LoadError::NotFound {
            path: template_path.display().to_string(),
        })?;

        // Assets are indented for readability; the template must be usable
        // as a single-line string.
        let template = template_raw.replace("    ", "").replace('\n', "");

        Ok(Arc::new(GenerationConfig {
            system_prompt: non_empty(descriptor.system_prompt),
            stop_str: non_empty(descriptor.stop_str),
            template,
        }))
    }

    /// Number of asset loads performed (cache misses, successful or not).
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Drop all memoized entries, including memoized failures.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn cache_with_assets(descriptor: &str, template: Option<&str>) -> (TempDir, TemplateCache) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("generation_configs")).unwrap();
        fs::create_dir_all(dir.path().join("chat_templates")).unwrap();
        fs::write(
            dir.path().join("generation_configs/test.json"),
            descriptor,
        )
        .unwrap();
        if let Some(text) = template {
            fs::write(dir.path().join("chat_templates/test.jinja"), text).unwrap();
        }
        let cache = TemplateCache::new(dir.path());
        (dir, cache)
    }

    const DESCRIPTOR: &str = r#"{
        "chat_template": "chat_templates/test.jinja",
        "stop_str": "</s>",
        "system_prompt": "be terse"
    }"#;

    #[test]
    fn test_resolve_loads_and_normalizes() {
        let (_dir, cache) = cache_with_assets(
            DESCRIPTOR,
            Some("{% for m in messages %}\n    {{ m.content }}\n{% endfor %}\n"),
        );
        let config = cache.resolve("test").unwrap();
        assert_eq!(config.stop_str.as_deref(), Some("</s>"));
        assert_eq!(config.system_prompt.as_deref(), Some("be terse"));
        assert_eq!(
            config.template,
            "{% for m in messages %}{{ m.content }}{% endfor %}"
        );
    }

    #[test]
    fn test_resolve_is_memoized() {
        let (_dir, cache) = cache_with_assets(DESCRIPTOR, Some("{{ messages }}"));
        let first = cache.resolve("test").unwrap();
        let second = cache.resolve("test").unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.load_count(), 1);
    }

    #[test]
    fn test_missing_descriptor_is_not_found() {
        let dir = TempDir::new().unwrap();
        let cache = TemplateCache::new(dir.path());
        assert!(matches!(
            cache.resolve("absent"),
            Err(Error::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_template_asset_is_not_found() {
        let (_dir, cache) = cache_with_assets(DESCRIPTOR, None);
        assert!(matches!(
            cache.resolve("test"),
            Err(Error::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn test_descriptor_without_template_field_is_malformed() {
        let (_dir, cache) =
            cache_with_assets(r#"{"stop_str": "</s>"}"#, Some("{{ messages }}"));
        assert!(matches!(
            cache.resolve("test"),
            Err(Error::TemplateMalformed { .. })
        ));
    }

    #[test]
    fn test_failed_loads_are_memoized_until_cleared() {
        let dir = TempDir::new().unwrap();
        let cache = TemplateCache::new(dir.path());
        assert!(cache.resolve("absent").is_err());
        assert!(cache.resolve("absent").is_err());
        assert_eq!(cache.load_count(), 1);

        cache.clear();
        assert!(cache.resolve("absent").is_err());
        assert_eq!(cache.load_count(), 2);
    }

    #[test]
    fn test_empty_optional_fields_become_none() {
        let (_dir, cache) = cache_with_assets(
            r#"{"chat_template": "chat_templates/test.jinja", "stop_str": "", "system_prompt": ""}"#,
            Some("{{ messages }}"),
        );
        let config = cache.resolve("test").unwrap();
        assert_eq!(config.stop_str, None);
        assert_eq!(config.system_prompt, None);
    }

    #[test]
    fn test_bundled_assets_resolve() {
        let cache = TemplateCache::bundled();
        let config = cache.resolve("llama-2").unwrap();
        assert!(config.template.contains("[INST]"));
        assert!(!config.template.contains('\n'));
    }
}
