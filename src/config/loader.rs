//! Settings loader
//!
//! Loads the settings file and its `config.d/*.yaml` drop-ins. Later
//! documents override earlier ones key by key.

use super::{DEFAULT_SETTINGS_PATH, Settings};
use crate::NetconfError;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Load settings from `path` (or the default location) and its drop-ins
pub async fn load_settings(path: Option<&Path>) -> Result<Settings, NetconfError> {
    let mut loader = SettingsLoader::new();
    if let Some(path) = path {
        loader = loader.with_file(path);
    }
    loader.load().await
}

/// Settings loader builder
pub struct SettingsLoader {
    file: PathBuf,
    include_dropins: bool,
}

impl SettingsLoader {
    /// Create a loader for the default settings location
    pub fn new() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_SETTINGS_PATH),
            include_dropins: true,
        }
    }

    /// Use a different settings file
    pub fn with_file(mut self, file: impl AsRef<Path>) -> Self {
        self.file = file.as_ref().to_path_buf();
        self
    }

    /// Skip `config.d` drop-ins
    pub fn skip_dropins(mut self) -> Self {
        self.include_dropins = false;
        self
    }

    /// Load and merge all settings documents
    pub async fn load(&self) -> Result<Settings, NetconfError> {
        let mut merged = Value::Mapping(Default::default());

        if let Some(doc) = load_document(&self.file).await? {
            debug!("Loaded settings from {}", self.file.display());
            merged = merge_yaml_values(&merged, &doc);
        }

        if self.include_dropins {
            let dropin_dir = self
                .file
                .parent()
                .map(|p| p.join("config.d"))
                .unwrap_or_else(|| PathBuf::from("config.d"));
            for doc in load_dropins(&dropin_dir).await? {
                merged = merge_yaml_values(&merged, &doc);
            }
        }

        serde_yaml::from_value(merged).map_err(|e| {
            NetconfError::Config(format!("Invalid settings in {}: {}", self.file.display(), e))
        })
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Load one YAML document; missing or unparsable files yield `None`
async fn load_document(path: &Path) -> Result<Option<Value>, NetconfError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(None);
    }

    match serde_yaml::from_str::<Value>(&content) {
        Ok(value @ Value::Mapping(_)) => Ok(Some(value)),
        Ok(_) => {
            warn!("Ignoring {}: not a mapping", path.display());
            Ok(None)
        }
        Err(e) => {
            warn!("Failed to parse {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Load all drop-ins from a directory (sorted alphabetically)
async fn load_dropins(dir: &Path) -> Result<Vec<Value>, NetconfError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    let mut read_dir = fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml")
        {
            entries.push(path);
        }
    }
    entries.sort();

    let mut docs = Vec::new();
    for path in entries {
        if let Some(doc) = load_document(&path).await? {
            debug!("Loaded settings drop-in {}", path.display());
            docs.push(doc);
        }
    }

    if !docs.is_empty() {
        info!("Loaded {} settings drop-ins", docs.len());
    }
    Ok(docs)
}

/// Overlay `overlay` onto `base`; nested mappings merge, everything else replaces
fn merge_yaml_values(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut result = base_map.clone();
            for (key, value) in overlay_map {
                let merged = match base_map.get(key) {
                    Some(existing) => merge_yaml_values(existing, value),
                    None => value.clone(),
                };
                result.insert(key.clone(), merged);
            }
            Value::Mapping(result)
        }
        (_, Value::Null) => base.clone(),
        (_, overlay) => overlay.clone(),
    }
}
