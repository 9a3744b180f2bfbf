//! API key storage
//!
//! A single capability, [`CredentialStore`], with interchangeable backends.
//! The front-end picks and layers backends once at startup; call sites only
//! ever see the trait.

use crate::config::config::CredentialConfig;
use crate::utils::app_paths::AppPaths;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// Key under which the API key is stored in every backend
pub const API_KEY_NAME: &str = "sltax_api_key";

/// Environment variable read by [`EnvCredentialStore`]
pub const API_KEY_ENV: &str = "SLTAX_API_KEY";

pub trait CredentialStore: Send + Sync {
    /// Stored value, or `None` when absent or unreadable
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Stores that never accept writes are skipped by layered writes
    fn is_read_only(&self) -> bool {
        false
    }

    /// Backend name for log lines
    fn name(&self) -> &str;
}

/// Non-empty value or nothing
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(api_key: &str) -> Self {
        let store = Self::new();
        if let Ok(mut values) = store.values.write() {
            values.insert(API_KEY_NAME.to_string(), api_key.to_string());
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.read().ok()?;
        present(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| anyhow!("credential store lock poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Read-only store backed by an environment variable
pub struct EnvCredentialStore {
    var: String,
}

impl EnvCredentialStore {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentialStore {
    fn default() -> Self {
        Self::new(API_KEY_ENV)
    }
}

impl CredentialStore for EnvCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        if key != API_KEY_NAME {
            return None;
        }
        present(std::env::var(&self.var).ok())
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        bail!("{} is read-only; unset it to use stored keys", self.var)
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "environment"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Toml,
    Json,
}

/// Parsed contents of a credential file. Only string entries are read or
/// written; anything else in the file is carried through untouched.
enum Document {
    Toml(toml::Table),
    Json(serde_json::Map<String, serde_json::Value>),
}

impl Document {
    fn empty(format: FileFormat) -> Self {
        match format {
            FileFormat::Toml => Document::Toml(toml::Table::new()),
            FileFormat::Json => Document::Json(serde_json::Map::new()),
        }
    }

    fn get_str(&self, key: &str) -> Option<String> {
        match self {
            Document::Toml(table) => table.get(key)?.as_str().map(str::to_string),
            Document::Json(map) => map.get(key)?.as_str().map(str::to_string),
        }
    }

    fn insert_str(&mut self, key: &str, value: &str) {
        match self {
            Document::Toml(table) => {
                table.insert(key.to_string(), toml::Value::String(value.to_string()));
            }
            Document::Json(map) => {
                map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn render(&self) -> Result<String> {
        Ok(match self {
            Document::Toml(table) => toml::to_string_pretty(table)?,
            Document::Json(map) => serde_json::to_string_pretty(map)?,
        })
    }
}

/// Key-value file; other entries sharing the file are preserved on write
pub struct FileCredentialStore {
    path: PathBuf,
    format: FileFormat,
    label: &'static str,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>, format: FileFormat) -> Self {
        let label = match format {
            FileFormat::Toml => "settings",
            FileFormat::Json => "local",
        };
        Self {
            path: path.into(),
            format,
            label,
            write_lock: Mutex::new(()),
        }
    }

    /// TOML settings file, standing in for the host's roaming settings
    pub fn settings(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileFormat::Toml)
    }

    /// JSON key-value file, standing in for browser local storage
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileFormat::Json)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Document> {
        if !self.path.exists() {
            return Ok(Document::empty(self.format));
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Document::empty(self.format));
        }
        let document = match self.format {
            FileFormat::Toml => Document::Toml(
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse {}", self.path.display()))?,
            ),
            FileFormat::Json => Document::Json(
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse {}", self.path.display()))?,
            ),
        };
        Ok(document)
    }

    fn save(&self, document: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, document.render()?)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.load() {
            Ok(document) => present(document.get_str(key)),
            Err(e) => {
                warn!("Ignoring unreadable {} store: {:#}", self.label, e);
                None
            }
        }
    }

    /// Refuses to write over a file it cannot parse
    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("credential file lock poisoned"))?;
        let mut document = self.load()?;
        document.insert_str(key, value);
        self.save(&document)
    }

    fn name(&self) -> &str {
        self.label
    }
}

/// Primary backend with a fallback behind it
pub struct LayeredCredentialStore {
    primary: Arc<dyn CredentialStore>,
    fallback: Arc<dyn CredentialStore>,
}

impl LayeredCredentialStore {
    pub fn new(primary: Arc<dyn CredentialStore>, fallback: Arc<dyn CredentialStore>) -> Self {
        Self { primary, fallback }
    }
}

impl CredentialStore for LayeredCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.primary.get(key) {
            debug!("Credential '{}' found in {} store", key, self.primary.name());
            return Some(value);
        }
        let value = self.fallback.get(key);
        if value.is_some() {
            debug!("Credential '{}' found in {} store", key, self.fallback.name());
        }
        value
    }

    /// Writes to every writable layer; succeeds if any accepted the value
    fn set(&self, key: &str, value: &str) -> Result<()> {
        let writable: Vec<&Arc<dyn CredentialStore>> = [&self.primary, &self.fallback]
            .into_iter()
            .filter(|store| !store.is_read_only())
            .collect();
        if writable.is_empty() {
            bail!("No writable credential store for '{}'", key);
        }

        let mut accepted = false;
        let mut last_error = None;
        for store in writable {
            match store.set(key, value) {
                Ok(()) => accepted = true,
                Err(e) => {
                    warn!("{} store rejected '{}': {:#}", store.name(), key, e);
                    last_error = Some(e);
                }
            }
        }

        match (accepted, last_error) {
            (false, Some(e)) => Err(e.context(format!("No credential store accepted '{}'", key))),
            _ => Ok(()),
        }
    }

    fn is_read_only(&self) -> bool {
        self.primary.is_read_only() && self.fallback.is_read_only()
    }

    fn name(&self) -> &str {
        "layered"
    }
}

/// Compose the backends named in the config: environment (if enabled) over
/// the settings file over the local file.
pub fn from_config(config: &CredentialConfig) -> Result<Arc<dyn CredentialStore>> {
    let settings_path = match &config.settings_file {
        Some(path) => path.clone(),
        None => AppPaths::settings_file()?,
    };
    let fallback_path = match &config.fallback_file {
        Some(path) => path.clone(),
        None => AppPaths::credentials_file()?,
    };

    let files: Arc<dyn CredentialStore> = Arc::new(LayeredCredentialStore::new(
        Arc::new(FileCredentialStore::settings(settings_path)),
        Arc::new(FileCredentialStore::local(fallback_path)),
    ));

    if config.use_env {
        Ok(Arc::new(LayeredCredentialStore::new(
            Arc::new(EnvCredentialStore::default()),
            files,
        )))
    } else {
        Ok(files)
    }
}
