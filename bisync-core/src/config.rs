use crate::diff::Rounding;
use crate::error::{Result, SyncError};
use crate::filter::PathFilter;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Glob pattern (wrapper type for clarity), compiled by [`crate::PathFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern(pub String);

/// Connection parameters for one remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "Endpoint::default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Inline private key (OpenSSH or PEM text).
    #[serde(default)]
    pub private_key: Option<String>,
    /// Key file, `~/.ssh/id_rsa` when neither a password nor an inline key is given.
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Allowed host key fingerprints (OpenSSH SHA256) or base64 keys.
    #[serde(default)]
    pub fingerprints: Option<Vec<String>>,
}

impl Endpoint {
    fn default_port() -> u16 {
        22
    }

    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    #[default]
    None,
    Errors,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    #[serde(default)]
    pub notify: NotifyLevel,
    #[serde(default)]
    pub include: Vec<Pattern>,
    #[serde(default)]
    pub exclude: Vec<Pattern>,
    #[serde(default = "SyncOptions::default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "SyncOptions::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Max retry attempts for a single remote operation
    #[serde(default = "SyncOptions::default_retry_max")]
    pub retry_max: u32,
    /// Initial backoff in ms for retries (exponential)
    #[serde(default = "SyncOptions::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub rounding: Rounding,
}

impl SyncOptions {
    fn default_debounce_ms() -> u64 { 150 }
    fn default_timeout_secs() -> u64 { 60 }
    fn default_retry_max() -> u32 { 3 }
    fn default_retry_backoff_ms() -> u64 { 500 }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            notify: NotifyLevel::default(),
            include: Vec::new(),
            exclude: Vec::new(),
            debounce_ms: Self::default_debounce_ms(),
            timeout_secs: Self::default_timeout_secs(),
            retry_max: Self::default_retry_max(),
            retry_backoff_ms: Self::default_retry_backoff_ms(),
            rounding: Rounding::default(),
        }
    }
}

/// One configured local/remote directory pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(skip)]
    pub name: String,
    pub local: PathBuf,
    pub remote: String,
    pub endpoint: Endpoint,
    #[serde(default)]
    pub options: SyncOptions,
}

impl Mapping {
    /// Remote path of a root-relative `rel` path (`""` is the root itself).
    pub fn remote_path(&self, rel: &str) -> String {
        crate::utils::join_remote(&self.remote, rel)
    }

    fn normalize(&mut self) {
        let local = self.local.to_string_lossy();
        let trimmed = local.trim_end_matches(['/', '\\']);
        if !trimmed.is_empty() && trimmed.len() != local.len() {
            self.local = PathBuf::from(trimmed);
        }
        let remote = self.remote.trim_end_matches('/');
        self.remote = if remote.is_empty() && self.remote.starts_with('/') {
            "/".to_string()
        } else {
            remote.to_string()
        };
    }

    fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.local.as_os_str().is_empty() {
            missing.push("local");
        }
        if self.remote.is_empty() {
            missing.push("remote");
        }
        if self.endpoint.host.trim().is_empty() {
            missing.push("endpoint.host");
        }
        if self.endpoint.user.trim().is_empty() {
            missing.push("endpoint.user");
        }
        if !missing.is_empty() {
            return Err(SyncError::Config(format!(
                "mapping '{}' is missing required field(s): {}",
                self.name,
                missing.join(", ")
            )));
        }
        if let Err(SyncError::Config(msg)) = PathFilter::new(&self.options.include, &self.options.exclude) {
            return Err(SyncError::Config(format!("mapping '{}': {msg}", self.name)));
        }
        Ok(())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mappings: IndexMap<String, Mapping>,
}

const REQUIRED_HINT: &str = "no mapping configured; add at least one entry under `mappings:` \
with the required fields `local`, `remote`, `endpoint.host` and `endpoint.user`";

impl Config {
    /// Read a config file, detecting JSON or YAML by extension (YAML by default).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("read config {} failed: {e}", path.display())))?;
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        Self::parse(&text, ext == "json")
    }

    pub fn parse(text: &str, json: bool) -> Result<Self> {
        let mut cfg: Config = if json {
            serde_json::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?
        } else {
            serde_yaml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?
        };
        if cfg.mappings.is_empty() {
            return Err(SyncError::Config(REQUIRED_HINT.to_string()));
        }
        for (name, mapping) in cfg.mappings.iter_mut() {
            mapping.name = name.clone();
            mapping.normalize();
            mapping.validate()?;
        }
        Ok(cfg)
    }

    /// Mappings selected by name, or all of them when `name` is `None`.
    pub fn select(&self, name: Option<&str>) -> Result<Vec<Mapping>> {
        match name {
            None => Ok(self.mappings.values().cloned().collect()),
            Some(n) => self
                .mappings
                .get(n)
                .cloned()
                .map(|m| vec![m])
                .ok_or_else(|| {
                    let known: Vec<&str> = self.mappings.keys().map(String::as_str).collect();
                    SyncError::Config(format!("unknown mapping '{n}' (known: {})", known.join(", ")))
                }),
        }
    }
}
