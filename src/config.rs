//! Configuration for remote mounts and the remote command templates.
//!
//! Configuration lives in `remotion.toml` under the platform config directory
//! (see [`crate::default_config_path`]) and can be pointed elsewhere with the
//! `REMOTION_CONFIG` environment variable or the `--config` flag:
//!
//! ```toml
//! reload_on_remote_change = true
//! cache_timeout = 600
//!
//! [[mounted_paths]]
//! local_prefix = "/Volumes/devbox"
//! remote_prefix = "/home/me"
//! remote_host = "me@devbox"
//! remote_project_path = "/home/me/project"
//! ```
//!
//! The loaded [`Config`] is immutable; components share it behind an `Arc`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "REMOTION_CONFIG";

pub const DEFAULT_CACHE_TIMEOUT: u64 = 600;
pub const MAX_PROPAGATION_DELAY: f64 = 3.0;

const DEFAULT_LAST_TOUCHED_COMMAND: &str = "stat -c %Y {0}";
const DEFAULT_LS_COMMAND: &str = "cd {0} && find . -type f | cut -c3-";
// The symbol is single-quoted so `$`-prefixed names reach awk unexpanded.
const DEFAULT_TAGS_COMMAND: &str = "awk -F'\\t' -v sym='{1}' '$1 == sym' {0}/tags";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Mount #{0} has an empty local or remote prefix")]
    EmptyPrefix(usize),

    #[error("Local prefix configured twice: {0}")]
    DuplicateLocalPrefix(String),

    #[error("propagation_delay must be between 0 and 3 seconds, got {0}")]
    PropagationDelay(f64),

    #[error("worker_threads must be at least 1")]
    NoWorkers,
}

/// One local/remote mount association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Where the remote filesystem is mounted locally.
    #[serde(alias = "local_mount_path")]
    pub local_prefix: String,
    /// The same location as seen on the remote host.
    #[serde(alias = "remote_mount_path")]
    pub remote_prefix: String,
    /// Transport target (e.g. `user@host`). Empty runs commands locally.
    #[serde(default)]
    pub remote_host: String,
    /// Project root on the remote host, used for listings and tag lookups.
    #[serde(default)]
    pub remote_project_path: String,
}

impl MountConfig {
    pub fn new(
        local_prefix: impl Into<String>,
        remote_prefix: impl Into<String>,
        remote_host: impl Into<String>,
        remote_project_path: impl Into<String>,
    ) -> Self {
        Self {
            local_prefix: local_prefix.into(),
            remote_prefix: remote_prefix.into(),
            remote_host: remote_host.into(),
            remote_project_path: remote_project_path.into(),
        }
    }

    /// Host to run commands on, or `None` when they run locally.
    pub fn host(&self) -> Option<&str> {
        let host = self.remote_host.trim();
        (!host.is_empty()).then_some(host)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reload_on_remote_change: bool,
    pub remote_last_touched_command: String,
    pub remote_ls_command: String,
    pub remote_tags_command: String,
    /// Seconds a remote listing stays fresh.
    pub cache_timeout: u64,
    /// Seconds the remote filesystem needs to reflect a local write.
    pub propagation_delay: f64,
    /// Program used to reach remote hosts.
    pub remote_transport: String,
    pub worker_threads: usize,
    /// Ordered; the first matching mount wins and the first entry is the default.
    pub mounted_paths: Vec<MountConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reload_on_remote_change: false,
            remote_last_touched_command: DEFAULT_LAST_TOUCHED_COMMAND.to_string(),
            remote_ls_command: DEFAULT_LS_COMMAND.to_string(),
            remote_tags_command: DEFAULT_TAGS_COMMAND.to_string(),
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            propagation_delay: 0.0,
            remote_transport: "ssh".to_string(),
            worker_threads: 4,
            mounted_paths: Vec::new(),
        }
    }
}

impl Config {
    /// Load from the location named by `REMOTION_CONFIG`, falling back to the
    /// platform config directory.
    pub fn load() -> Result<Self, ConfigError> {
        let path = dotenvy::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| crate::default_config_path());
        Self::load_from(&path)
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=MAX_PROPAGATION_DELAY).contains(&self.propagation_delay) {
            return Err(ConfigError::PropagationDelay(self.propagation_delay));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::NoWorkers);
        }

        let mut seen = HashSet::new();
        for (idx, mount) in self.mounted_paths.iter().enumerate() {
            if mount.local_prefix.is_empty() || mount.remote_prefix.is_empty() {
                return Err(ConfigError::EmptyPrefix(idx));
            }
            if !seen.insert(mount.local_prefix.as_str()) {
                return Err(ConfigError::DuplicateLocalPrefix(mount.local_prefix.clone()));
            }
        }

        for (a, first) in self.mounted_paths.iter().enumerate() {
            for second in &self.mounted_paths[a + 1..] {
                if first.local_prefix.starts_with(&second.local_prefix)
                    || second.local_prefix.starts_with(&first.local_prefix)
                {
                    tracing::warn!(
                        first = %first.local_prefix,
                        second = %second.local_prefix,
                        "overlapping local prefixes; the earlier mount wins"
                    );
                }
            }
        }
        Ok(())
    }

    /// The first configured mount, used when nothing else matches.
    pub fn default_mount(&self) -> Option<&MountConfig> {
        self.mounted_paths.first()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
