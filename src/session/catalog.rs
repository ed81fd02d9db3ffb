//! Cached remote project listings, keyed by remote host.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::MountConfig;

/// Cache key used for mounts that run commands locally.
pub const LOCAL_HOST_KEY: &str = "local";

/// One cached listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Paths relative to the remote project root, in listing order.
    pub files: Vec<String>,
    /// Epoch seconds of the fetch.
    pub fetched_at: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteCatalog {
    #[serde(skip)]
    cache_timeout: f64,
    hosts: HashMap<String, CatalogEntry>,
}

impl RemoteCatalog {
    pub fn new(cache_timeout_secs: u64) -> Self {
        Self {
            cache_timeout: cache_timeout_secs as f64,
            hosts: HashMap::new(),
        }
    }

    pub fn cache_timeout(&self) -> f64 {
        self.cache_timeout
    }

    /// Cached files for `host` unless a reload is forced or the entry is older
    /// than the cache timeout.
    pub fn fresh(&self, host: &str, now: f64, force_reload: bool) -> Option<&[String]> {
        if force_reload {
            return None;
        }
        self.hosts
            .get(host)
            .filter(|entry| now - entry.fetched_at <= self.cache_timeout)
            .map(|entry| entry.files.as_slice())
    }

    pub fn store(&mut self, host: &str, files: Vec<String>, now: f64) {
        self.hosts.insert(
            host.to_string(),
            CatalogEntry {
                files,
                fetched_at: now,
            },
        );
    }

    pub fn entry(&self, host: &str) -> Option<&CatalogEntry> {
        self.hosts.get(host)
    }

    pub fn invalidate(&mut self, host: &str) -> bool {
        self.hosts.remove(host).is_some()
    }

    pub fn invalidate_all(&mut self) {
        self.hosts.clear();
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Load a persisted catalog. A missing file yields an empty catalog.
    pub fn load(path: &Path, cache_timeout_secs: u64) -> Result<Self, std::io::Error> {
        let mut catalog = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str::<Self>(&content)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
        } else {
            Self::default()
        };
        catalog.cache_timeout = cache_timeout_secs as f64;
        Ok(catalog)
    }

    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }
}

/// Identity of the host a mount's listing comes from.
///
/// Mounts without a remote host all run on this machine, so their key also
/// carries the project path to keep their listings apart.
pub fn host_key(mount: &MountConfig) -> String {
    match mount.host() {
        Some(host) => host.to_string(),
        None => format!("{LOCAL_HOST_KEY}:{}", mount.remote_project_path),
    }
}

/// Split listing output into relative paths, dropping blank lines.
pub fn parse_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}
