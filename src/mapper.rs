//! Mount resolution and local/remote path translation.
//!
//! Matching is a plain string-prefix test against the configured prefixes, in
//! configuration order. It is not segment aware: a mount at `/data` also claims
//! `/data2/file`. Configurations that rely on one prefix extending another must
//! list the longer prefix first.

use crate::config::{Config, MountConfig};

#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    mounts: Vec<MountConfig>,
}

impl PathMapper {
    pub fn new(mounts: Vec<MountConfig>) -> Self {
        Self { mounts }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.mounted_paths.clone())
    }

    pub fn mounts(&self) -> &[MountConfig] {
        &self.mounts
    }

    /// First mount whose local prefix starts `path`.
    pub fn resolve_for_local(&self, path: &str) -> Option<&MountConfig> {
        self.mounts
            .iter()
            .find(|m| path.starts_with(m.local_prefix.as_str()))
    }

    /// First mount whose remote prefix starts `path`.
    pub fn resolve_for_remote(&self, path: &str) -> Option<&MountConfig> {
        self.mounts
            .iter()
            .find(|m| path.starts_with(m.remote_prefix.as_str()))
    }

    /// Local match, then remote match, then the default (first) mount.
    ///
    /// Only returns `None` when no mounts are configured.
    pub fn resolve_best(&self, path: Option<&str>) -> Option<&MountConfig> {
        path.and_then(|p| self.resolve_for_local(p).or_else(|| self.resolve_for_remote(p)))
            .or_else(|| self.mounts.first())
    }

    /// Translate a local path into a shell-ready remote path.
    pub fn to_remote(local_path: &str, mount: &MountConfig) -> String {
        escape_spaces(&local_path.replacen(&mount.local_prefix, &mount.remote_prefix, 1))
    }

    /// Translate a remote path back into the local mount, if any mount claims it.
    pub fn to_local(&self, remote_path: &str) -> Option<String> {
        let mount = self.resolve_for_remote(remote_path)?;
        Some(remote_path.replacen(&mount.remote_prefix, &mount.local_prefix, 1))
    }

    /// Local path of a file named relative to the mount's remote project root.
    pub fn project_file_to_local(mount: &MountConfig, relative: &str) -> String {
        join_remote(&mount.remote_project_path, relative).replacen(
            &mount.remote_prefix,
            &mount.local_prefix,
            1,
        )
    }
}

/// Join `relative` onto `base`; an absolute `relative` replaces the base.
pub fn join_remote(base: &str, relative: &str) -> String {
    if relative.starts_with('/') || base.is_empty() {
        relative.to_string()
    } else if base.ends_with('/') {
        format!("{base}{relative}")
    } else {
        format!("{base}/{relative}")
    }
}

/// Backslash-escape spaces so the path survives as a single shell word.
pub fn escape_spaces(path: &str) -> String {
    path.replace(' ', "\\ ")
}

pub fn unescape_spaces(path: &str) -> String {
    path.replace("\\ ", " ")
}
