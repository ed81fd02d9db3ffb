pub mod cli;
pub mod clock;
pub mod config;
pub mod mapper;
pub mod session;
pub mod shell;
pub mod terminal;

use std::path::{Path, PathBuf};

pub use cli::run;

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "remotion", "remotion")
}

/// `remotion.toml` in the platform config directory.
pub fn default_config_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from("remotion.toml"),
        |dirs| dirs.config_dir().join("remotion.toml"),
    )
}

/// Where the CLI keeps state between runs (the listing cache).
pub fn default_data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from(".remotion"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

pub fn catalog_path(data_dir: &Path) -> PathBuf {
    data_dir.join("catalog.json")
}
