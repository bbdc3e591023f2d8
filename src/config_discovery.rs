use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::WerkConfig;
use crate::xdg;

pub const CONFIG_FILE: &str = "werk.toml";
pub const MANIFEST_FILE: &str = "werk.kdl";

/// A located project: its root, configuration and manifest
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    /// Configuration file in effect, if any
    pub config_path: Option<PathBuf>,
    pub config: WerkConfig,
}

impl Project {
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.config.project.manifest)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.config.cache_dir(&self.root)
    }
}

/// Walk up from `start_dir` to the nearest directory holding `werk.toml` or
/// `werk.kdl`
///
/// Returns the project directory and the config file found there, if any.
pub fn discover_project_dir(start_dir: &Path) -> Option<(PathBuf, Option<PathBuf>)> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.is_file() {
            return Some((current, Some(config_path)));
        }
        if current.join(MANIFEST_FILE).is_file() {
            return Some((current, None));
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Global user configuration, if present
pub fn global_config() -> Option<PathBuf> {
    xdg::config_dir()
        .map(|dir| dir.join("config.toml"))
        .filter(|path| path.is_file())
}

/// Loads the project with configuration discovery
///
/// An explicit config path makes its directory the project root. Otherwise
/// the nearest `werk.toml` (or `werk.kdl`) above the current directory marks
/// the root, falling back to the global config and the current directory.
pub fn load_project(explicit_config: Option<&Path>) -> Result<Project> {
    let current_dir =
        std::env::current_dir().context("Failed to get current directory for config discovery")?;
    load_project_from(&current_dir, explicit_config)
}

pub fn load_project_from(start_dir: &Path, explicit_config: Option<&Path>) -> Result<Project> {
    let (root, config_path) = match explicit_config {
        Some(path) => {
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                start_dir.join(path)
            };
            let root = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| start_dir.to_path_buf());
            (root, Some(path))
        }
        None => match discover_project_dir(start_dir) {
            Some((root, Some(config))) => (root, Some(config)),
            Some((root, None)) => (root, global_config()),
            None => (start_dir.to_path_buf(), global_config()),
        },
    };

    let config = match &config_path {
        Some(path) => WerkConfig::from_file(path)?,
        None => WerkConfig::default(),
    };
    config
        .validate()
        .with_context(|| match &config_path {
            Some(path) => format!("Invalid configuration: {}", path.display()),
            None => "Invalid default configuration".to_string(),
        })?;

    tracing::debug!(
        root = %root.display(),
        config = ?config_path,
        "project discovered"
    );

    Ok(Project {
        root,
        config_path,
        config,
    })
}
