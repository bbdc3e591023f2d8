/// On-disk tool cache
///
/// Layout: `<cache>/tools/<name>/<version>/<os>-<arch>/<name>`
///
/// Presence of the executable is the only freshness signal. Writers stage the
/// artifact inside the key directory and `rename` it into place, so readers
/// never observe a partially written tool.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use walkdir::WalkDir;

use super::ToolKey;
use crate::error::ProvisionError;

/// A tool found in the cache
#[derive(Debug, Clone, Serialize)]
pub struct StoredTool {
    pub name: String,
    pub version: String,
    pub platform: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Versioned key-value store of provisioned tools
#[derive(Debug, Clone)]
pub struct ToolStore {
    root: PathBuf,
}

impl ToolStore {
    /// Open (and create) the store under `cache_dir`
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let root = cache_dir.as_ref().join("tools");
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create tool cache: {}", root.display()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &ToolKey) -> PathBuf {
        self.root
            .join(&key.name)
            .join(&key.version)
            .join(key.platform.dir_name())
    }

    /// Where the executable for `key` lives (whether or not it exists yet)
    pub fn path_for(&self, key: &ToolKey) -> PathBuf {
        self.key_dir(key)
            .join(format!("{}{}", key.name, std::env::consts::EXE_SUFFIX))
    }

    /// Path of the cached executable, if present
    pub fn get(&self, key: &ToolKey) -> Option<PathBuf> {
        let path = self.path_for(key);
        path.is_file().then_some(path)
    }

    fn store_error(key: &ToolKey, context: &str, err: impl std::fmt::Display) -> ProvisionError {
        ProvisionError::Store {
            tool: key.name.clone(),
            message: format!("{}: {}", context, err),
        }
    }

    /// Atomically install `bytes` as the executable for `key`
    pub fn install_bytes(&self, key: &ToolKey, bytes: &[u8]) -> Result<PathBuf, ProvisionError> {
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir).map_err(|e| Self::store_error(key, "create directory", e))?;

        let mut staged = tempfile::Builder::new()
            .prefix(".staging-")
            .tempfile_in(&dir)
            .map_err(|e| Self::store_error(key, "create staging file", e))?;
        staged
            .write_all(bytes)
            .and_then(|_| staged.flush())
            .map_err(|e| Self::store_error(key, "write staging file", e))?;
        make_executable(staged.path()).map_err(|e| Self::store_error(key, "set permissions", e))?;

        let dest = self.path_for(key);
        staged
            .persist(&dest)
            .map_err(|e| Self::store_error(key, "rename into place", e.error))?;

        Ok(dest)
    }

    /// Atomically install an artifact produced by `build`
    ///
    /// `build` receives a staging path inside the key directory and must
    /// create the executable there.
    pub fn install_with<F>(&self, key: &ToolKey, build: F) -> Result<PathBuf, ProvisionError>
    where
        F: FnOnce(&Path) -> Result<(), ProvisionError>,
    {
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir).map_err(|e| Self::store_error(key, "create directory", e))?;

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&dir)
            .map_err(|e| Self::store_error(key, "create staging directory", e))?;
        let staged = staging
            .path()
            .join(format!("{}{}", key.name, std::env::consts::EXE_SUFFIX));

        build(&staged)?;

        if !staged.is_file() {
            return Err(ProvisionError::Build {
                tool: key.name.clone(),
                message: format!("build did not produce {}", staged.display()),
                output: String::new(),
            });
        }

        make_executable(&staged).map_err(|e| Self::store_error(key, "set permissions", e))?;

        let dest = self.path_for(key);
        fs::rename(&staged, &dest).map_err(|e| Self::store_error(key, "rename into place", e))?;

        Ok(dest)
    }

    /// All cached tools, sorted by name, version and platform
    pub fn list(&self) -> Result<Vec<StoredTool>> {
        let mut tools = Vec::new();

        for entry in WalkDir::new(&self.root).min_depth(4).max_depth(4) {
            let entry = entry.context("Failed to read tool cache")?;
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if file_name.starts_with(".staging-") {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .context("Tool path outside cache root")?;
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            if parts.len() != 4 {
                continue;
            }

            tools.push(StoredTool {
                name: parts[0].clone(),
                version: parts[1].clone(),
                platform: parts[2].replacen('-', "/", 1),
                path: entry.path().to_path_buf(),
                size_bytes: entry.metadata().map(|m| m.len()).unwrap_or(0),
            });
        }

        tools.sort_by(|a, b| {
            (&a.name, &a.version, &a.platform).cmp(&(&b.name, &b.version, &b.platform))
        });
        Ok(tools)
    }

    /// Remove one tool (all versions) or the whole cache; returns entries removed
    pub fn remove(&self, name: Option<&str>) -> Result<usize> {
        let removed = match name {
            Some(name) => self.list()?.iter().filter(|t| t.name == name).count(),
            None => self.list()?.len(),
        };

        let target = match name {
            Some(name) => self.root.join(name),
            None => self.root.clone(),
        };

        if target.exists() {
            fs::remove_dir_all(&target)
                .with_context(|| format!("Failed to remove {}", target.display()))?;
        }
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to recreate {}", self.root.display()))?;

        Ok(removed)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
