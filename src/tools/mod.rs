//! Pinned external tool provisioning
//!
//! A tool is identified by `(name, version, platform)`. The first request for
//! an identity materializes it into the on-disk [`ToolStore`]; every later
//! request in this run, and in later runs while the pin is unchanged, reuses
//! the stored artifact without re-verifying it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock};

use crate::action::{Action, ActionContext, CommandAction};
use crate::error::ProvisionError;
use crate::logging::{operations, status};

pub mod fetch;
pub mod store;

pub use fetch::{ArchiveFormat, Fetcher, HttpFetcher};
pub use store::{StoredTool, ToolStore};

/// OS/architecture tuple using Go-style names (`linux/amd64`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformKey {
    pub os: String,
    pub arch: String,
}

impl PlatformKey {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Platform of the running process
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(os, arch)
    }

    /// Directory segment used in the tool cache (`linux-amd64`)
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

impl FromStr for PlatformKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() && !arch.contains('/') => {
                Ok(Self::new(os, arch))
            }
            _ => Err(format!("Invalid platform '{}', expected os/arch", s)),
        }
    }
}

/// Where a tool comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSource {
    /// Downloadable archive or binary
    ///
    /// `url` and `entry` may contain `{name}`, `{version}`, `{os}` and `{arch}`.
    Download {
        url: String,
        entry: Option<String>,
        sha256: Option<String>,
    },
    /// Built locally; `{output}` in the command is the path to produce
    Build { command: Vec<String> },
}

/// A provisioning requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub version: String,
    pub platform: PlatformKey,
    pub source: ToolSource,
    /// Platforms the source supports; empty means any
    pub platforms: Vec<PlatformKey>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>, source: ToolSource) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            platform: PlatformKey::current(),
            source,
            platforms: Vec::new(),
        }
    }

    pub fn key(&self) -> ToolKey {
        ToolKey {
            name: self.name.clone(),
            version: self.version.clone(),
            platform: self.platform.clone(),
        }
    }

    pub fn supports_platform(&self) -> bool {
        self.platforms.is_empty() || self.platforms.contains(&self.platform)
    }

    /// Substitute `{name}`, `{version}`, `{os}` and `{arch}`
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{name}", &self.name)
            .replace("{version}", &self.version)
            .replace("{os}", &self.platform.os)
            .replace("{arch}", &self.platform.arch)
    }
}

/// Cache identity of a tool
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToolKey {
    pub name: String,
    pub version: String,
    pub platform: PlatformKey,
}

impl fmt::Display for ToolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.version, self.platform)
    }
}

/// Tool declarations by name
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: ToolSpec) -> Option<ToolSpec> {
        self.tools.insert(spec.name.clone(), spec)
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

type Slot = Arc<OnceLock<Result<PathBuf, ProvisionError>>>;

/// Materializes tools into the store, at most once per cache key
pub struct ToolProvisioner {
    store: ToolStore,
    fetcher: Arc<dyn Fetcher>,
    /// Working directory for locally built tools
    build_root: PathBuf,
    slots: Mutex<HashMap<ToolKey, Slot>>,
}

impl ToolProvisioner {
    pub fn new(store: ToolStore, fetcher: Arc<dyn Fetcher>, build_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            fetcher,
            build_root: build_root.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ToolStore {
        &self.store
    }

    /// Path of the tool if it has already been provisioned in this run
    pub fn resolved(&self, spec: &ToolSpec) -> Option<PathBuf> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get(&spec.key())
            .and_then(|slot| slot.get())
            .and_then(|result| result.as_ref().ok().cloned())
    }

    /// Provision a tool, returning the path of its executable
    ///
    /// Concurrent callers for the same key block until the first caller has
    /// finished and then share its result.
    pub fn provision(&self, spec: &ToolSpec) -> Result<PathBuf, ProvisionError> {
        let slot: Slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(spec.key()).or_default())
        };

        slot.get_or_init(|| self.materialize(spec)).clone()
    }

    fn materialize(&self, spec: &ToolSpec) -> Result<PathBuf, ProvisionError> {
        let key = spec.key();

        if let Some(path) = self.store.get(&key) {
            tracing::debug!(
                tool = %spec.name,
                version = %spec.version,
                operation = operations::PROVISION,
                status = status::HIT,
                path = %path.display(),
                "tool already cached"
            );
            return Ok(path);
        }

        if !spec.supports_platform() {
            return Err(ProvisionError::UnsupportedPlatform {
                tool: spec.name.clone(),
                platform: spec.platform.to_string(),
            });
        }

        tracing::info!(
            tool = %spec.name,
            version = %spec.version,
            platform = %spec.platform,
            operation = operations::PROVISION,
            status = status::MISS,
            "provisioning tool"
        );

        let path = match &spec.source {
            ToolSource::Download { url, entry, sha256 } => {
                self.download(spec, url, entry.as_deref(), sha256.as_deref())?
            }
            ToolSource::Build { command } => self.build(spec, command)?,
        };

        tracing::info!(
            tool = %spec.name,
            version = %spec.version,
            operation = operations::PROVISION,
            status = status::SUCCESS,
            path = %path.display(),
            "tool provisioned"
        );

        Ok(path)
    }

    fn download(
        &self,
        spec: &ToolSpec,
        url: &str,
        entry: Option<&str>,
        sha256: Option<&str>,
    ) -> Result<PathBuf, ProvisionError> {
        let url = spec.expand(url);
        let bytes = self
            .fetcher
            .fetch(&url)
            .map_err(|message| ProvisionError::Network {
                tool: spec.name.clone(),
                url: url.clone(),
                message,
            })?;

        if let Some(expected) = sha256 {
            let actual = fetch::sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(ProvisionError::Checksum {
                    tool: spec.name.clone(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let entry = entry
            .map(|e| spec.expand(e))
            .unwrap_or_else(|| spec.name.clone());
        let binary = ArchiveFormat::from_url(&url)
            .extract(&bytes, &entry)
            .map_err(|message| ProvisionError::Extraction {
                tool: spec.name.clone(),
                entry: entry.clone(),
                message,
            })?;

        self.store.install_bytes(&spec.key(), &binary)
    }

    fn build(&self, spec: &ToolSpec, command: &[String]) -> Result<PathBuf, ProvisionError> {
        let Some((program, args)) = command.split_first() else {
            return Err(ProvisionError::Build {
                tool: spec.name.clone(),
                message: "empty build command".to_string(),
                output: String::new(),
            });
        };

        self.store.install_with(&spec.key(), |output: &Path| {
            let expand = |arg: &str| {
                spec.expand(arg)
                    .replace("{output}", &output.display().to_string())
            };
            let action = CommandAction::new(expand(program), args.iter().map(|a| expand(a)));

            tracing::debug!(tool = %spec.name, command = %action.describe(), "building tool");

            action
                .execute(&ActionContext::new(&self.build_root))
                .map(|_| ())
                .map_err(|e| ProvisionError::Build {
                    tool: spec.name.clone(),
                    message: e.to_string(),
                    output: e.output().unwrap_or_default().to_string(),
                })
        })
    }
}
