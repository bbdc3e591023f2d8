use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config_expansion::expand_env_vars;
use crate::graph::manifest::parse_duration;

/// Complete werk configuration (loaded from `werk.toml`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WerkConfig {
    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Variable values, overriding the manifest's `vars` block
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Manifest path, relative to the project root
    #[serde(default = "default_manifest")]
    pub manifest: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
        }
    }
}

/// Tool cache location
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Relative paths resolve against the project root.
    /// Defaults to the XDG cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Concurrently running actions (1 = strictly ordered)
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Timeout applied to targets without their own (e.g. "30m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            default_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_manifest() -> String {
    "werk.kdl".to_string()
}

fn default_jobs() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl WerkConfig {
    /// Load configuration from a TOML file, expanding `${VAR}` references
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        let config: WerkConfig = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Example configuration as TOML
    pub fn example() -> Result<String> {
        let config = WerkConfig {
            cache: CacheConfig {
                dir: Some(".werk/cache".to_string()),
            },
            executor: ExecutorConfig {
                jobs: 1,
                default_timeout: Some("30m".to_string()),
            },
            vars: [
                ("registry".to_string(), "quay.io/jetstack".to_string()),
                ("platforms".to_string(), "linux/amd64,linux/arm64".to_string()),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };

        toml::to_string_pretty(&config).context("Failed to render example config")
    }

    /// Tool cache directory for a project rooted at `root`
    pub fn cache_dir(&self, root: &Path) -> PathBuf {
        match &self.cache.dir {
            Some(dir) => root.join(dir),
            None => crate::xdg::cache_dir(),
        }
    }

    pub fn default_timeout(&self) -> Result<Option<Duration>> {
        self.executor
            .default_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .context("executor.default_timeout is invalid")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.project.manifest.is_empty() {
            anyhow::bail!("project.manifest must be set");
        }

        if self.executor.jobs == 0 {
            anyhow::bail!("executor.jobs must be at least 1");
        }

        self.default_timeout()?;

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.observability.log_level.as_str())
        {
            anyhow::bail!("observability.log_level must be one of: trace, debug, info, warn, error");
        }

        if !["pretty", "compact", "json"].contains(&self.observability.log_format.as_str()) {
            anyhow::bail!("observability.log_format must be one of: pretty, compact, json");
        }

        for name in self.vars.keys() {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                anyhow::bail!("Invalid variable name in [vars]: '{}'", name);
            }
        }

        Ok(())
    }
}
