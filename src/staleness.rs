/// Staleness decisions for targets
///
/// A file target is fresh only when all of its outputs exist, nothing it
/// depends on was rebuilt in this run, and no input is newer than its oldest
/// output. Phony targets are never fresh.
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

use crate::error::ConfigurationError;
use crate::graph::{TaskGraph, Target, TargetKind};

/// Why a target must (or need not) run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Staleness {
    Fresh,
    Phony,
    Forced,
    MissingOutput(PathBuf),
    NewerInput(PathBuf),
    UpstreamRebuilt(String),
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Staleness::Fresh)
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::Fresh => write!(f, "up to date"),
            Staleness::Phony => write!(f, "phony"),
            Staleness::Forced => write!(f, "forced"),
            Staleness::MissingOutput(path) => write!(f, "missing output {}", path.display()),
            Staleness::NewerInput(path) => write!(f, "{} is newer", path.display()),
            Staleness::UpstreamRebuilt(name) => write!(f, "'{}' was rebuilt", name),
        }
    }
}

/// Decides whether a target's action has to run
#[derive(Debug, Clone)]
pub struct StalenessOracle {
    root: PathBuf,
    force: bool,
}

impl StalenessOracle {
    /// Paths are resolved relative to `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            force: false,
        }
    }

    /// Treat every file target as stale
    pub fn forcing(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn is_stale(
        &self,
        target: &Target,
        graph: &TaskGraph,
        rebuilt: &HashSet<String>,
    ) -> Result<bool, ConfigurationError> {
        Ok(self.check(target, graph, rebuilt)?.is_stale())
    }

    /// Staleness of `target`, given the targets already rebuilt in this run
    pub fn check(
        &self,
        target: &Target,
        graph: &TaskGraph,
        rebuilt: &HashSet<String>,
    ) -> Result<Staleness, ConfigurationError> {
        if target.kind == TargetKind::Phony {
            return Ok(Staleness::Phony);
        }

        if target.outputs.is_empty() {
            return Err(ConfigurationError::AmbiguousTarget(target.name.clone()));
        }

        if self.force {
            return Ok(Staleness::Forced);
        }

        let mut oldest_output: Option<SystemTime> = None;
        for output in &target.outputs {
            match modified(&self.resolve(output)) {
                Some(time) => {
                    oldest_output = Some(oldest_output.map_or(time, |t| t.min(time)));
                }
                None => return Ok(Staleness::MissingOutput(output.clone())),
            }
        }

        if let Some(name) = target.target_dependencies().find(|dep| rebuilt.contains(*dep)) {
            return Ok(Staleness::UpstreamRebuilt(name.to_string()));
        }

        let Some(oldest_output) = oldest_output else {
            return Ok(Staleness::Fresh);
        };

        for input in self.inputs(target, graph)? {
            if let Some(time) = modified(&self.resolve(&input)) {
                if time > oldest_output {
                    return Ok(Staleness::NewerInput(input));
                }
            }
        }

        Ok(Staleness::Fresh)
    }

    /// Fail early on literal file dependencies that do not exist
    ///
    /// Paths declared as outputs of a target in `targets` are exempt since
    /// they will be produced during the run.
    pub fn check_inputs(&self, targets: &[&Target]) -> Result<(), ConfigurationError> {
        let produced: HashSet<&Path> = targets
            .iter()
            .flat_map(|t| t.outputs.iter().map(PathBuf::as_path))
            .collect();

        for target in targets {
            for dep in target.file_dependencies() {
                if is_glob(dep) || produced.contains(dep) || self.resolve(dep).exists() {
                    continue;
                }
                return Err(ConfigurationError::MissingInput {
                    target: target.name.clone(),
                    path: dep.to_path_buf(),
                });
            }
        }

        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Every path whose timestamp feeds the comparison
    ///
    /// File dependencies (globs expanded) plus the declared outputs of file
    /// targets this target depends on.
    fn inputs(&self, target: &Target, graph: &TaskGraph) -> Result<Vec<PathBuf>, ConfigurationError> {
        let mut inputs = Vec::new();

        for dep in target.file_dependencies() {
            if is_glob(dep) {
                inputs.extend(self.expand_glob(dep));
            } else if self.resolve(dep).exists() {
                inputs.push(dep.to_path_buf());
            } else {
                return Err(ConfigurationError::MissingInput {
                    target: target.name.clone(),
                    path: dep.to_path_buf(),
                });
            }
        }

        for name in target.target_dependencies() {
            if let Some(upstream) = graph.get(name) {
                if upstream.kind == TargetKind::File {
                    inputs.extend(upstream.outputs.iter().cloned());
                }
            }
        }

        Ok(inputs)
    }

    /// Glob matches relative to the root; an empty match is allowed
    fn expand_glob(&self, pattern: &Path) -> Vec<PathBuf> {
        let full = self.resolve(pattern);
        let Ok(paths) = glob::glob(&full.to_string_lossy()) else {
            return Vec::new();
        };

        let mut matches: Vec<PathBuf> = paths
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        matches.sort();
        matches
    }
}

fn is_glob(path: &Path) -> bool {
    path.to_string_lossy().contains(['*', '?', '['])
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
