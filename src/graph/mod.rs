//! Task graph: targets, typed dependency edges and topological resolution
//!
//! Targets are stored in declaration order. Resolution walks dependencies
//! depth-first in that order, so the produced execution order is
//! deterministic for a given manifest.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::action::Action;
use crate::error::ConfigurationError;

pub mod manifest;

pub use manifest::{load_manifest, parse_manifest, Manifest};

/// Whether a target produces files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Produces artifacts at its declared outputs
    File,
    /// No artifact; always considered stale
    Phony,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::File => "file",
            TargetKind::Phony => "phony",
        }
    }
}

/// A typed dependency edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// Another target in the graph
    Target(String),
    /// A source file or glob pattern, relative to the workspace root
    File(PathBuf),
}

/// A named unit of work
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub kind: TargetKind,
    pub dependencies: Vec<Dependency>,
    pub outputs: Vec<PathBuf>,
    pub tools: Vec<String>,
    pub action: Option<Arc<dyn Action>>,
    /// Pipeline goal this target belongs to
    pub stage: Option<String>,
    /// Only executed when running in CI
    pub ci_only: bool,
    /// Target whose generated outputs this target verifies
    pub verify: Option<String>,
    pub timeout: Option<Duration>,
    pub env: BTreeMap<String, String>,
    /// Working directory relative to the workspace root
    pub cwd: Option<PathBuf>,
}

impl Target {
    fn with_kind(name: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            name: name.into(),
            kind,
            dependencies: Vec::new(),
            outputs: Vec::new(),
            tools: Vec::new(),
            action: None,
            stage: None,
            ci_only: false,
            verify: None,
            timeout: None,
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::with_kind(name, TargetKind::File)
    }

    pub fn phony(name: impl Into<String>) -> Self {
        Self::with_kind(name, TargetKind::Phony)
    }

    pub fn depends_on(mut self, target: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::Target(target.into()));
        self
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.dependencies.push(Dependency::File(path.into()));
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.tools.push(name.into());
        self
    }

    pub fn action(mut self, action: impl Action + 'static) -> Self {
        self.action = Some(Arc::new(action));
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn is_phony(&self) -> bool {
        self.kind == TargetKind::Phony
    }

    /// Names of the targets this target depends on, in declaration order
    pub fn target_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().filter_map(|dep| match dep {
            Dependency::Target(name) => Some(name.as_str()),
            Dependency::File(_) => None,
        })
    }

    /// File paths and globs this target reads
    pub fn file_dependencies(&self) -> impl Iterator<Item = &Path> {
        self.dependencies.iter().filter_map(|dep| match dep {
            Dependency::File(path) => Some(path.as_path()),
            Dependency::Target(_) => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// In-memory graph of targets
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    targets: Vec<Target>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target, rejecting duplicate names
    pub fn add_target(&mut self, target: Target) -> Result<(), ConfigurationError> {
        if self.index.contains_key(&target.name) {
            return Err(ConfigurationError::DuplicateTarget(target.name));
        }

        self.index.insert(target.name.clone(), self.targets.len());
        self.targets.push(target);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Target> {
        self.index.get(name).map(|&idx| &self.targets[idx])
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Target> {
        self.index.get(name).map(|&idx| &mut self.targets[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All targets in declaration order
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Transitive dependency closure of `goal`, in execution order
    ///
    /// Every target appears exactly once and after all of its dependencies.
    /// The walk fails before anything runs if a name is undeclared, the
    /// closure contains a cycle, or a file target has nothing to inspect.
    pub fn resolve(&self, goal: &str) -> Result<Vec<&Target>, ConfigurationError> {
        let root = *self
            .index
            .get(goal)
            .ok_or_else(|| ConfigurationError::UnknownTarget {
                name: goal.to_string(),
                referenced_by: None,
            })?;

        let mut marks = vec![Mark::Unvisited; self.targets.len()];
        let mut path = Vec::new();
        let mut order = Vec::new();
        self.visit(root, &mut marks, &mut path, &mut order)?;

        let resolved: Vec<&Target> = order.into_iter().map(|idx| &self.targets[idx]).collect();
        Self::validate_closure(&resolved)?;

        Ok(resolved)
    }

    /// Reject file targets that declare nothing to inspect
    pub fn validate_closure(targets: &[&Target]) -> Result<(), ConfigurationError> {
        match targets
            .iter()
            .find(|t| t.kind == TargetKind::File && t.outputs.is_empty())
        {
            Some(target) => Err(ConfigurationError::AmbiguousTarget(target.name.clone())),
            None => Ok(()),
        }
    }

    /// Targets that directly depend on `name`
    pub fn dependents(&self, name: &str) -> Vec<&Target> {
        self.targets
            .iter()
            .filter(|t| t.target_dependencies().any(|dep| dep == name))
            .collect()
    }

    fn visit(
        &self,
        idx: usize,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), ConfigurationError> {
        match marks[idx] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let start = path.iter().position(|&p| p == idx).unwrap_or(0);
                let mut members: Vec<String> = path[start..]
                    .iter()
                    .map(|&p| self.targets[p].name.clone())
                    .collect();
                members.push(self.targets[idx].name.clone());
                return Err(ConfigurationError::Cycle { members });
            }
            Mark::Unvisited => {}
        }

        marks[idx] = Mark::InProgress;
        path.push(idx);

        let target = &self.targets[idx];
        for dep in target.target_dependencies() {
            let dep_idx =
                *self
                    .index
                    .get(dep)
                    .ok_or_else(|| ConfigurationError::UnknownTarget {
                        name: dep.to_string(),
                        referenced_by: Some(target.name.clone()),
                    })?;
            self.visit(dep_idx, marks, path, order)?;
        }

        path.pop();
        marks[idx] = Mark::Done;
        order.push(idx);
        Ok(())
    }

    /// Render the graph (or one goal's closure) in Graphviz DOT format
    pub fn to_dot(&self, goal: Option<&str>) -> Result<String, ConfigurationError> {
        let targets: Vec<&Target> = match goal {
            Some(goal) => self.resolve(goal)?,
            None => self.targets.iter().collect(),
        };

        let mut dot = String::from("digraph werk {\n    rankdir=LR;\n");
        for target in &targets {
            let shape = match target.kind {
                TargetKind::File => "box",
                TargetKind::Phony => "ellipse",
            };
            let _ = writeln!(dot, "    \"{}\" [shape={}];", target.name, shape);
        }
        for target in &targets {
            for dep in target.target_dependencies() {
                let _ = writeln!(dot, "    \"{}\" -> \"{}\";", target.name, dep);
            }
        }
        dot.push_str("}\n");

        Ok(dot)
    }
}
