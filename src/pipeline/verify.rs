//! Generated-output verification
//!
//! A verify target regenerates another target in a clean copy of the
//! workspace and compares the fresh outputs with what is checked in. It
//! answers one question: do the checked-in outputs equal a fresh
//! regeneration? It does not regenerate twice to test idempotence.

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use walkdir::WalkDir;

use crate::action::{Action, ActionContext, ActionOutput};
use crate::error::ActionError;
use crate::executor::{Executor, ExecutorOptions};
use crate::graph::{TaskGraph, TargetKind};
use crate::logging::operations;
use crate::tools::{ToolProvisioner, ToolSet};

/// Directory names never copied into the verification workspace
const SKIPPED_DIRS: &[&str] = &[".git", "target"];

/// Settings shared by every verify action of a run
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub root: PathBuf,
    /// Absolute paths left out of the copy (e.g. the tool cache)
    pub exclude: Vec<PathBuf>,
    pub ci: bool,
    pub default_timeout: Option<Duration>,
}

/// Regenerates `checks` in a scratch copy and diffs its outputs
pub struct VerifyAction {
    checks: String,
    graph: Arc<TaskGraph>,
    tools: Arc<ToolSet>,
    provisioner: Arc<ToolProvisioner>,
    options: VerifyOptions,
}

impl fmt::Debug for VerifyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyAction")
            .field("checks", &self.checks)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl VerifyAction {
    pub fn new(
        checks: impl Into<String>,
        graph: Arc<TaskGraph>,
        tools: Arc<ToolSet>,
        provisioner: Arc<ToolProvisioner>,
        options: VerifyOptions,
    ) -> Self {
        Self {
            checks: checks.into(),
            graph,
            tools,
            provisioner,
            options,
        }
    }

    /// Declared outputs of the checked target and the file targets it needs
    fn outputs(&self) -> Result<Vec<PathBuf>, ActionError> {
        let closure = self
            .graph
            .resolve(&self.checks)
            .map_err(|e| ActionError::Other(e.to_string()))?;

        let outputs: BTreeSet<PathBuf> = closure
            .iter()
            .filter(|t| t.kind == TargetKind::File)
            .flat_map(|t| t.outputs.iter().cloned())
            .collect();

        Ok(outputs.into_iter().collect())
    }
}

impl Action for VerifyAction {
    fn describe(&self) -> String {
        format!("verify outputs of {}", self.checks)
    }

    fn execute(&self, _ctx: &ActionContext) -> Result<ActionOutput, ActionError> {
        let started = Instant::now();
        let outputs = self.outputs()?;

        let scratch = tempfile::Builder::new()
            .prefix("werk-verify-")
            .tempdir()
            .map_err(|source| ActionError::Io {
                context: "Failed to create verification workspace".to_string(),
                source,
            })?;

        let copied = copy_workspace(&self.options.root, scratch.path(), &self.options.exclude)
            .map_err(|source| ActionError::Io {
                context: format!(
                    "Failed to copy {} for verification",
                    self.options.root.display()
                ),
                source,
            })?;

        tracing::debug!(
            target = %self.checks,
            operation = operations::VERIFY,
            files = copied,
            workspace = %scratch.path().display(),
            "copied workspace"
        );

        let options = ExecutorOptions {
            jobs: 1,
            default_timeout: self.options.default_timeout,
            ci: self.options.ci,
            force: true,
            root: scratch.path().to_path_buf(),
        };
        let report = Executor::new(&self.graph, &self.tools, &self.provisioner, options)
            .run(&self.checks)
            .map_err(|e| ActionError::Other(e.to_string()))?;

        if let Some(failure) = &report.failure {
            let output = report
                .failed_record()
                .map(|r| r.output.clone())
                .unwrap_or_default();
            return Err(ActionError::Other(format!(
                "Regenerating '{}' failed: {}\n{}",
                self.checks, failure, output
            )));
        }

        let diff = diff_outputs(&self.options.root, scratch.path(), &outputs).map_err(|source| {
            ActionError::Io {
                context: "Failed to compare generated outputs".to_string(),
                source,
            }
        })?;

        if !diff.is_empty() {
            return Err(ActionError::VerifyMismatch {
                report: diff.render(&self.checks),
            });
        }

        Ok(ActionOutput {
            exit_code: 0,
            duration: started.elapsed(),
            output: format!(
                "{} output(s) of '{}' match a fresh regeneration\n",
                outputs.len(),
                self.checks
            )
            .into_bytes(),
        })
    }
}

fn is_skipped(root: &Path, path: &Path, exclude: &[PathBuf]) -> bool {
    if exclude.iter().any(|ex| path.starts_with(ex)) {
        return true;
    }

    match path.strip_prefix(root) {
        Ok(rel) if rel.components().count() == 1 => rel
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name))
            .unwrap_or(false),
        _ => path.file_name().map(|n| n == ".git").unwrap_or(false),
    }
}

/// Copy the workspace at `src` into `dest`, returning the number of files
pub fn copy_workspace(src: &Path, dest: &Path, exclude: &[PathBuf]) -> io::Result<usize> {
    let mut copied = 0;

    let walker = WalkDir::new(src)
        .into_iter()
        .filter_entry(|e| !is_skipped(src, e.path(), exclude));

    for entry in walker {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if rel.as_os_str().is_empty() {
            continue;
        }

        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.path().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Differences between checked-in and regenerated outputs
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OutputDiff {
    /// Present on both sides with different content, with the first
    /// differing line
    pub changed: Vec<(PathBuf, String)>,
    /// Regenerated but not checked in
    pub not_checked_in: Vec<PathBuf>,
    /// Checked in but no longer generated
    pub stale: Vec<PathBuf>,
}

impl OutputDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.not_checked_in.is_empty() && self.stale.is_empty()
    }

    pub fn render(&self, checks: &str) -> String {
        let mut out = format!("Checked-in outputs of '{}' are out of date\n", checks);
        for (path, detail) in &self.changed {
            let _ = writeln!(out, "  changed: {} ({})", path.display(), detail);
        }
        for path in &self.not_checked_in {
            let _ = writeln!(out, "  not checked in: {}", path.display());
        }
        for path in &self.stale {
            let _ = writeln!(out, "  stale:          {}", path.display());
        }
        let _ = writeln!(out, "Run `werk run {}` and commit the result.", checks);
        out
    }
}

/// Files under `root/output`, relative to `root`
fn files_under(root: &Path, output: &Path) -> io::Result<BTreeSet<PathBuf>> {
    let base = root.join(output);
    let mut files = BTreeSet::new();

    if base.is_file() {
        files.insert(output.to_path_buf());
    } else if base.is_dir() {
        for entry in WalkDir::new(&base) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(root)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                files.insert(rel.to_path_buf());
            }
        }
    }

    Ok(files)
}

/// Compare `outputs` (files or directories) between two workspace roots
pub fn diff_outputs(checked_in: &Path, fresh: &Path, outputs: &[PathBuf]) -> io::Result<OutputDiff> {
    let mut diff = OutputDiff::default();

    for output in outputs {
        let old = files_under(checked_in, output)?;
        let new = files_under(fresh, output)?;

        for path in old.union(&new) {
            match (old.contains(path), new.contains(path)) {
                (true, true) => {
                    let a = fs::read(checked_in.join(path))?;
                    let b = fs::read(fresh.join(path))?;
                    if a != b {
                        diff.changed.push((path.clone(), first_difference(&a, &b)));
                    }
                }
                (false, true) => diff.not_checked_in.push(path.clone()),
                (true, false) => diff.stale.push(path.clone()),
                (false, false) => {}
            }
        }
    }

    Ok(diff)
}

/// Describe the first line where two documents diverge
fn first_difference(checked_in: &[u8], fresh: &[u8]) -> String {
    let old = String::from_utf8_lossy(checked_in);
    let new = String::from_utf8_lossy(fresh);
    let mut old_lines = old.lines();
    let mut new_lines = new.lines();
    let mut line = 1;

    loop {
        match (old_lines.next(), new_lines.next()) {
            (Some(a), Some(b)) if a == b => line += 1,
            (a, b) => {
                return format!(
                    "line {}: checked in {:?}, regenerated {:?}",
                    line,
                    a.unwrap_or("<eof>"),
                    b.unwrap_or("<eof>")
                )
            }
        }
    }
}
