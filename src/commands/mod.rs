pub mod config;
pub mod graph;
pub mod list;
pub mod run;
pub mod tools;

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;

use werk::config_discovery::Project;
use werk::error::{ConfigurationError, WerkError};
use werk::graph::{load_manifest, Manifest};

use crate::cli::GlobalArgs;

/// Marks failures to load configuration or the manifest
#[derive(Debug, thiserror::Error)]
#[error("Configuration error")]
pub struct LoadError;

/// Unwrap the discovered project, tagging failures as configuration errors
pub fn project(project: Result<Project>) -> Result<Project> {
    project.map_err(|e| e.context(LoadError))
}

/// `--cache-dir` if given, else the project's configured cache
pub fn cache_dir(global: &GlobalArgs, project: &Project) -> PathBuf {
    global
        .cache_dir
        .clone()
        .unwrap_or_else(|| project.cache_dir())
}

/// Load the manifest with `[vars]` from werk.toml, overridden by `overrides`
pub fn manifest(project: &Project, overrides: &[(String, String)]) -> Result<Manifest> {
    let mut vars: BTreeMap<String, String> = project.config.vars.clone();
    vars.extend(overrides.iter().cloned());

    load_manifest(&project.manifest_path(), &vars).map_err(|e| e.context(LoadError))
}

/// Process exit code for an error that escaped a command
///
/// 2 for configuration problems, 1 for everything else.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(err) = err.downcast_ref::<WerkError>() {
        return err.exit_code() as u8;
    }

    let configuration = err.downcast_ref::<LoadError>().is_some()
        || err.chain().any(|cause| cause.is::<ConfigurationError>());
    if configuration {
        2
    } else {
        1
    }
}
