/// Actions executed by stale targets
///
/// The executor only knows this capability; how a command is spawned or how a
/// template is rendered lives in the implementations.
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ActionError;

pub mod command;
pub mod template;

pub use command::CommandAction;
pub use template::WrapTemplateAction;

/// Everything an action may observe about the run
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Directory the action runs in
    pub working_dir: PathBuf,
    /// Full environment for spawned processes
    pub env: BTreeMap<String, String>,
    /// Provisioned tool paths by tool name
    pub tools: BTreeMap<String, PathBuf>,
    /// Kill the action after this long
    pub timeout: Option<Duration>,
}

impl ActionContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            env: std::env::vars().collect(),
            tools: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Register a provisioned tool
    ///
    /// The tool's directory is prepended to `PATH` and its location is exported
    /// as `WERK_TOOL_<NAME>`.
    pub fn with_tool(mut self, name: &str, path: &Path) -> Self {
        if let Some(dir) = path.parent() {
            let current = self.env.get("PATH").cloned().unwrap_or_default();
            let mut paths = vec![dir.to_path_buf()];
            paths.extend(std::env::split_paths(&current));
            if let Ok(joined) = std::env::join_paths(paths) {
                self.env
                    .insert("PATH".to_string(), joined.to_string_lossy().into_owned());
            }
        }

        self.env
            .insert(tool_env_var(name), path.display().to_string());
        self.tools.insert(name.to_string(), path.to_path_buf());
        self
    }

    /// Resolve a path relative to the working directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

/// Name of the environment variable carrying a tool's path
pub fn tool_env_var(name: &str) -> String {
    let normalized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("WERK_TOOL_{}", normalized)
}

/// Result of a successful action
#[derive(Debug, Clone, Default)]
pub struct ActionOutput {
    pub exit_code: i32,
    pub duration: Duration,
    /// Interleaved stdout and stderr as captured
    pub output: Vec<u8>,
}

impl ActionOutput {
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// A unit of external work attached to a target
pub trait Action: fmt::Debug + Send + Sync {
    /// Short human-readable description for logs
    fn describe(&self) -> String;

    /// Run the action to completion
    fn execute(&self, ctx: &ActionContext) -> Result<ActionOutput, ActionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_env_var() {
        assert_eq!(tool_env_var("controller-gen"), "WERK_TOOL_CONTROLLER_GEN");
        assert_eq!(tool_env_var("helm"), "WERK_TOOL_HELM");
    }

    #[test]
    fn test_with_tool_prepends_path() {
        let ctx = ActionContext::new("/work").with_tool("helm", Path::new("/cache/helm/v3/helm"));

        let path = ctx.env.get("PATH").unwrap();
        assert!(path.starts_with("/cache/helm/v3"));
        assert_eq!(
            ctx.env.get("WERK_TOOL_HELM").map(String::as_str),
            Some("/cache/helm/v3/helm")
        );
        assert_eq!(
            ctx.tools.get("helm"),
            Some(&PathBuf::from("/cache/helm/v3/helm"))
        );
    }
}
