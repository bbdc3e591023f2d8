//! Error taxonomy for the build engine
//!
//! Configuration problems are detected before any action runs. Provisioning
//! and action failures abort the run at the first occurrence. Nothing here is
//! retried.
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Problems with the declared graph, detected before execution starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Target '{0}' is declared more than once")]
    DuplicateTarget(String),

    #[error("Unknown target '{name}'{}", .referenced_by.as_ref().map(|r| format!(" (referenced by '{}')", r)).unwrap_or_default())]
    UnknownTarget {
        name: String,
        referenced_by: Option<String>,
    },

    #[error("Dependency cycle detected: {}", .members.join(" -> "))]
    Cycle { members: Vec<String> },

    #[error("File target '{0}' declares no outputs; staleness cannot be determined")]
    AmbiguousTarget(String),

    #[error("Target '{target}' requires unknown tool '{tool}'")]
    UnknownTool { target: String, tool: String },

    #[error("Target '{target}' depends on missing file: {}", .path.display())]
    MissingInput { target: String, path: PathBuf },

    #[error("Verify target '{target}' checks unknown target '{checks}'")]
    UnknownVerifyTarget { target: String, checks: String },
}

/// Failure while materializing a pinned tool into the cache
///
/// Cloneable so a single provisioning result can be shared between every
/// caller waiting on the same cache key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Failed to download {tool} from {url}: {message}")]
    Network {
        tool: String,
        url: String,
        message: String,
    },

    #[error("Checksum mismatch for {tool}: expected {expected}, got {actual}")]
    Checksum {
        tool: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to extract '{entry}' for {tool}: {message}")]
    Extraction {
        tool: String,
        entry: String,
        message: String,
    },

    #[error("Tool {tool} is not available for platform {platform}")]
    UnsupportedPlatform { tool: String, platform: String },

    #[error("Failed to build {tool}: {message}")]
    Build {
        tool: String,
        message: String,
        output: String,
    },

    #[error("Failed to install {tool} into the cache: {message}")]
    Store { tool: String, message: String },
}

/// Failure of a target's action
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command exited with code {code}")]
    NonZeroExit { code: i32, output: String },

    #[error("Command timed out after {}s", .after.as_secs())]
    Timeout { after: Duration, output: String },

    #[error("Verification failed:\n{report}")]
    VerifyMismatch { report: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl ActionError {
    /// Captured output of the failed command, if any
    pub fn output(&self) -> Option<&str> {
        match self {
            ActionError::NonZeroExit { output, .. } | ActionError::Timeout { output, .. } => {
                Some(output.as_str())
            }
            ActionError::VerifyMismatch { report } => Some(report.as_str()),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ActionError::Timeout { .. })
    }
}

/// Top-level engine error
#[derive(Error, Debug)]
pub enum WerkError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Target '{target}' could not provision its tools: {source}")]
    Provision {
        target: String,
        #[source]
        source: ProvisionError,
    },

    #[error("Target '{target}' failed: {source}")]
    Action {
        target: String,
        #[source]
        source: ActionError,
    },
}

impl WerkError {
    /// Name of the target the error is attributed to, if any
    pub fn target(&self) -> Option<&str> {
        match self {
            WerkError::Configuration(_) => None,
            WerkError::Provision { target, .. } | WerkError::Action { target, .. } => {
                Some(target.as_str())
            }
        }
    }

    /// Process exit code for this error class
    pub fn exit_code(&self) -> i32 {
        match self {
            WerkError::Configuration(_) => 2,
            WerkError::Provision { .. } | WerkError::Action { .. } => 1,
        }
    }
}
