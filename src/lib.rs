// Library interface for werk
// The binary and the integration tests drive the engine through these modules

pub mod action;
pub mod cli_utils;
pub mod config;
pub mod config_discovery;
pub mod config_expansion;
pub mod error;
pub mod executor;
pub mod graph;
pub mod logging;
pub mod pipeline;
pub mod staleness;
pub mod tools;
pub mod xdg;

// Re-export commonly used types
pub use error::{ActionError, ConfigurationError, ProvisionError, WerkError};
pub use executor::{ExecutionReport, Executor, ExecutorOptions};
pub use graph::{load_manifest, Manifest, Target, TaskGraph};
pub use pipeline::PipelineDriver;
pub use staleness::{Staleness, StalenessOracle};
pub use tools::{ToolProvisioner, ToolSet, ToolSpec};
