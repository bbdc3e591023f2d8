use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// werk - declarative build orchestration
///
/// Runs pipeline goals (build, test, verify, image, chart, ...) declared in
/// `werk.kdl`, re-running only stale targets and provisioning pinned tools
/// into a shared cache.
#[derive(Parser, Debug)]
#[command(name = "werk")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Declarative build orchestration with file-staleness caching", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Config file path (default: nearest werk.toml)
    #[arg(short = 'c', long, env = "WERK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Tool cache directory
    #[arg(long, env = "WERK_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Running in CI (enables ci-only targets)
    #[arg(
        long,
        env = "CI",
        global = true,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub ci: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a goal and everything it depends on
    Run(RunArgs),

    /// List declared targets and pipeline goals
    List(ListArgs),

    /// Print the dependency graph in Graphviz DOT format
    Graph(GraphArgs),

    /// Manage provisioned tools
    Tools(ToolsArgs),

    /// Configuration management utilities
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Goal or target name (e.g. build, test, verify)
    pub goal: String,

    /// Variable overrides (KEY=VALUE)
    #[arg(value_parser = parse_override)]
    pub overrides: Vec<(String, String)>,

    /// Treat every file target as stale
    #[arg(short = 'B', long)]
    pub force: bool,

    /// Maximum concurrently running targets (0 = one per CPU)
    #[arg(short = 'j', long, env = "WERK_JOBS")]
    pub jobs: Option<usize>,

    /// Show what would run without running it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct GraphArgs {
    /// Restrict the graph to this goal's closure
    pub goal: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ToolsArgs {
    #[command(subcommand)]
    pub command: ToolsCommands,
}

#[derive(Subcommand, Debug)]
pub enum ToolsCommands {
    /// Provision declared tools into the cache
    Provision {
        /// Tool names (default: every declared tool)
        names: Vec<String>,
    },
    /// List cached tools
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove cached tools
    Clean {
        /// Only remove this tool (all versions)
        name: Option<String>,
    },
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate the configuration and manifest
    Validate,
    /// Show the effective configuration
    Show,
    /// Print an example werk.toml
    Example,
}

/// Parse a `KEY=VALUE` override
fn parse_override(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid override '{}', expected KEY=VALUE", s)),
    }
}
