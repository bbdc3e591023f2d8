use anyhow::{Context, Result};
use std::process::ExitCode;
use tracing::info;

use werk::config::WerkConfig;
use werk::config_discovery::Project;
use werk::pipeline::compose_goals;

use crate::cli::{ConfigCommands, GlobalArgs};
use crate::commands::{self, LoadError};

pub fn run(
    command: ConfigCommands,
    global: &GlobalArgs,
    project: Result<Project>,
) -> Result<ExitCode> {
    match command {
        ConfigCommands::Validate => validate(global, project),
        ConfigCommands::Show => show(project),
        ConfigCommands::Example => example(),
    }
}

fn validate(global: &GlobalArgs, project: Result<Project>) -> Result<ExitCode> {
    let project = commands::project(project)?;
    info!(root = %project.root.display(), "Validating project");

    let mut manifest = commands::manifest(&project, &[])?;
    let declared = manifest.graph.len();
    compose_goals(&mut manifest.graph).map_err(|e| anyhow::Error::new(e).context(LoadError))?;
    for target in manifest.graph.targets() {
        manifest
            .graph
            .resolve(&target.name)
            .map_err(|e| anyhow::Error::new(e).context(LoadError))?;
    }

    match &project.config_path {
        Some(path) => println!("✓ Configuration is valid: {}", path.display()),
        None => println!("✓ No werk.toml found, using defaults"),
    }
    println!("✓ Manifest is valid: {}", project.manifest_path().display());
    println!("\nSummary:");
    println!("  - Project root: {}", project.root.display());
    println!("  - Targets: {}", declared);
    println!("  - Tools: {}", manifest.tools.len());
    println!("  - Jobs: {}", project.config.executor.jobs);
    println!(
        "  - Tool cache: {}",
        commands::cache_dir(global, &project).display()
    );

    Ok(ExitCode::SUCCESS)
}

fn show(project: Result<Project>) -> Result<ExitCode> {
    let project = commands::project(project)?;

    println!("Effective Configuration:\n");
    println!(
        "{}",
        toml::to_string_pretty(&project.config).context("Failed to render configuration")?
    );

    Ok(ExitCode::SUCCESS)
}

fn example() -> Result<ExitCode> {
    println!("{}", WerkConfig::example()?);
    Ok(ExitCode::SUCCESS)
}
