use anyhow::{bail, Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use werk::cli_utils::werk_prefix;
use werk::config_discovery::Project;
use werk::tools::{ToolSpec, ToolStore};

use crate::cli::{GlobalArgs, ToolsCommands};
use crate::commands::{self, run::provisioner};

pub async fn run(
    command: ToolsCommands,
    global: &GlobalArgs,
    project: Result<Project>,
) -> Result<ExitCode> {
    let project = commands::project(project)?;
    let cache_dir = commands::cache_dir(global, &project);

    match command {
        ToolsCommands::Provision { names } => provision(&names, global, &project).await,
        ToolsCommands::List { json } => list(&ToolStore::new(&cache_dir)?, json),
        ToolsCommands::Clean { name } => clean(&ToolStore::new(&cache_dir)?, name.as_deref()),
    }
}

async fn provision(names: &[String], global: &GlobalArgs, project: &Project) -> Result<ExitCode> {
    let manifest = commands::manifest(project, &[])?;

    let specs: Vec<ToolSpec> = if names.is_empty() {
        manifest.tools.iter().cloned().collect()
    } else {
        let mut specs = Vec::new();
        for name in names {
            match manifest.tools.get(name) {
                Some(spec) => specs.push(spec.clone()),
                None => bail!("Tool '{}' is not declared in the manifest", name),
            }
        }
        specs
    };

    if specs.is_empty() {
        println!("No tools declared");
        return Ok(ExitCode::SUCCESS);
    }

    let cache_dir = commands::cache_dir(global, project);
    let provisioner = Arc::new(provisioner(&cache_dir, project, global.ci)?);

    for spec in specs {
        let provisioner = Arc::clone(&provisioner);
        let label = format!("{}@{}", spec.name, spec.version);
        info!(tool = %spec.name, version = %spec.version, "Provisioning tool");

        let path = tokio::task::spawn_blocking(move || provisioner.provision(&spec))
            .await
            .context("Provisioning task panicked")??;

        println!("✓ {} -> {}", label, path.display());
    }

    Ok(ExitCode::SUCCESS)
}

fn list(store: &ToolStore, json: bool) -> Result<ExitCode> {
    let tools = store.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(ExitCode::SUCCESS);
    }

    if tools.is_empty() {
        println!("No cached tools in {}", store.root().display());
        return Ok(ExitCode::SUCCESS);
    }

    println!("Cached tools in {}:", store.root().display());
    for tool in &tools {
        println!(
            "  {:<20} {:<12} {:<14} {:>10}",
            tool.name,
            tool.version,
            tool.platform,
            format_size(tool.size_bytes)
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn clean(store: &ToolStore, name: Option<&str>) -> Result<ExitCode> {
    let removed = store.remove(name)?;

    match name {
        Some(name) => eprintln!("{} Removed {} cached build(s) of {}", werk_prefix(), removed, name),
        None => eprintln!("{} Removed {} cached tool(s)", werk_prefix(), removed),
    }

    Ok(ExitCode::SUCCESS)
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
