use anyhow::Result;
use serde_json::json;
use std::process::ExitCode;

use werk::config_discovery::Project;
use werk::graph::Dependency;
use werk::pipeline::{compose_goals, is_standard_goal};

use crate::cli::{GlobalArgs, ListArgs};
use crate::commands::{self, LoadError};

pub fn run(args: ListArgs, _global: &GlobalArgs, project: Result<Project>) -> Result<ExitCode> {
    let project = commands::project(project)?;
    let mut manifest = commands::manifest(&project, &[])?;
    compose_goals(&mut manifest.graph).map_err(|e| anyhow::Error::new(e).context(LoadError))?;

    if args.json {
        let targets: Vec<_> = manifest
            .graph
            .targets()
            .map(|t| {
                json!({
                    "name": t.name,
                    "kind": t.kind.as_str(),
                    "stage": t.stage,
                    "ci_only": t.ci_only,
                    "verify": t.verify,
                    "depends": t.target_dependencies().collect::<Vec<_>>(),
                    "outputs": t.outputs,
                    "tools": t.tools,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(ExitCode::SUCCESS);
    }

    let (goals, targets): (Vec<_>, Vec<_>) = manifest
        .graph
        .targets()
        .partition(|t| is_standard_goal(&t.name));

    println!("Goals:");
    for goal in goals {
        let edges: Vec<&str> = goal.target_dependencies().collect();
        println!("  {:<16} -> {}", goal.name, edges.join(", "));
    }

    println!("\nTargets:");
    for target in targets {
        let mut notes = Vec::new();
        if let Some(stage) = &target.stage {
            notes.push(format!("stage={}", stage));
        }
        if target.ci_only {
            notes.push("ci-only".to_string());
        }
        if let Some(checks) = &target.verify {
            notes.push(format!("verifies={}", checks));
        }
        let inputs = target
            .dependencies
            .iter()
            .filter(|d| matches!(d, Dependency::File(_)))
            .count();
        if inputs > 0 {
            notes.push(format!("inputs={}", inputs));
        }

        println!(
            "  {:<28} {:<6} {}",
            target.name,
            target.kind.as_str(),
            notes.join(" ")
        );
        for output in &target.outputs {
            println!("      -> {}", output.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}
