use anyhow::Result;
use std::process::ExitCode;

use werk::config_discovery::Project;
use werk::pipeline::compose_goals;

use crate::cli::{GlobalArgs, GraphArgs};
use crate::commands::{self, LoadError};

pub fn run(args: GraphArgs, _global: &GlobalArgs, project: Result<Project>) -> Result<ExitCode> {
    let project = commands::project(project)?;
    let mut manifest = commands::manifest(&project, &[])?;
    compose_goals(&mut manifest.graph).map_err(|e| anyhow::Error::new(e).context(LoadError))?;

    print!("{}", manifest.graph.to_dot(args.goal.as_deref())?);
    Ok(ExitCode::SUCCESS)
}
