mod cli;
mod commands;

use clap::Parser;
use std::process::ExitCode;

use werk::cli_utils::werk_prefix;
use werk::config_discovery;
use werk::logging::{self, LogFormat};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Discovery failures are reported by the command that needs the project
    let project = config_discovery::load_project(cli.global.config.as_deref());

    let (level, format) = match &project {
        Ok(project) => (
            project.config.observability.log_level.clone(),
            Some(project.config.observability.log_format.clone()),
        ),
        Err(_) => ("info".to_string(), None),
    };
    logging::init(&level, LogFormat::from_env(format.as_deref()));

    let global = cli.global;
    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args, &global, project).await,
        Commands::List(args) => commands::list::run(args, &global, project),
        Commands::Graph(args) => commands::graph::run(args, &global, project),
        Commands::Tools(args) => commands::tools::run(args.command, &global, project).await,
        Commands::Config(args) => commands::config::run(args.command, &global, project),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} Error: {:#}", werk_prefix(), err);
            ExitCode::from(commands::exit_code(&err))
        }
    }
}
