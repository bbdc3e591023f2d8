use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use werk::cli_utils::werk_prefix;
use werk::config_discovery::Project;
use werk::executor::{ExecutionReport, ExecutorOptions};
use werk::pipeline::PipelineDriver;
use werk::tools::{HttpFetcher, ToolProvisioner, ToolStore};

use crate::cli::{GlobalArgs, RunArgs};
use crate::commands::{self, LoadError};

/// Download timeout for tool archives
const FETCH_TIMEOUT: Duration = Duration::from_secs(120);
const FETCH_TIMEOUT_CI: Duration = Duration::from_secs(600);

pub async fn run(args: RunArgs, global: &GlobalArgs, project: Result<Project>) -> Result<ExitCode> {
    let project = commands::project(project)?;
    let manifest = commands::manifest(&project, &args.overrides)?;
    let cache_dir = commands::cache_dir(global, &project);

    let options = ExecutorOptions {
        jobs: match args.jobs {
            Some(0) => num_cpus::get(),
            Some(jobs) => jobs,
            None => project.config.executor.jobs.max(1),
        },
        default_timeout: project
            .config
            .default_timeout()
            .map_err(|e| e.context(LoadError))?,
        ci: global.ci,
        force: args.force,
        root: project.root.clone(),
    };

    info!(
        goal = %args.goal,
        jobs = options.jobs,
        ci = options.ci,
        cache_dir = %cache_dir.display(),
        "Starting run"
    );

    let provisioner = Arc::new(provisioner(&cache_dir, &project, global.ci)?);
    let driver = PipelineDriver::new(manifest, provisioner, options, vec![cache_dir])
        .map_err(|e| anyhow::Error::new(e).context(LoadError))?;

    if args.dry_run {
        return dry_run(&driver, &args.goal);
    }

    let goal = args.goal.clone();
    let started = Instant::now();
    let report = tokio::task::spawn_blocking(move || driver.run(&goal))
        .await
        .context("Executor task panicked")??;

    summarize(&report, started.elapsed());

    match &report.failure {
        None => Ok(ExitCode::SUCCESS),
        Some(failure) => {
            eprintln!("{} {}", werk_prefix(), failure);
            if let Some(record) = report.failed_record() {
                if !record.output.trim().is_empty() {
                    eprintln!("{} Output of '{}':", werk_prefix(), record.name);
                    eprintln!("{}", record.output.trim_end());
                }
            }
            Ok(ExitCode::from(failure.exit_code() as u8))
        }
    }
}

/// Tool provisioner backed by the shared cache at `cache_dir`
pub fn provisioner(
    cache_dir: &std::path::Path,
    project: &Project,
    ci: bool,
) -> Result<ToolProvisioner> {
    let store = ToolStore::new(cache_dir)?;
    let timeout = if ci { FETCH_TIMEOUT_CI } else { FETCH_TIMEOUT };
    let fetcher = HttpFetcher::new(tokio::runtime::Handle::current(), timeout)?;
    debug!(cache_dir = %cache_dir.display(), "Tool cache ready");

    Ok(ToolProvisioner::new(
        store,
        Arc::new(fetcher),
        project.root.clone(),
    ))
}

fn dry_run(driver: &PipelineDriver, goal: &str) -> Result<ExitCode> {
    let plan = driver.plan(goal)?;

    println!("Plan for '{}':", goal);
    for (target, stale) in &plan {
        let verdict = if stale.is_stale() {
            format!("would run ({})", stale)
        } else {
            "up to date".to_string()
        };
        println!("  {:<28} {:<6} {}", target.name, target.kind.as_str(), verdict);
    }

    Ok(ExitCode::SUCCESS)
}

fn summarize(report: &ExecutionReport, elapsed: Duration) {
    let executed = report.executed().count();
    let skipped = report.skipped().count();

    eprintln!(
        "{} {}: {} ran, {} up to date in {:.2}s",
        werk_prefix(),
        report.goal,
        executed,
        skipped,
        elapsed.as_secs_f64()
    );
}
