//! Goal execution
//!
//! The executor resolves a goal's closure, provisions each target's tools,
//! asks the [`StalenessOracle`] whether it must run and runs its action at
//! most once. The first failure stops the run: no new target is started once
//! a failure has been recorded.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use serde::Serialize;

use crate::action::ActionContext;
use crate::error::{ConfigurationError, WerkError};
use crate::graph::{TaskGraph, Target, TargetKind};
use crate::logging::{operations, status};
use crate::staleness::{Staleness, StalenessOracle};
use crate::tools::{ToolProvisioner, ToolSet};

/// Knobs for a single run
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum concurrently running actions; 1 runs strictly in order
    pub jobs: usize,
    /// Timeout for targets that do not declare their own
    pub default_timeout: Option<Duration>,
    /// Running in CI (enables `ci-only` targets)
    pub ci: bool,
    /// Treat every file target as stale
    pub force: bool,
    /// Workspace root; relative paths resolve against it
    pub root: PathBuf,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            default_timeout: None,
            ci: false,
            force: false,
            root: PathBuf::from("."),
        }
    }
}

/// Terminal state of a visited target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetResult {
    Succeeded,
    Failed,
    Skipped,
}

impl TargetResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetResult::Succeeded => "succeeded",
            TargetResult::Failed => "failed",
            TargetResult::Skipped => "skipped",
        }
    }
}

/// What happened to one target during a run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub name: String,
    pub stale: Staleness,
    pub result: TargetResult,
    pub duration: Duration,
    /// Captured action output (stdout and stderr interleaved)
    pub output: String,
}

/// Per-target outcomes of a run
///
/// Targets that were never started because of an earlier failure have no
/// record.
#[derive(Debug)]
pub struct ExecutionReport {
    pub goal: String,
    pub records: Vec<ExecutionRecord>,
    pub failure: Option<WerkError>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn record(&self, name: &str) -> Option<&ExecutionRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Targets whose action ran (successfully or not)
    pub fn executed(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records
            .iter()
            .filter(|r| r.result != TargetResult::Skipped)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records
            .iter()
            .filter(|r| r.result == TargetResult::Skipped)
    }

    /// Record of the target that failed the run
    pub fn failed_record(&self) -> Option<&ExecutionRecord> {
        self.records
            .iter()
            .find(|r| r.result == TargetResult::Failed)
    }
}

/// Result of visiting one target
struct Visit {
    record: ExecutionRecord,
    /// Dependents must rebuild
    rebuilt: bool,
    failure: Option<WerkError>,
}

/// Runs goals against a task graph
pub struct Executor<'a> {
    graph: &'a TaskGraph,
    tools: &'a ToolSet,
    provisioner: &'a ToolProvisioner,
    oracle: StalenessOracle,
    options: ExecutorOptions,
}

impl<'a> Executor<'a> {
    pub fn new(
        graph: &'a TaskGraph,
        tools: &'a ToolSet,
        provisioner: &'a ToolProvisioner,
        options: ExecutorOptions,
    ) -> Self {
        let oracle = StalenessOracle::new(&options.root).forcing(options.force);
        Self {
            graph,
            tools,
            provisioner,
            oracle,
            options,
        }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Run `goal` and everything it depends on
    ///
    /// Configuration errors are returned before any action runs. Provisioning
    /// and action failures are reported in the [`ExecutionReport`].
    pub fn run(&self, goal: &str) -> Result<ExecutionReport, ConfigurationError> {
        let order = self.graph.resolve(goal)?;
        self.oracle.check_inputs(&order)?;

        tracing::info!(
            goal = %goal,
            operation = operations::RUN,
            targets = order.len(),
            jobs = self.options.jobs,
            "executing goal"
        );

        let started = Instant::now();
        let (records, failure) = if self.options.jobs <= 1 || order.len() <= 1 {
            self.run_sequential(&order)
        } else {
            self.run_parallel(&order)
        };

        let report = ExecutionReport {
            goal: goal.to_string(),
            records,
            failure,
        };

        tracing::info!(
            goal = %goal,
            operation = operations::RUN,
            status = if report.is_success() { status::SUCCESS } else { status::ERROR },
            executed = report.executed().count(),
            skipped = report.skipped().count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "goal finished"
        );

        Ok(report)
    }

    /// Staleness of every target in the closure, without running anything
    ///
    /// Stale file targets are assumed to rebuild so that propagation is
    /// reflected in the plan.
    pub fn plan(&self, goal: &str) -> Result<Vec<(&'a Target, Staleness)>, ConfigurationError> {
        let order = self.graph.resolve(goal)?;
        self.oracle.check_inputs(&order)?;

        let mut rebuilt = HashSet::new();
        let mut plan = Vec::with_capacity(order.len());

        for target in order {
            if self.is_excluded(target) {
                plan.push((target, Staleness::Fresh));
                continue;
            }

            let staleness = self.oracle.check(target, self.graph, &rebuilt)?;
            if staleness.is_stale() && passes_rebuild(target, &rebuilt) {
                rebuilt.insert(target.name.clone());
            }
            plan.push((target, staleness));
        }

        Ok(plan)
    }

    fn is_excluded(&self, target: &Target) -> bool {
        target.ci_only && !self.options.ci
    }

    fn run_sequential(&self, order: &[&Target]) -> (Vec<ExecutionRecord>, Option<WerkError>) {
        let mut rebuilt = HashSet::new();
        let mut records = Vec::with_capacity(order.len());

        for target in order {
            let visit = self.visit(target, &rebuilt);
            if visit.rebuilt {
                rebuilt.insert(target.name.clone());
            }
            records.push(visit.record);

            if visit.failure.is_some() {
                return (records, visit.failure);
            }
        }

        (records, None)
    }

    /// Worker-pool execution
    ///
    /// The scheduler hands ready targets to the pool in resolved order. Once a
    /// failure arrives it stops dispatching and waits for in-flight targets.
    fn run_parallel(&self, order: &[&Target]) -> (Vec<ExecutionRecord>, Option<WerkError>) {
        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.name.as_str(), idx))
            .collect();

        let mut waiting_on = vec![0usize; order.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); order.len()];
        for (idx, target) in order.iter().enumerate() {
            let deps: BTreeSet<usize> = target
                .target_dependencies()
                .filter_map(|dep| position.get(dep).copied())
                .collect();
            waiting_on[idx] = deps.len();
            for dep in deps {
                dependents[dep].push(idx);
            }
        }

        let mut ready: BTreeSet<usize> = (0..order.len()).filter(|&i| waiting_on[i] == 0).collect();
        let mut rebuilt = HashSet::new();
        let mut records: Vec<(usize, ExecutionRecord)> = Vec::with_capacity(order.len());
        let mut failure: Option<WerkError> = None;

        let workers = self.options.jobs.min(order.len());

        thread::scope(|s| {
            let (job_tx, job_rx) = unbounded::<(usize, HashSet<String>)>();
            let (done_tx, done_rx) = unbounded::<(usize, Visit)>();

            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                s.spawn(move || {
                    for (idx, rebuilt) in job_rx {
                        let visit = self.visit(order[idx], &rebuilt);
                        if done_tx.send((idx, visit)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            let mut in_flight = 0usize;
            loop {
                while failure.is_none() {
                    let Some(idx) = ready.pop_first() else { break };
                    if job_tx.send((idx, rebuilt.clone())).is_err() {
                        break;
                    }
                    in_flight += 1;
                }

                if in_flight == 0 {
                    break;
                }

                let Ok((idx, visit)) = done_rx.recv() else {
                    break;
                };
                in_flight -= 1;

                if visit.rebuilt {
                    rebuilt.insert(order[idx].name.clone());
                }
                records.push((idx, visit.record));

                match visit.failure {
                    Some(err) => {
                        if failure.is_none() {
                            failure = Some(err);
                        }
                    }
                    None => {
                        for &next in &dependents[idx] {
                            waiting_on[next] -= 1;
                            if waiting_on[next] == 0 {
                                ready.insert(next);
                            }
                        }
                    }
                }
            }

            drop(job_tx);
        });

        records.sort_by_key(|(idx, _)| *idx);
        (records.into_iter().map(|(_, r)| r).collect(), failure)
    }

    fn visit(&self, target: &Target, rebuilt: &HashSet<String>) -> Visit {
        let started = Instant::now();

        if self.is_excluded(target) {
            tracing::info!(
                target = %target.name,
                operation = operations::VISIT,
                status = status::SKIPPED,
                reason = "ci-only",
                "skipping CI-only target"
            );
            return Visit {
                record: record(target, Staleness::Fresh, TargetResult::Skipped, started, String::new()),
                rebuilt: false,
                failure: None,
            };
        }

        let ctx = match self.context_for(target) {
            Ok(ctx) => ctx,
            Err(err) => return failed(target, Staleness::Fresh, started, err),
        };

        let staleness = match self.oracle.check(target, self.graph, rebuilt) {
            Ok(staleness) => staleness,
            Err(err) => return failed(target, Staleness::Fresh, started, err.into()),
        };

        if !staleness.is_stale() {
            tracing::info!(
                target = %target.name,
                operation = operations::VISIT,
                status = status::SKIPPED,
                reason = %staleness,
                "target up to date"
            );
            return Visit {
                record: record(target, staleness, TargetResult::Skipped, started, String::new()),
                rebuilt: false,
                failure: None,
            };
        }

        let Some(action) = &target.action else {
            tracing::debug!(
                target = %target.name,
                operation = operations::VISIT,
                status = status::SUCCESS,
                reason = %staleness,
                "target has no action"
            );
            return Visit {
                rebuilt: passes_rebuild(target, rebuilt),
                record: record(target, staleness, TargetResult::Succeeded, started, String::new()),
                failure: None,
            };
        };

        tracing::info!(
            target = %target.name,
            operation = operations::EXECUTE,
            reason = %staleness,
            action = %action.describe(),
            "running target"
        );

        match action.execute(&ctx) {
            Ok(output) => {
                tracing::info!(
                    target = %target.name,
                    operation = operations::EXECUTE,
                    status = status::SUCCESS,
                    duration_ms = output.duration.as_millis() as u64,
                    "target succeeded"
                );
                Visit {
                    rebuilt: passes_rebuild(target, rebuilt),
                    record: record(
                        target,
                        staleness,
                        TargetResult::Succeeded,
                        started,
                        output.output_lossy(),
                    ),
                    failure: None,
                }
            }
            Err(source) => failed(
                target,
                staleness,
                started,
                WerkError::Action {
                    target: target.name.clone(),
                    source,
                },
            ),
        }
    }

    /// Provision the target's tools and assemble its action context
    fn context_for(&self, target: &Target) -> Result<ActionContext, WerkError> {
        let working_dir = match &target.cwd {
            Some(cwd) => self.options.root.join(cwd),
            None => self.options.root.clone(),
        };

        let mut ctx = ActionContext::new(working_dir);
        ctx.env.extend(target.env.clone());
        ctx.timeout = target.timeout.or(self.options.default_timeout);

        for name in &target.tools {
            let spec = self.tools.get(name).ok_or_else(|| {
                WerkError::from(ConfigurationError::UnknownTool {
                    target: target.name.clone(),
                    tool: name.clone(),
                })
            })?;

            let path = match self.provisioner.resolved(spec) {
                Some(path) => path,
                None => self
                    .provisioner
                    .provision(spec)
                    .map_err(|source| WerkError::Provision {
                        target: target.name.clone(),
                        source,
                    })?,
            };

            ctx = ctx.with_tool(name, &path);
        }

        Ok(ctx)
    }
}

/// Whether a completed target forces its dependents to rebuild
///
/// File targets do once they ran. Phony targets run every time, so they only
/// pass on a rebuild of one of their own dependencies.
fn passes_rebuild(target: &Target, rebuilt: &HashSet<String>) -> bool {
    match target.kind {
        TargetKind::File => true,
        TargetKind::Phony => target
            .target_dependencies()
            .any(|dep| rebuilt.contains(dep)),
    }
}

fn record(
    target: &Target,
    stale: Staleness,
    result: TargetResult,
    started: Instant,
    output: String,
) -> ExecutionRecord {
    ExecutionRecord {
        name: target.name.clone(),
        stale,
        result,
        duration: started.elapsed(),
        output,
    }
}

fn failed(target: &Target, stale: Staleness, started: Instant, err: WerkError) -> Visit {
    tracing::error!(
        target = %target.name,
        operation = operations::EXECUTE,
        status = status::ERROR,
        error = %err,
        "target failed"
    );

    let output = match &err {
        WerkError::Action { source, .. } => source.output().unwrap_or_default().to_string(),
        WerkError::Provision { source, .. } => match source {
            crate::error::ProvisionError::Build { output, .. } => output.clone(),
            _ => String::new(),
        },
        WerkError::Configuration(_) => String::new(),
    };

    Visit {
        record: record(target, stale, TargetResult::Failed, started, output),
        rebuilt: false,
        failure: Some(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionOutput};
    use crate::error::ActionError;
    use crate::tools::{Fetcher, ToolSource, ToolSpec, ToolStore};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Records invocations in a shared log and optionally writes a file
    #[derive(Debug)]
    struct Recording {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        writes: Option<PathBuf>,
        fail: bool,
        delay: Duration,
    }

    impl Action for Recording {
        fn describe(&self) -> String {
            format!("record {}", self.name)
        }

        fn execute(&self, ctx: &ActionContext) -> Result<ActionOutput, ActionError> {
            thread::sleep(self.delay);
            self.log.lock().unwrap().push(self.name.clone());

            if self.fail {
                return Err(ActionError::NonZeroExit {
                    code: 1,
                    output: format!("{} exploded", self.name),
                });
            }

            if let Some(path) = &self.writes {
                let path = ctx.resolve(path);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, &self.name).unwrap();
            }

            Ok(ActionOutput {
                exit_code: 0,
                duration: self.delay,
                output: format!("{} ok\n", self.name).into_bytes(),
            })
        }
    }

    struct Harness {
        temp: TempDir,
        log: Arc<Mutex<Vec<String>>>,
        provisioner: ToolProvisioner,
    }

    struct NoNetwork;

    impl Fetcher for NoNetwork {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
            Err(format!("offline: {}", url))
        }
    }

    impl Harness {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let store = ToolStore::new(temp.path().join(".cache")).unwrap();
            let provisioner = ToolProvisioner::new(store, Arc::new(NoNetwork), temp.path());
            Self {
                temp,
                log: Arc::new(Mutex::new(Vec::new())),
                provisioner,
            }
        }

        fn root(&self) -> &Path {
            self.temp.path()
        }

        fn action(&self, name: &str, writes: Option<&str>) -> Recording {
            Recording {
                name: name.to_string(),
                log: Arc::clone(&self.log),
                writes: writes.map(PathBuf::from),
                fail: false,
                delay: Duration::ZERO,
            }
        }

        fn failing(&self, name: &str) -> Recording {
            Recording {
                fail: true,
                ..self.action(name, None)
            }
        }

        fn options(&self, jobs: usize) -> ExecutorOptions {
            ExecutorOptions {
                jobs,
                root: self.root().to_path_buf(),
                ..Default::default()
            }
        }

        fn run(&self, graph: &TaskGraph, goal: &str, options: ExecutorOptions) -> ExecutionReport {
            let tools = ToolSet::new();
            Executor::new(graph, &tools, &self.provisioner, options)
                .run(goal)
                .unwrap()
        }

        fn executed(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.log.lock().unwrap().clear();
        }
    }

    fn graph_with(targets: Vec<Target>) -> TaskGraph {
        let mut graph = TaskGraph::new();
        for target in targets {
            graph.add_target(target).unwrap();
        }
        graph
    }

    #[test]
    fn test_second_run_skips_file_targets() {
        let h = Harness::new();
        let graph = graph_with(vec![
            Target::file("gen").output("gen.out").action(h.action("gen", Some("gen.out"))),
            Target::file("bin")
                .depends_on("gen")
                .output("bin.out")
                .action(h.action("bin", Some("bin.out"))),
            Target::phony("build").depends_on("bin"),
        ]);

        let first = h.run(&graph, "build", h.options(1));
        assert!(first.is_success());
        assert_eq!(h.executed(), vec!["gen", "bin"]);

        h.clear();
        let second = h.run(&graph, "build", h.options(1));
        assert!(second.is_success());
        assert!(h.executed().is_empty());
        for name in ["gen", "bin"] {
            assert_eq!(second.record(name).unwrap().result, TargetResult::Skipped);
        }
    }

    #[test]
    fn test_propagated_staleness_scenario() {
        let h = Harness::new();
        fs::write(h.root().join("b.out"), "prior").unwrap();
        let graph = graph_with(vec![
            Target::file("a").output("a.out").action(h.action("a", Some("a.out"))),
            Target::file("b")
                .depends_on("a")
                .output("b.out")
                .action(h.action("b", Some("b.out"))),
        ]);

        let first = h.run(&graph, "b", h.options(1));
        assert_eq!(h.executed(), vec!["a", "b"]);
        assert_eq!(
            first.record("b").unwrap().stale,
            Staleness::UpstreamRebuilt("a".into())
        );

        h.clear();
        let second = h.run(&graph, "b", h.options(1));
        assert!(h.executed().is_empty());
        assert_eq!(second.skipped().count(), 2);
    }

    fn chain_through_phony(h: &Harness) -> TaskGraph {
        graph_with(vec![
            Target::file("a").output("a.out").action(h.action("a", Some("a.out"))),
            Target::phony("generate").depends_on("a"),
            Target::file("c")
                .depends_on("generate")
                .output("c.out")
                .action(h.action("c", Some("c.out"))),
        ])
    }

    #[test]
    fn test_rebuild_propagates_through_phony_target() {
        for jobs in [1, 4] {
            let h = Harness::new();
            let graph = chain_through_phony(&h);

            h.run(&graph, "c", h.options(jobs));
            assert_eq!(h.executed(), vec!["a", "c"]);

            h.clear();
            fs::remove_file(h.root().join("a.out")).unwrap();
            let report = h.run(&graph, "c", h.options(jobs));

            assert!(report.is_success());
            assert_eq!(h.executed(), vec!["a", "c"]);
            let c = report.record("c").unwrap();
            assert_eq!(c.result, TargetResult::Succeeded);
            assert_eq!(c.stale, Staleness::UpstreamRebuilt("generate".into()));
        }
    }

    #[test]
    fn test_phony_target_alone_does_not_force_dependents() {
        let h = Harness::new();
        let graph = chain_through_phony(&h);

        h.run(&graph, "c", h.options(1));
        h.clear();
        let report = h.run(&graph, "c", h.options(1));

        assert!(h.executed().is_empty());
        assert_eq!(report.record("generate").unwrap().result, TargetResult::Succeeded);
        assert_eq!(report.record("c").unwrap().result, TargetResult::Skipped);
    }

    #[test]
    fn test_plan_propagates_through_phony_target() {
        let h = Harness::new();
        let graph = chain_through_phony(&h);
        h.run(&graph, "c", h.options(1));
        fs::remove_file(h.root().join("a.out")).unwrap();

        let tools = ToolSet::new();
        let executor = Executor::new(&graph, &tools, &h.provisioner, h.options(1));
        let plan = executor.plan("c").unwrap();
        let stale: Vec<(&str, Staleness)> = plan
            .into_iter()
            .map(|(t, s)| (t.name.as_str(), s))
            .collect();

        assert_eq!(
            stale,
            vec![
                ("a", Staleness::MissingOutput(PathBuf::from("a.out"))),
                ("generate", Staleness::Phony),
                ("c", Staleness::UpstreamRebuilt("generate".into())),
            ]
        );
    }

    #[test]
    fn test_phony_targets_always_run() {
        let h = Harness::new();
        let graph = graph_with(vec![Target::phony("test").action(h.action("test", None))]);

        h.run(&graph, "test", h.options(1));
        h.run(&graph, "test", h.options(1));

        assert_eq!(h.executed(), vec!["test", "test"]);
    }

    #[test]
    fn test_shared_dependency_runs_once() {
        let h = Harness::new();
        let graph = graph_with(vec![
            Target::phony("depend").action(h.action("depend", None)),
            Target::phony("generate").depends_on("depend").action(h.action("generate", None)),
            Target::phony("compile").depends_on("depend").action(h.action("compile", None)),
            Target::phony("build")
                .depends_on("generate")
                .depends_on("compile"),
        ]);

        for jobs in [1, 4] {
            h.clear();
            let report = h.run(&graph, "build", h.options(jobs));
            assert!(report.is_success());
            let log = h.executed();
            assert_eq!(log.iter().filter(|n| *n == "depend").count(), 1);
            assert_eq!(log.len(), 3);
            assert_eq!(log[0], "depend");
        }
    }

    #[test]
    fn test_fail_fast_sequential() {
        let h = Harness::new();
        let graph = graph_with(vec![
            Target::phony("a").action(h.failing("a")),
            Target::phony("b").action(h.action("b", None)),
            Target::phony("c").depends_on("a").action(h.action("c", None)),
            Target::phony("all").depends_on("a").depends_on("b").depends_on("c"),
        ]);

        let report = h.run(&graph, "all", h.options(1));

        assert!(!report.is_success());
        assert_eq!(h.executed(), vec!["a"]);
        assert!(report.record("c").is_none());
        let failed = report.failed_record().unwrap();
        assert_eq!(failed.name, "a");
        assert!(failed.output.contains("a exploded"));
        assert_eq!(report.failure.as_ref().unwrap().target(), Some("a"));
    }

    #[test]
    fn test_fail_fast_parallel() {
        let h = Harness::new();
        let slow_b = Recording {
            delay: Duration::from_millis(200),
            ..h.action("b", None)
        };
        let graph = graph_with(vec![
            Target::phony("a").action(h.failing("a")),
            Target::phony("b").action(slow_b),
            Target::phony("c").depends_on("a").action(h.action("c", None)),
            Target::phony("d").depends_on("b").action(h.action("d", None)),
            Target::phony("all")
                .depends_on("a")
                .depends_on("b")
                .depends_on("c")
                .depends_on("d"),
        ]);

        let report = h.run(&graph, "all", h.options(2));
        let log = h.executed();

        assert!(!report.is_success());
        assert!(!log.contains(&"c".to_string()));
        // b was already running when a failed; d was never started
        assert!(log.contains(&"b".to_string()));
        assert!(!log.contains(&"d".to_string()));
        assert!(report.record("all").is_none());
    }

    #[test]
    fn test_parallel_respects_dependencies() {
        let h = Harness::new();
        let graph = graph_with(vec![
            Target::file("a").output("a.out").action(h.action("a", Some("a.out"))),
            Target::file("b").output("b.out").action(h.action("b", Some("b.out"))),
            Target::file("c")
                .depends_on("a")
                .depends_on("b")
                .output("c.out")
                .action(h.action("c", Some("c.out"))),
        ]);

        let report = h.run(&graph, "c", h.options(4));

        assert!(report.is_success());
        assert_eq!(h.executed().last().unwrap(), "c");
        let names: Vec<&str> = report.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_runs_nothing() {
        let h = Harness::new();
        let graph = graph_with(vec![
            Target::phony("a").depends_on("b").action(h.action("a", None)),
            Target::phony("b").depends_on("a").action(h.action("b", None)),
        ]);
        let tools = ToolSet::new();

        let err = Executor::new(&graph, &tools, &h.provisioner, h.options(1))
            .run("a")
            .unwrap_err();

        assert!(matches!(err, ConfigurationError::Cycle { .. }));
        assert!(h.executed().is_empty());
    }

    #[test]
    fn test_missing_input_detected_before_running() {
        let h = Harness::new();
        let graph = graph_with(vec![
            Target::phony("first").action(h.action("first", None)),
            Target::file("second")
                .depends_on("first")
                .input("missing.go")
                .output("out")
                .action(h.action("second", Some("out"))),
        ]);
        let tools = ToolSet::new();

        let err = Executor::new(&graph, &tools, &h.provisioner, h.options(1))
            .run("second")
            .unwrap_err();

        assert!(matches!(err, ConfigurationError::MissingInput { .. }));
        assert!(h.executed().is_empty());
    }

    #[test]
    fn test_ci_only_targets() {
        let h = Harness::new();
        let mut network = Target::phony("kind-network").action(h.action("kind-network", None));
        network.ci_only = true;
        let graph = graph_with(vec![network]);

        let local = h.run(&graph, "kind-network", h.options(1));
        assert_eq!(local.record("kind-network").unwrap().result, TargetResult::Skipped);
        assert!(h.executed().is_empty());

        let ci = h.run(
            &graph,
            "kind-network",
            ExecutorOptions {
                ci: true,
                ..h.options(1)
            },
        );
        assert_eq!(ci.record("kind-network").unwrap().result, TargetResult::Succeeded);
        assert_eq!(h.executed(), vec!["kind-network"]);
    }

    #[test]
    fn test_force_rebuilds_fresh_targets() {
        let h = Harness::new();
        let graph = graph_with(vec![Target::file("gen")
            .output("gen.out")
            .action(h.action("gen", Some("gen.out")))]);

        h.run(&graph, "gen", h.options(1));
        h.run(
            &graph,
            "gen",
            ExecutorOptions {
                force: true,
                ..h.options(1)
            },
        );

        assert_eq!(h.executed(), vec!["gen", "gen"]);
    }

    #[test]
    fn test_provision_failure_aborts() {
        let h = Harness::new();
        let mut tools = ToolSet::new();
        tools.insert(ToolSpec::new(
            "helm",
            "v3",
            ToolSource::Download {
                url: "https://example.com/helm".into(),
                entry: None,
                sha256: None,
            },
        ));
        let graph = graph_with(vec![
            Target::phony("chart").tool("helm").action(h.action("chart", None)),
            Target::phony("publish").depends_on("chart").action(h.action("publish", None)),
        ]);

        let report = Executor::new(&graph, &tools, &h.provisioner, h.options(1))
            .run("publish")
            .unwrap();

        assert!(matches!(report.failure, Some(WerkError::Provision { .. })));
        assert!(h.executed().is_empty());
    }

    #[test]
    fn test_provisioned_tool_is_on_path() {
        #[derive(Debug)]
        struct SeesTool(Arc<AtomicUsize>);

        impl Action for SeesTool {
            fn describe(&self) -> String {
                "check tool".into()
            }

            fn execute(&self, ctx: &ActionContext) -> Result<ActionOutput, ActionError> {
                if ctx.tools.contains_key("kind")
                    && ctx.env.contains_key(&crate::action::tool_env_var("kind"))
                {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
                Ok(ActionOutput {
                    exit_code: 0,
                    duration: Duration::ZERO,
                    output: Vec::new(),
                })
            }
        }

        let h = Harness::new();
        let spec = ToolSpec::new(
            "kind",
            "v0.22.0",
            ToolSource::Download {
                url: "https://example.com/kind".into(),
                entry: None,
                sha256: None,
            },
        );
        // Pre-seed the cache so no fetch is needed
        h.provisioner
            .store()
            .install_bytes(&spec.key(), b"kind")
            .unwrap();
        let mut tools = ToolSet::new();
        tools.insert(spec);

        let seen = Arc::new(AtomicUsize::new(0));
        let graph = graph_with(vec![Target::phony("e2e")
            .tool("kind")
            .action(SeesTool(Arc::clone(&seen)))]);

        let report = Executor::new(&graph, &tools, &h.provisioner, h.options(1))
            .run("e2e")
            .unwrap();

        assert!(report.is_success());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_plan_reports_without_running() {
        let h = Harness::new();
        fs::write(h.root().join("b.out"), "prior").unwrap();
        let graph = graph_with(vec![
            Target::file("a").output("a.out").action(h.action("a", Some("a.out"))),
            Target::file("b")
                .depends_on("a")
                .output("b.out")
                .action(h.action("b", Some("b.out"))),
        ]);
        let tools = ToolSet::new();

        let plan = Executor::new(&graph, &tools, &h.provisioner, h.options(1))
            .plan("b")
            .unwrap();

        assert_eq!(plan[0].1, Staleness::MissingOutput("a.out".into()));
        assert_eq!(plan[1].1, Staleness::UpstreamRebuilt("a".into()));
        assert!(h.executed().is_empty());
    }
}
