//! Fixed pipeline goals composed on top of the manifest's targets
//!
//! The driver adds the standard goals (`depend`, `generate`, `build`, `test`,
//! `image`, `verify`, `chart`, `publish`, `deploy`) as phony targets whose
//! edges encode the pipeline order, attaches each `stage="..."` target to its
//! goal and gives verify targets their regenerate-and-diff action.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ConfigurationError;
use crate::executor::{ExecutionReport, Executor, ExecutorOptions};
use crate::graph::{Dependency, Manifest, TaskGraph, Target};
use crate::staleness::Staleness;
use crate::tools::{ToolProvisioner, ToolSet};

pub mod verify;

pub use verify::{VerifyAction, VerifyOptions};

/// Standard goals and the goals each one requires, in pipeline order
pub const GOALS: &[(&str, &[&str])] = &[
    ("depend", &[]),
    ("generate", &[]),
    ("build", &["depend", "generate"]),
    ("test", &["build"]),
    ("image", &["build"]),
    ("verify", &["build", "test"]),
    ("chart", &["generate"]),
    ("publish", &["image", "chart"]),
    ("deploy", &["publish"]),
];

pub fn is_standard_goal(name: &str) -> bool {
    GOALS.iter().any(|(goal, _)| *goal == name)
}

/// Add the standard goals and wire stage and verify targets into them
///
/// Goals the manifest already declares keep their own edges; stage and
/// verify targets are still attached to them. An attached target also
/// depends on every goal its goal requires, so `stage="build"` targets never
/// start before the `generate` targets have finished.
pub fn compose_goals(graph: &mut TaskGraph) -> Result<(), ConfigurationError> {
    for (goal, requires) in GOALS {
        if graph.contains(goal) {
            continue;
        }

        let mut target = Target::phony(*goal);
        for dep in *requires {
            target = target.depends_on(*dep);
        }
        graph.add_target(target)?;
    }

    let mut attachments: Vec<(String, String)> = Vec::new();
    for target in graph.targets() {
        if let Some(stage) = &target.stage {
            if stage != &target.name {
                attachments.push((stage.clone(), target.name.clone()));
            }
        }
        if target.verify.is_some() {
            attachments.push(("verify".to_string(), target.name.clone()));
        }
    }

    // Goals each attached goal requires, taken before members are added
    let mut prerequisites: HashMap<String, Vec<String>> = HashMap::new();
    for (goal, member) in &attachments {
        if prerequisites.contains_key(goal) {
            continue;
        }
        let goal_target = graph
            .get(goal)
            .ok_or_else(|| ConfigurationError::UnknownTarget {
                name: goal.clone(),
                referenced_by: Some(member.clone()),
            })?;
        let required = goal_target
            .target_dependencies()
            .filter(|dep| is_standard_goal(dep))
            .map(str::to_string)
            .collect();
        prerequisites.insert(goal.clone(), required);
    }

    for (goal, member) in attachments {
        // A member of `build` runs after `depend` and `generate`, like the goal
        if let Some(target) = graph.get_mut(&member) {
            for required in &prerequisites[&goal] {
                let edge = Dependency::Target(required.clone());
                if *required != member && !target.dependencies.contains(&edge) {
                    target.dependencies.push(edge);
                }
            }
        }

        if let Some(goal_target) = graph.get_mut(&goal) {
            let edge = Dependency::Target(member);
            if !goal_target.dependencies.contains(&edge) {
                goal_target.dependencies.push(edge);
            }
        }
    }

    Ok(())
}

/// Runs pipeline goals for a loaded manifest
pub struct PipelineDriver {
    graph: TaskGraph,
    tools: Arc<ToolSet>,
    provisioner: Arc<ToolProvisioner>,
    options: ExecutorOptions,
}

impl PipelineDriver {
    /// Compose the pipeline
    ///
    /// `exclude` lists absolute paths (such as the tool cache) that verify
    /// targets leave out of their scratch copy of the workspace.
    pub fn new(
        manifest: Manifest,
        provisioner: Arc<ToolProvisioner>,
        options: ExecutorOptions,
        exclude: Vec<PathBuf>,
    ) -> Result<Self, ConfigurationError> {
        let Manifest {
            mut graph, tools, ..
        } = manifest;
        compose_goals(&mut graph)?;

        let tools = Arc::new(tools);
        let base = Arc::new(graph.clone());

        let verify_targets: Vec<(String, String)> = graph
            .targets()
            .filter_map(|t| t.verify.clone().map(|checks| (t.name.clone(), checks)))
            .collect();

        for (name, checks) in verify_targets {
            let action = VerifyAction::new(
                checks,
                Arc::clone(&base),
                Arc::clone(&tools),
                Arc::clone(&provisioner),
                VerifyOptions {
                    root: options.root.clone(),
                    exclude: exclude.clone(),
                    ci: options.ci,
                    default_timeout: options.default_timeout,
                },
            );
            if let Some(target) = graph.get_mut(&name) {
                target.action = Some(Arc::new(action));
            }
        }

        Ok(Self {
            graph,
            tools,
            provisioner,
            options,
        })
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    fn executor(&self) -> Executor<'_> {
        Executor::new(
            &self.graph,
            &self.tools,
            &self.provisioner,
            self.options.clone(),
        )
    }

    /// Execute `goal`
    pub fn run(&self, goal: &str) -> Result<ExecutionReport, ConfigurationError> {
        self.executor().run(goal)
    }

    /// What `run` would do, without running anything
    pub fn plan(&self, goal: &str) -> Result<Vec<(&Target, Staleness)>, ConfigurationError> {
        self.executor().plan(goal)
    }
}
