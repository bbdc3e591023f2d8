//! `werk.kdl` project manifest
//!
//! The manifest declares variables, pinned tools and targets:
//!
//! ```kdl
//! vars { registry "quay.io/jetstack" }
//!
//! tool "helm" version="v3.14.0" {
//!     download "https://get.helm.sh/helm-{version}-{os}-{arch}.tar.gz" entry="{os}-{arch}/helm"
//! }
//!
//! target "chart" stage="chart" {
//!     depends "crd-templates"
//!     output "_bin/chart.tgz"
//!     tool "helm"
//!     run "helm" "package" "deploy/charts/app" "-d" "_bin"
//! }
//! ```
//!
//! `${NAME}` in any string is expanded before the value is used. A `depends`
//! entry naming a declared target or a pipeline goal is a target edge;
//! anything else is a file.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use kdl::{KdlDocument, KdlNode};

use super::{Dependency, TaskGraph, Target, TargetKind};
use crate::action::{Action, CommandAction, WrapTemplateAction};
use crate::config_expansion::expand_vars;
use crate::error::ConfigurationError;
use crate::pipeline::GOALS;
use crate::tools::{PlatformKey, ToolSet, ToolSource, ToolSpec};

/// Parsed project manifest
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Effective variable values after overrides
    pub vars: BTreeMap<String, String>,
    pub tools: ToolSet,
    pub graph: TaskGraph,
}

/// Read and parse a manifest file
///
/// `overrides` take priority over the manifest's own `vars` block; anything
/// still unresolved falls back to the process environment.
pub fn load_manifest(path: &Path, overrides: &BTreeMap<String, String>) -> Result<Manifest> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;

    parse_manifest(&source, overrides)
        .with_context(|| format!("Invalid manifest: {}", path.display()))
}

/// Parse manifest source text
pub fn parse_manifest(source: &str, overrides: &BTreeMap<String, String>) -> Result<Manifest> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e| anyhow!("Invalid KDL syntax: {}", e))?;

    let mut vars = BTreeMap::new();
    for node in doc.nodes().iter().filter(|n| n.name().value() == "vars") {
        for var in children(node) {
            let name = var.name().value().to_string();
            let raw = positional_string(var, 0)
                .ok_or_else(|| anyhow!("Variable '{}' needs a string value", name))?;
            let value = expand_vars(&raw, |key| {
                overrides.get(key).cloned().or_else(|| std::env::var(key).ok())
            })?;
            vars.insert(name, value);
        }
    }
    for (name, value) in overrides {
        vars.insert(name.clone(), value.clone());
    }

    let parser = Parser {
        vars: &vars,
        target_names: doc
            .nodes()
            .iter()
            .filter(|n| n.name().value() == "target")
            .filter_map(|n| positional_string(n, 0))
            .chain(GOALS.iter().map(|(goal, _)| goal.to_string()))
            .collect(),
    };

    let mut tools = ToolSet::new();
    let mut graph = TaskGraph::new();

    for node in doc.nodes() {
        match node.name().value() {
            "vars" => {}
            "tool" => {
                let spec = parser.tool(node)?;
                let name = spec.name.clone();
                if tools.insert(spec).is_some() {
                    bail!("Tool '{}' is declared more than once", name);
                }
            }
            "target" => {
                let target = parser.target(node)?;
                graph.add_target(target)?;
            }
            other => bail!("Unknown manifest node '{}'", other),
        }
    }

    for target in graph.targets() {
        for tool in &target.tools {
            if tools.get(tool).is_none() {
                return Err(ConfigurationError::UnknownTool {
                    target: target.name.clone(),
                    tool: tool.clone(),
                }
                .into());
            }
        }

        if let Some(checks) = &target.verify {
            if !graph.contains(checks) {
                return Err(ConfigurationError::UnknownVerifyTarget {
                    target: target.name.clone(),
                    checks: checks.clone(),
                }
                .into());
            }
        }
    }

    Ok(Manifest { vars, tools, graph })
}

struct Parser<'a> {
    vars: &'a BTreeMap<String, String>,
    /// Every declared target, so `depends` can tell targets from files
    target_names: HashSet<String>,
}

impl Parser<'_> {
    fn expand(&self, value: &str) -> Result<String> {
        expand_vars(value, |key| {
            self.vars
                .get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
        })
    }

    fn positionals(&self, node: &KdlNode) -> Result<Vec<String>> {
        let mut values = Vec::new();
        for entry in node.entries().iter().filter(|e| e.name().is_none()) {
            let value = entry
                .value()
                .as_string()
                .ok_or_else(|| anyhow!("'{}' arguments must be strings", node.name().value()))?;
            values.push(self.expand(value)?);
        }
        Ok(values)
    }

    fn property(&self, node: &KdlNode, key: &str) -> Result<Option<String>> {
        match node.get(key) {
            None => Ok(None),
            Some(value) => {
                let value = value
                    .as_string()
                    .ok_or_else(|| anyhow!("Property '{}' must be a string", key))?;
                Ok(Some(self.expand(value)?))
            }
        }
    }

    fn flag(&self, node: &KdlNode, key: &str) -> Result<bool> {
        match node.get(key) {
            None => Ok(false),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| anyhow!("Property '{}' must be #true or #false", key)),
        }
    }

    fn required_property(&self, node: &KdlNode, key: &str) -> Result<String> {
        self.property(node, key)?
            .ok_or_else(|| anyhow!("'{}' requires {}=", node.name().value(), key))
    }

    fn tool(&self, node: &KdlNode) -> Result<ToolSpec> {
        let name = positional_string(node, 0).ok_or_else(|| anyhow!("tool requires a name"))?;
        let version = self
            .required_property(node, "version")
            .with_context(|| format!("Invalid tool '{}'", name))?;

        let mut source = None;
        let mut platforms = Vec::new();

        for child in children(node) {
            let directive = child.name().value();
            let parsed = match directive {
                "download" => {
                    let url = self
                        .positionals(child)?
                        .into_iter()
                        .next()
                        .ok_or_else(|| anyhow!("download requires a URL"))?;
                    Some(ToolSource::Download {
                        url,
                        entry: self.property(child, "entry")?,
                        sha256: self.property(child, "sha256")?,
                    })
                }
                "build" => {
                    let command = self.positionals(child)?;
                    if command.is_empty() {
                        bail!("build requires a command");
                    }
                    Some(ToolSource::Build { command })
                }
                "platforms" => {
                    for platform in self.positionals(child)? {
                        platforms.push(platform.parse::<PlatformKey>().map_err(|e| anyhow!(e))?);
                    }
                    None
                }
                other => bail!("Unknown directive '{}' in tool '{}'", other, name),
            };

            if let Some(parsed) = parsed {
                if source.replace(parsed).is_some() {
                    bail!("Tool '{}' declares more than one source", name);
                }
            }
        }

        let source = source
            .ok_or_else(|| anyhow!("Tool '{}' needs a download or build source", name))?;

        let mut spec = ToolSpec::new(name, version, source);
        spec.platforms = platforms;
        Ok(spec)
    }

    fn target(&self, node: &KdlNode) -> Result<Target> {
        let name = positional_string(node, 0).ok_or_else(|| anyhow!("target requires a name"))?;
        self.target_body(node, name.clone())
            .with_context(|| format!("Invalid target '{}'", name))
    }

    fn target_body(&self, node: &KdlNode, name: String) -> Result<Target> {
        for entry in node.entries() {
            if let Some(key) = entry.name() {
                let key = key.value();
                if !matches!(key, "phony" | "stage" | "ci-only" | "verify") {
                    bail!("Unknown target property '{}'", key);
                }
            }
        }

        let verify = self.property(node, "verify")?;
        let mut target = if self.flag(node, "phony")? || verify.is_some() {
            Target::phony(name)
        } else {
            Target::file(name)
        };
        target.verify = verify;
        target.stage = self.property(node, "stage")?;
        target.ci_only = self.flag(node, "ci-only")?;

        for child in children(node) {
            let directive = child.name().value();
            match directive {
                "depends" => {
                    for dep in self.positionals(child)? {
                        let edge = if self.target_names.contains(&dep) {
                            Dependency::Target(dep)
                        } else {
                            Dependency::File(PathBuf::from(dep))
                        };
                        target.dependencies.push(edge);
                    }
                }
                "input" => {
                    for path in self.positionals(child)? {
                        target.dependencies.push(Dependency::File(PathBuf::from(path)));
                    }
                }
                "output" => {
                    target
                        .outputs
                        .extend(self.positionals(child)?.into_iter().map(PathBuf::from));
                }
                "tool" => target.tools.extend(self.positionals(child)?),
                "run" => {
                    let command = self.positionals(child)?;
                    let Some((program, args)) = command.split_first() else {
                        bail!("run requires a command");
                    };
                    set_action(&mut target, CommandAction::new(program.clone(), args.to_vec()))?;
                }
                "shell" => {
                    let script = self
                        .positionals(child)?
                        .into_iter()
                        .next()
                        .ok_or_else(|| anyhow!("shell requires a script"))?;
                    set_action(&mut target, CommandAction::shell(script))?;
                }
                "wrap-template" => {
                    let action = WrapTemplateAction::new(
                        self.required_property(child, "from")?,
                        self.required_property(child, "to")?,
                        self.required_property(child, "condition")?,
                    );
                    set_action(&mut target, action)?;
                }
                "timeout" => {
                    let value = self
                        .positionals(child)?
                        .into_iter()
                        .next()
                        .ok_or_else(|| anyhow!("timeout requires a duration"))?;
                    target.timeout = Some(parse_duration(&value)?);
                }
                "env" => {
                    let values = self.positionals(child)?;
                    let [key, value] = values.as_slice() else {
                        bail!("env requires a name and a value");
                    };
                    target.env.insert(key.clone(), value.clone());
                }
                "cwd" => {
                    let dir = self
                        .positionals(child)?
                        .into_iter()
                        .next()
                        .ok_or_else(|| anyhow!("cwd requires a directory"))?;
                    target.cwd = Some(PathBuf::from(dir));
                }
                other => bail!("Unknown directive '{}'", other),
            }
        }

        if target.verify.is_some() && target.action.is_some() {
            bail!("A verify target cannot declare its own action");
        }
        if target.kind == TargetKind::Phony && !target.outputs.is_empty() {
            bail!("Phony targets cannot declare outputs");
        }

        Ok(target)
    }
}

fn set_action(target: &mut Target, action: impl Action + 'static) -> Result<()> {
    if target.action.is_some() {
        bail!("Only one of run, shell or wrap-template may be given");
    }
    target.action = Some(Arc::new(action));
    Ok(())
}

fn children(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|doc| doc.nodes()).unwrap_or_default()
}

fn positional_string(node: &KdlNode, index: usize) -> Option<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .nth(index)
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Parse a duration such as `90s`, `5m`, `2h` or `1d`
pub fn parse_duration(s: &str) -> Result<Duration> {
    let Some((split, _)) = s.char_indices().last() else {
        bail!("Empty duration string");
    };
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid duration: {}", s))?;

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => bail!("Invalid duration unit: {}. Use: s, m, h, d", unit),
    };
    let seconds = num
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("Duration is too large: {}", s))?;

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
vars {
    registry "quay.io/jetstack"
    helm_version "v3.14.0"
}

tool "helm" version="${helm_version}" {
    download "https://get.helm.sh/helm-{version}-{os}-{arch}.tar.gz" entry="{os}-{arch}/helm"
    platforms "linux/amd64" "darwin/arm64"
}

target "crds" stage="generate" {
    depends "depend-tools" "go.mod"
    input "pkg/apis/**/*.go"
    output "_crds/bundles.yaml"
    run "controller-gen" "crd" "output:dir=_crds"
    timeout "5m"
    env "GOFLAGS" "-mod=mod"
}

target "depend-tools" phony=#true {
    tool "helm"
    shell "helm version"
}

target "crd-templates" stage="generate" {
    depends "crds"
    output "deploy/templates/crd-bundles.yaml"
    wrap-template from="_crds" to="deploy/templates" condition=".Values.crds.enabled"
}

target "image" stage="image" {
    output "_bin/image.tar"
    run "docker" "build" "-t" "${registry}/app:${tag:-latest}" "."
    cwd "build"
}

target "verify-crds" verify="crd-templates"
target "kind-network" phony=#true ci-only=#true { run "docker" "network" "create" "kind"; }
"#;

    fn parse(source: &str) -> Result<Manifest> {
        parse_manifest(source, &BTreeMap::new())
    }

    #[test]
    fn test_parse_full_manifest() {
        let manifest = parse(MANIFEST).unwrap();

        assert_eq!(manifest.graph.len(), 6);
        assert_eq!(manifest.tools.len(), 1);
        assert_eq!(manifest.vars["registry"], "quay.io/jetstack");

        let helm = manifest.tools.get("helm").unwrap();
        assert_eq!(helm.version, "v3.14.0");
        assert_eq!(helm.platforms.len(), 2);
        assert!(matches!(
            &helm.source,
            ToolSource::Download { entry: Some(e), sha256: None, .. } if e == "{os}-{arch}/helm"
        ));
    }

    #[test]
    fn test_depends_distinguishes_targets_from_files() {
        let manifest = parse(MANIFEST).unwrap();
        let crds = manifest.graph.get("crds").unwrap();

        assert_eq!(
            crds.dependencies,
            vec![
                Dependency::Target("depend-tools".into()),
                Dependency::File("go.mod".into()),
                Dependency::File("pkg/apis/**/*.go".into()),
            ]
        );
        assert_eq!(crds.kind, TargetKind::File);
        assert_eq!(crds.stage.as_deref(), Some("generate"));
        assert_eq!(crds.timeout, Some(Duration::from_secs(300)));
        assert_eq!(crds.env["GOFLAGS"], "-mod=mod");
    }

    #[test]
    fn test_depends_on_pipeline_goal() {
        let manifest = parse(
            r#"
target "bin" stage="build" {
    depends "generate" "main.go"
    output "_bin/app"
    run "go" "build" "-o" "_bin/app" "."
}
"#,
        )
        .unwrap();

        assert_eq!(
            manifest.graph.get("bin").unwrap().dependencies,
            vec![
                Dependency::Target("generate".into()),
                Dependency::File("main.go".into()),
            ]
        );
    }

    #[test]
    fn test_target_attributes() {
        let manifest = parse(MANIFEST).unwrap();

        let verify = manifest.graph.get("verify-crds").unwrap();
        assert!(verify.is_phony());
        assert_eq!(verify.verify.as_deref(), Some("crd-templates"));
        assert!(verify.action.is_none());

        let network = manifest.graph.get("kind-network").unwrap();
        assert!(network.ci_only);
        assert!(network.is_phony());

        let image = manifest.graph.get("image").unwrap();
        assert_eq!(image.cwd, Some(PathBuf::from("build")));
        let describe = image.action.as_ref().unwrap().describe();
        assert!(describe.contains("quay.io/jetstack/app:latest"));
    }

    #[test]
    fn test_overrides_win() {
        let overrides: BTreeMap<String, String> = [
            ("registry".to_string(), "ghcr.io/me".to_string()),
            ("tag".to_string(), "v2".to_string()),
        ]
        .into_iter()
        .collect();
        let manifest = parse_manifest(MANIFEST, &overrides).unwrap();

        let describe = manifest.graph.get("image").unwrap().action.as_ref().unwrap().describe();
        assert!(describe.contains("ghcr.io/me/app:v2"));
        assert_eq!(manifest.vars["tag"], "v2");
    }

    #[test]
    fn test_unresolved_variable() {
        let err = parse(r#"target "x" phony=#true { run "echo" "${nope}"; }"#).unwrap_err();
        assert!(format!("{:#}", err).contains("'nope' is required"));
    }

    #[test]
    fn test_unknown_tool_reference() {
        let err = parse(r#"target "x" phony=#true { tool "ghost"; }"#).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigurationError>(),
            Some(&ConfigurationError::UnknownTool {
                target: "x".into(),
                tool: "ghost".into(),
            })
        );
    }

    #[test]
    fn test_unknown_verify_target() {
        let err = parse(r#"target "verify-x" verify="x""#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::UnknownVerifyTarget { .. })
        ));
    }

    #[test]
    fn test_duplicate_target() {
        let err = parse(
            r#"
target "x" phony=#true
target "x" phony=#true
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigurationError>(),
            Some(&ConfigurationError::DuplicateTarget("x".into()))
        );
    }

    #[test]
    fn test_unknown_directive() {
        let err = parse(r#"target "x" phony=#true { frobnicate "y"; }"#).unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown directive 'frobnicate'"));
    }

    #[test]
    fn test_multiple_actions_rejected() {
        let err = parse(r#"target "x" phony=#true { run "a"; shell "b"; }"#).unwrap_err();
        assert!(format!("{:#}", err).contains("Only one of"));
    }

    #[test]
    fn test_tool_requires_source() {
        assert!(parse(r#"tool "helm" version="v3""#).is_err());
        assert!(parse(r#"tool "helm" { download "https://x"; }"#).is_err());
    }

    #[test]
    fn test_build_tool() {
        let manifest = parse(
            r#"tool "controller-gen" version="v0.14.0" { build "go" "build" "-o" "{output}" "./cmd"; }"#,
        )
        .unwrap();
        let spec = manifest.tools.get("controller-gen").unwrap();
        assert!(matches!(&spec.source, ToolSource::Build { command } if command.len() == 5));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5µ").is_err());
        assert!(parse_duration("µ").is_err());
        assert!(parse_duration("999999999999999999d").is_err());
    }
}
