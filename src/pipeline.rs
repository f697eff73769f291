//! Dependency-ordered, idempotent action execution.
//!
//! Actions are declared statically; the registry validates the dependency
//! graph once at construction, independent of which subset a run requests.
//! Completion is tracked through durable on-disk markers so a process
//! restart reconstructs state purely from disk.
use crate::config::{ConfigKey, ConfigSnapshot};
use crate::error::Error;
use crate::paths::WorkdirPaths;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// One named pipeline stage.
#[derive(Debug)]
pub struct Action {
    pub name: &'static str,
    pub deps: &'static [&'static str],
    pub required_keys: &'static [ConfigKey],
    pub run: fn(&ActionContext) -> Result<()>,
}

/// Everything an action needs: the immutable config snapshot and the
/// workdir layout derived from it.
pub struct ActionContext {
    pub config: ConfigSnapshot,
    pub paths: WorkdirPaths,
}

impl ActionContext {
    pub fn new(config: ConfigSnapshot) -> Self {
        let paths = config.paths();
        Self { config, paths }
    }
}

/// Terminal status of one action within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Marker present and not forced; output untouched.
    Skipped,
    Ran,
    Failed,
    /// A dependency failed, or the run halted before this action.
    Blocked,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Skipped => "skipped",
            Outcome::Ran => "ran",
            Outcome::Failed => "failed",
            Outcome::Blocked => "blocked",
        }
    }
}

#[derive(Debug)]
pub struct ActionReport {
    pub name: &'static str,
    pub outcome: Outcome,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub actions: Vec<ActionReport>,
}

impl RunReport {
    pub fn failure(&self) -> Option<&ActionReport> {
        self.actions
            .iter()
            .find(|report| report.outcome == Outcome::Failed)
    }
}

/// The static action registry. Construction validates names and detects
/// dependency cycles before anything executes.
#[derive(Debug)]
pub struct Registry {
    actions: Vec<Action>,
}

impl Registry {
    pub fn new(actions: Vec<Action>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for action in &actions {
            if !seen.insert(action.name) {
                return Err(anyhow!("duplicate action name: {}", action.name));
            }
        }
        for action in &actions {
            for dep in action.deps {
                if !seen.contains(dep) {
                    return Err(anyhow!(
                        "action {} depends on unknown action {dep}",
                        action.name
                    ));
                }
            }
        }
        let registry = Self { actions };
        registry.check_acyclic()?;
        Ok(registry)
    }

    pub fn action_names(&self) -> Vec<&'static str> {
        self.actions.iter().map(|action| action.name).collect()
    }

    fn get(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|action| action.name == name)
    }

    fn check_acyclic(&self) -> Result<()> {
        // Three-color DFS; the gray stack reconstructs the cycle path.
        let mut state: BTreeMap<&str, u8> = BTreeMap::new();
        let mut stack: Vec<&'static str> = Vec::new();
        for action in &self.actions {
            if state.get(action.name).copied().unwrap_or(0) == 0 {
                self.dfs(action.name, &mut state, &mut stack)?;
            }
        }
        Ok(())
    }

    fn dfs(
        &self,
        name: &'static str,
        state: &mut BTreeMap<&'static str, u8>,
        stack: &mut Vec<&'static str>,
    ) -> Result<()> {
        state.insert(name, 1);
        stack.push(name);
        let action = self
            .get(name)
            .ok_or_else(|| anyhow!("unknown action {name}"))?;
        for &dep in action.deps {
            match state.get(dep).copied().unwrap_or(0) {
                0 => self.dfs(dep, state, stack)?,
                1 => {
                    let start = stack.iter().position(|entry| *entry == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep.to_string());
                    return Err(Error::CyclicDependency { cycle }.into());
                }
                _ => {}
            }
        }
        stack.pop();
        state.insert(name, 2);
        Ok(())
    }

    /// Transitive dependency closure of the requested subset, in
    /// topological order with declaration-order tie-break.
    pub fn plan(&self, requested: &[String]) -> Result<Vec<&Action>> {
        let mut wanted: BTreeSet<&str> = BTreeSet::new();
        let mut frontier: Vec<&str> = Vec::new();
        for name in requested {
            let action = self.get(name).ok_or_else(|| {
                anyhow!(
                    "unknown action: {name} (options: {})",
                    self.action_names().join(", ")
                )
            })?;
            if wanted.insert(action.name) {
                frontier.push(action.name);
            }
        }
        while let Some(name) = frontier.pop() {
            let action = self
                .get(name)
                .ok_or_else(|| anyhow!("unknown action {name}"))?;
            for &dep in action.deps {
                if wanted.insert(dep) {
                    frontier.push(dep);
                }
            }
        }

        // Kahn's algorithm, always taking the earliest declared ready node.
        let mut done: BTreeSet<&str> = BTreeSet::new();
        let mut plan = Vec::new();
        while done.len() < wanted.len() {
            let next = self.actions.iter().find(|action| {
                wanted.contains(action.name)
                    && !done.contains(action.name)
                    && action
                        .deps
                        .iter()
                        .all(|dep| !wanted.contains(dep) || done.contains(dep))
            });
            // The registry is acyclic, so a ready node always exists.
            let action = next.ok_or_else(|| anyhow!("no ready action in plan"))?;
            done.insert(action.name);
            plan.push(action);
        }
        Ok(plan)
    }
}

/// Durable completion markers, one file per action, written only after the
/// action's output is complete.
pub struct MarkerStore {
    root: PathBuf,
}

#[derive(Serialize)]
struct Marker {
    action: String,
    completed_at_epoch_ms: u128,
}

impl MarkerStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn marker_path(&self, action: &str) -> PathBuf {
        self.root.join(format!("{action}.json"))
    }

    pub fn is_complete(&self, action: &str) -> bool {
        self.marker_path(action).is_file()
    }

    /// Write-after-complete: the marker becomes visible only once its
    /// contents are durably on disk (temp file + rename).
    pub fn record(&self, action: &str) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("create {}", self.root.display()))?;
        let marker = Marker {
            action: action.to_string(),
            completed_at_epoch_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .context("compute timestamp")?
                .as_millis(),
        };
        let text = serde_json::to_string_pretty(&marker).context("serialize marker")?;
        let tmp = self.root.join(format!(".{action}.json.tmp"));
        fs::write(&tmp, text).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, self.marker_path(action))
            .with_context(|| format!("publish marker for {action}"))?;
        Ok(())
    }

    pub fn clear(&self, action: &str) -> Result<()> {
        let path = self.marker_path(action);
        if path.is_file() {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
        Ok(())
    }
}

/// Run the requested actions (plus their dependency closure) in order.
///
/// Configuration is verified for the whole plan before any action runs, so
/// a missing key never leaves partial output behind. `force` applies to
/// the explicitly requested actions only; dependencies pulled in through
/// the closure keep their markers.
pub fn execute(
    registry: &Registry,
    ctx: &ActionContext,
    requested: &[String],
) -> Result<RunReport> {
    let plan = registry.plan(requested)?;
    let forced: BTreeSet<&str> = if ctx.config.force {
        requested.iter().map(String::as_str).collect()
    } else {
        BTreeSet::new()
    };

    for action in &plan {
        let missing = ctx.config.missing(action.required_keys);
        if !missing.is_empty() {
            return Err(Error::MissingConfiguration {
                action: action.name.to_string(),
                keys: missing,
            }
            .into());
        }
    }

    let markers = MarkerStore::new(ctx.paths.markers_dir());
    let mut report = RunReport::default();
    let mut halted = false;

    for action in plan {
        if halted {
            report.actions.push(ActionReport {
                name: action.name,
                outcome: Outcome::Blocked,
                error: None,
            });
            continue;
        }

        if markers.is_complete(action.name) && !forced.contains(action.name) {
            tracing::debug!(action = action.name, "marker present, skipping");
            report.actions.push(ActionReport {
                name: action.name,
                outcome: Outcome::Skipped,
                error: None,
            });
            continue;
        }

        // A forced rerun invalidates the old marker before output changes.
        markers.clear(action.name)?;
        tracing::info!(action = action.name, "running");
        match (action.run)(ctx) {
            Ok(()) => {
                markers.record(action.name)?;
                report.actions.push(ActionReport {
                    name: action.name,
                    outcome: Outcome::Ran,
                    error: None,
                });
            }
            Err(err) => {
                tracing::warn!(action = action.name, error = %err, "action failed");
                report.actions.push(ActionReport {
                    name: action.name,
                    outcome: Outcome::Failed,
                    error: Some(format!("{err:#}")),
                });
                halted = true;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OverrideArgs;
    use crate::config::FileConfig;
    use std::fs;

    fn test_context(workdir: &std::path::Path, force: bool) -> ActionContext {
        let overrides = OverrideArgs {
            workdir: Some(workdir.to_path_buf()),
            force,
            ..OverrideArgs::default()
        };
        let config = ConfigSnapshot::resolve(FileConfig::default(), &overrides).unwrap();
        ActionContext::new(config)
    }

    fn append(ctx: &ActionContext, name: &str) -> Result<()> {
        let path = ctx.paths.root().join("order.log");
        let mut log = fs::read_to_string(&path).unwrap_or_default();
        log.push_str(name);
        log.push('\n');
        fs::create_dir_all(ctx.paths.root())?;
        fs::write(&path, log)?;
        Ok(())
    }

    fn run_fetch(ctx: &ActionContext) -> Result<()> {
        append(ctx, "fetch")
    }

    fn run_build(ctx: &ActionContext) -> Result<()> {
        append(ctx, "build")
    }

    fn run_publish(ctx: &ActionContext) -> Result<()> {
        append(ctx, "publish")
    }

    fn run_boom(_ctx: &ActionContext) -> Result<()> {
        Err(anyhow!("boom"))
    }

    fn action(
        name: &'static str,
        deps: &'static [&'static str],
        run: fn(&ActionContext) -> Result<()>,
    ) -> Action {
        Action {
            name,
            deps,
            required_keys: &[],
            run,
        }
    }

    fn linear_registry() -> Registry {
        Registry::new(vec![
            action("fetch", &[], run_fetch),
            action("build", &["fetch"], run_build),
            action("publish", &["build"], run_publish),
        ])
        .unwrap()
    }

    fn order_log(ctx: &ActionContext) -> Vec<String> {
        fs::read_to_string(ctx.paths.root().join("order.log"))
            .unwrap_or_default()
            .lines()
            .map(|line| line.to_string())
            .collect()
    }

    fn names(report: &RunReport, outcome: Outcome) -> Vec<&'static str> {
        report
            .actions
            .iter()
            .filter(|entry| entry.outcome == outcome)
            .map(|entry| entry.name)
            .collect()
    }

    #[test]
    fn cycle_is_rejected_at_registry_construction() {
        let err = Registry::new(vec![
            action("a", &["b"], run_fetch),
            action("b", &["a"], run_build),
        ])
        .unwrap_err();
        let cycle = err.downcast_ref::<Error>();
        assert!(
            matches!(cycle, Some(Error::CyclicDependency { .. })),
            "expected cyclic dependency, got: {err}"
        );
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = Registry::new(vec![action("a", &["ghost"], run_fetch)]).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn plan_pulls_in_the_dependency_closure_in_order() {
        let registry = linear_registry();
        let plan = registry.plan(&["publish".to_string()]).unwrap();
        let names: Vec<&str> = plan.iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["fetch", "build", "publish"]);
    }

    #[test]
    fn plan_ties_break_by_declaration_order() {
        let registry = Registry::new(vec![
            action("left", &[], run_fetch),
            action("right", &[], run_build),
            action("join", &["left", "right"], run_publish),
        ])
        .unwrap();
        let plan = registry.plan(&["join".to_string()]).unwrap();
        let names: Vec<&str> = plan.iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["left", "right", "join"]);
    }

    #[test]
    fn unknown_requested_action_errors_with_options() {
        let registry = linear_registry();
        let err = registry.plan(&["nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("fetch, build, publish"));
    }

    #[test]
    fn second_run_performs_zero_additional_writes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), false);
        let requested = vec!["publish".to_string()];
        let registry = linear_registry();

        let first = execute(&registry, &ctx, &requested).unwrap();
        assert_eq!(names(&first, Outcome::Ran), vec!["fetch", "build", "publish"]);
        assert_eq!(order_log(&ctx), vec!["fetch", "build", "publish"]);

        let second = execute(&registry, &ctx, &requested).unwrap();
        assert_eq!(
            names(&second, Outcome::Skipped),
            vec!["fetch", "build", "publish"]
        );
        // No additional writes: the log is unchanged.
        assert_eq!(order_log(&ctx), vec!["fetch", "build", "publish"]);
    }

    #[test]
    fn force_reruns_requested_action_but_not_its_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let registry = linear_registry();

        let ctx = test_context(dir.path(), false);
        execute(&registry, &ctx, &["build".to_string()]).unwrap();
        assert_eq!(order_log(&ctx), vec!["fetch", "build"]);

        let forced = test_context(dir.path(), true);
        let report = execute(&registry, &forced, &["build".to_string()]).unwrap();
        assert_eq!(names(&report, Outcome::Ran), vec!["build"]);
        assert_eq!(names(&report, Outcome::Skipped), vec!["fetch"]);
        assert_eq!(order_log(&forced), vec!["fetch", "build", "build"]);
    }

    #[test]
    fn unrequested_actions_are_untouched_by_force() {
        let dir = tempfile::tempdir().unwrap();
        let registry = linear_registry();
        let ctx = test_context(dir.path(), true);
        let report = execute(&registry, &ctx, &["fetch".to_string()]).unwrap();
        assert_eq!(report.actions.len(), 1);
        assert_eq!(order_log(&ctx), vec!["fetch"]);
    }

    #[test]
    fn missing_configuration_fails_before_any_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), false);
        let registry = Registry::new(vec![
            action("fetch", &[], run_fetch),
            Action {
                name: "upload",
                deps: &["fetch"],
                required_keys: &[ConfigKey::ApiKey, ConfigKey::ServiceUrl],
                run: run_build,
            },
        ])
        .unwrap();

        let err = execute(&registry, &ctx, &["upload".to_string()]).unwrap_err();
        let missing = err.downcast_ref::<Error>();
        match missing {
            Some(Error::MissingConfiguration { action, keys }) => {
                assert_eq!(action, "upload");
                assert_eq!(keys, &["api_key", "service_url"]);
            }
            _ => panic!("expected missing configuration, got: {err}"),
        }
        // Nothing executed, not even the satisfiable dependency.
        assert!(order_log(&ctx).is_empty());
    }

    #[test]
    fn failure_blocks_dependents_and_leaves_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), false);
        let registry = Registry::new(vec![
            action("fetch", &[], run_fetch),
            action("explode", &["fetch"], run_boom),
            action("publish", &["explode"], run_publish),
        ])
        .unwrap();

        let report = execute(&registry, &ctx, &["publish".to_string()]).unwrap();
        assert_eq!(names(&report, Outcome::Ran), vec!["fetch"]);
        assert_eq!(names(&report, Outcome::Failed), vec!["explode"]);
        assert_eq!(names(&report, Outcome::Blocked), vec!["publish"]);

        // The failed action's marker stays absent so a rerun retries it.
        let markers = MarkerStore::new(ctx.paths.markers_dir());
        assert!(markers.is_complete("fetch"));
        assert!(!markers.is_complete("explode"));

        let rerun = execute(&registry, &ctx, &["publish".to_string()]).unwrap();
        assert_eq!(names(&rerun, Outcome::Skipped), vec!["fetch"]);
        assert_eq!(names(&rerun, Outcome::Failed), vec!["explode"]);
    }
}
