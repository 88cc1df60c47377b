//! End-to-end build jobs against a real directory tree.

use prodline_core::composer::{BuildContext, Composer, ConfigFileComposer, ShellComposer};
use prodline_core::configuration::Configuration;
use prodline_core::job::{BuildJob, JobParams};
use prodline_core::model::{FeatureDef, FeatureModel, Formula, ModelFormula};
use prodline_core::paths;
use prodline_core::progress::CancelToken;
use prodline_core::types::{BuildKind, BuildOrder, BuildOutcome};
use prodline_core::workspace::{FsWorkspace, Workspace};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn model(names: &[&str], constraints: &[&str]) -> FeatureModel {
    FeatureModel {
        name: "pipeline".to_string(),
        features: names
            .iter()
            .map(|n| FeatureDef {
                name: n.to_string(),
                default: false,
                description: None,
            })
            .collect(),
        constraints: constraints.iter().map(|c| c.to_string()).collect(),
    }
}

fn formula(names: &[&str], constraints: &[&str]) -> Arc<ModelFormula> {
    Arc::new(model(names, constraints).formula().unwrap())
}

fn workspace(tmp: &TempDir) -> Arc<dyn Workspace> {
    let dir = tmp.path().join("shop");
    std::fs::create_dir_all(&dir).unwrap();
    Arc::new(FsWorkspace::new(&dir, vec![]).unwrap())
}

fn params() -> JobParams {
    JobParams {
        poll_interval: Duration::from_millis(5),
        ..JobParams::default()
    }
}

/// Single-threaded composer that keeps what it was asked to build and
/// whether the formula accepted it.
struct Recording {
    formula: Arc<ModelFormula>,
    built: Mutex<Vec<(usize, Configuration, bool)>>,
    /// Cancelled after the first build when set.
    cancel_after_first: Mutex<Option<CancelToken>>,
}

impl Recording {
    fn new(formula: Arc<ModelFormula>) -> Arc<Self> {
        Arc::new(Self {
            formula,
            built: Mutex::new(Vec::new()),
            cancel_after_first: Mutex::new(None),
        })
    }

    fn built(&self) -> Vec<(usize, Configuration, bool)> {
        self.built.lock().unwrap().clone()
    }
}

impl Composer for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    fn build(&self, config: &Configuration, ctx: &BuildContext) -> BuildOutcome {
        let valid = self.formula.is_valid(config);
        self.built.lock().unwrap().push((ctx.index, config.clone(), valid));
        if let Some(token) = self.cancel_after_first.lock().unwrap().take() {
            token.cancel();
        }
        BuildOutcome::Success
    }

    fn supports_parallel_build(&self) -> bool {
        false
    }
}

/// Parallel-safe composer that takes a moment per build.
struct Slow;

impl Composer for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn build(&self, _config: &Configuration, _ctx: &BuildContext) -> BuildOutcome {
        std::thread::sleep(Duration::from_millis(3));
        BuildOutcome::Success
    }
}

/// `(built, target)` from a progress line; target is `None` while counting.
fn progress_counts(line: &str) -> (usize, Option<usize>) {
    let counts = line
        .strip_prefix("Built configurations: ")
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap();
    let (built, target) = counts.split_once('/').unwrap();
    (built.parse().unwrap(), target.parse().ok())
}

#[test]
fn all_valid_over_implication_builds_six() {
    let tmp = TempDir::new().unwrap();
    let f = formula(&["A", "B", "C"], &["A => B"]);
    let composer = Recording::new(Arc::clone(&f));
    let job = BuildJob::new(
        JobParams { max: 10, ..params() },
        f,
        composer.clone(),
        workspace(&tmp),
    )
    .unwrap();
    let summary = job.run(|_| {}).unwrap();

    assert_eq!(summary.built, 6);
    assert_eq!(summary.target, Some(6));
    assert!(!summary.cancelled);

    let built = composer.built();
    assert_eq!(built.len(), 6);
    assert!(built.iter().all(|(_, _, valid)| *valid));
    // one worker and FIFO order: indices arrive in sequence
    let indices: Vec<usize> = built.iter().map(|(i, _, _)| *i).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn integration_builds_both_polarities() {
    let tmp = TempDir::new().unwrap();
    let f = formula(&["A", "B", "C"], &["A => B"]);
    let composer = Recording::new(Arc::clone(&f));
    let job = BuildJob::new(
        JobParams {
            kind: BuildKind::Integration,
            feature: Some("C".to_string()),
            ..params()
        },
        f,
        composer.clone(),
        workspace(&tmp),
    )
    .unwrap();
    assert_eq!(job.initial_target(), Some(2));
    let summary = job.run(|_| {}).unwrap();

    assert_eq!(summary.built, 2);
    let built = composer.built();
    assert_eq!(built[0].1.value(3), Some(true));
    assert_eq!(built[1].1.value(3), Some(false));
}

#[test]
fn cancellation_after_first_build_stops_the_pool() {
    let tmp = TempDir::new().unwrap();
    let f = formula(&["A", "B", "C", "D"], &[]);
    let composer = Recording::new(Arc::clone(&f));
    let job = BuildJob::new(
        JobParams { max: 10, ..params() },
        f,
        composer.clone(),
        workspace(&tmp),
    )
    .unwrap();
    *composer.cancel_after_first.lock().unwrap() = Some(job.cancel_token());
    let summary = job.run(|_| {}).unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.built, 1);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(composer.built().len(), 1);
}

#[test]
fn zero_max_builds_nothing() {
    let tmp = TempDir::new().unwrap();
    let f = formula(&["A"], &[]);
    let composer = Recording::new(Arc::clone(&f));
    for max in [0, -5] {
        let job = BuildJob::new(
            JobParams { max, ..params() },
            f.clone(),
            composer.clone(),
            workspace(&tmp),
        )
        .unwrap();
        let summary = job.run(|_| {}).unwrap();
        assert_eq!(summary.built, 0);
        assert_eq!(summary.target, Some(0));
    }
    assert!(composer.built().is_empty());
}

#[test]
fn twise_with_interaction_order_covers_pairs() {
    let tmp = TempDir::new().unwrap();
    let f = formula(&["A", "B", "C", "D"], &["A => B", "!(C & D)"]);
    let composer = Recording::new(Arc::clone(&f));
    let job = BuildJob::new(
        JobParams {
            kind: BuildKind::TWise,
            order: BuildOrder::Interaction,
            t: 2,
            ..params()
        },
        Arc::clone(&f) as Arc<dyn Formula>,
        composer.clone(),
        workspace(&tmp),
    )
    .unwrap();
    let summary = job.run(|_| {}).unwrap();

    let built = composer.built();
    assert_eq!(summary.built, built.len());
    assert_eq!(summary.target, Some(built.len()));
    assert!(built.iter().all(|(_, _, valid)| *valid));
    for tuple in prodline_core::sampling::twise::valid_tuples(f.as_ref(), 2) {
        assert!(built.iter().any(|(_, c, _)| c.covers(&tuple)));
    }
}

#[test]
fn current_selection_builds_authored_files() {
    let tmp = TempDir::new().unwrap();
    let ws = workspace(&tmp);
    let configs = paths::configs_dir(ws.project_dir());
    std::fs::create_dir_all(&configs).unwrap();
    std::fs::write(configs.join("default.config"), "B\n").unwrap();
    std::fs::write(configs.join("full.config"), "A\nB\nC\n").unwrap();

    let job = BuildJob::new(
        JobParams {
            kind: BuildKind::AllCurrent,
            ..params()
        },
        formula(&["A", "B", "C"], &["A => B"]),
        Arc::new(ConfigFileComposer),
        Arc::clone(&ws),
    )
    .unwrap();
    let summary = job.run(|_| {}).unwrap();

    assert_eq!(summary.built, 2);
    let first = std::fs::read_to_string(ws.project_dir().join("products/00001/00001.config")).unwrap();
    assert_eq!(first, "B\n");
}

#[test]
fn shell_failures_raise_markers() {
    let tmp = TempDir::new().unwrap();
    let ws = workspace(&tmp);
    let composer = ShellComposer::new(
        "case \"$PRODLINE_FEATURES\" in *A*) echo refusing A >&2; exit 1;; esac",
    );
    let job = BuildJob::new(
        params(),
        formula(&["A", "B"], &[]),
        Arc::new(composer),
        Arc::clone(&ws),
    )
    .unwrap();
    let mut records = Vec::new();
    let summary = {
        let mut job = job;
        let rx = job.subscribe();
        let summary = job.run(|_| {}).unwrap();
        records.extend(rx.try_iter());
        summary
    };

    assert_eq!(summary.built, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(records.len(), 4);
    let markers = std::fs::read_to_string(paths::markers_path(ws.project_dir())).unwrap();
    assert_eq!(markers.lines().count(), 2);
    assert!(markers.contains("refusing A"));
}

#[test]
fn progress_never_goes_backwards_or_past_target() {
    let tmp = TempDir::new().unwrap();
    let job = BuildJob::new(
        JobParams {
            max: 12,
            poll_interval: Duration::from_millis(1),
            ..params()
        },
        formula(&["A", "B", "C", "D"], &[]),
        Arc::new(Slow),
        workspace(&tmp),
    )
    .unwrap();
    let mut lines = Vec::new();
    let summary = job.run(|line| lines.push(line.to_string())).unwrap();

    assert_eq!(summary.built, 12);
    assert!(!lines.is_empty());
    let mut last = 0;
    for line in &lines {
        let (built, target) = progress_counts(line);
        assert!(built >= last, "built went from {last} to {built}: {line}");
        if let Some(target) = target {
            assert!(built <= target, "built above target: {line}");
        }
        last = built;
    }
    assert_eq!(progress_counts(lines.last().unwrap()), (12, Some(12)));
}
