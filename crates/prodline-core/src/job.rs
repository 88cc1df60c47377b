//! Build jobs.
//!
//! A [`BuildJob`] wires a sampling strategy, the ordering buffer and a pool
//! of workers together and drives them from the caller's thread:
//!
//! ```text
//! Init ──▶ Running ──▶ Finished
//!              └─────▶ Cancelled
//! ```
//!
//! The producer thread pulls configurations from the strategy into the
//! buffer while workers build them. Once the producer stops, the buffer is
//! sorted and sealed, the target settles to the real total and the job waits
//! for the pool to drain.

use crate::buffer::{ConfigurationBuffer, OrderingPolicy};
use crate::composer::Composer;
use crate::error::{ProdlineError, Result};
use crate::model::Formula;
use crate::paths::{self, PRODUCTS_DIR, TEMP_BIN_DIR};
use crate::progress::{format_duration, CancelToken, ProgressCounters};
use crate::sampling::{self, SamplingSettings, SamplingStrategy};
use crate::types::{BuildKind, BuildOrder, JobStatus};
use crate::worker::{BuildRecord, OutputLayout, WorkerPool, WorkerShared};
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// `max` value for a job without an upper bound.
pub const UNBOUNDED: i64 = i64::MAX;

// ---------------------------------------------------------------------------
// SharedStatus
// ---------------------------------------------------------------------------

/// Producer status shared between the producer thread and the orchestrator.
/// Transitions only move forward and never leave a terminal state.
#[derive(Debug, Clone)]
pub struct SharedStatus(Arc<AtomicU8>);

impl Default for SharedStatus {
    fn default() -> Self {
        Self(Arc::new(AtomicU8::new(JobStatus::NotStarted.as_u8())))
    }
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> JobStatus {
        JobStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move to `next`. Returns false when the current state is terminal or
    /// not before `next`.
    pub fn advance(&self, next: JobStatus) -> bool {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            let state = JobStatus::from_u8(current);
            if state.is_terminal() || state.as_u8() >= next.as_u8() {
                return false;
            }
            match self.0.compare_exchange(
                current,
                next.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JobParams {
    pub kind: BuildKind,
    pub order: BuildOrder,
    /// Interaction strength for t-wise sampling.
    pub t: usize,
    /// Interaction strength for the interaction ordering.
    pub t_order: usize,
    pub algorithm: String,
    /// Build every variant as a sibling project instead of `products/`.
    pub create_new_projects: bool,
    pub run_tests: bool,
    /// Upper bound on configurations; zero or less makes the job a no-op.
    pub max: i64,
    /// Feature under test for integration builds.
    pub feature: Option<String>,
    pub seed: Option<u64>,
    /// Default value per variable, used by integration builds.
    pub defaults: Vec<bool>,
    pub poll_interval: Duration,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            kind: BuildKind::AllValid,
            order: BuildOrder::Default,
            t: 2,
            t_order: 2,
            algorithm: "chvatal".to_string(),
            create_new_projects: false,
            run_tests: false,
            max: UNBOUNDED,
            feature: None,
            seed: None,
            defaults: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub job_id: String,
    pub project: String,
    pub kind: BuildKind,
    pub built: usize,
    pub failed: usize,
    pub skipped: usize,
    /// `None` only while counting; every finished job reports a target.
    pub target: Option<usize>,
    pub elapsed_ms: u64,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// BuildJob
// ---------------------------------------------------------------------------

pub struct BuildJob {
    id: String,
    params: JobParams,
    formula: Arc<dyn Formula>,
    composer: Arc<dyn Composer>,
    workspace: Arc<dyn Workspace>,
    /// `None` for a job that has nothing to do.
    strategy: Option<Box<dyn SamplingStrategy>>,
    policy: OrderingPolicy,
    limit: usize,
    cancel: CancelToken,
    status: SharedStatus,
    subscribers: Vec<Sender<BuildRecord>>,
}

impl BuildJob {
    /// Resolve the strategy and ordering policy. Unknown algorithms,
    /// features and strengths fail here, before anything is touched.
    pub fn new(
        params: JobParams,
        formula: Arc<dyn Formula>,
        composer: Arc<dyn Composer>,
        workspace: Arc<dyn Workspace>,
    ) -> Result<Self> {
        let limit = if params.max == UNBOUNDED {
            usize::MAX
        } else {
            usize::try_from(params.max.max(0)).unwrap_or(usize::MAX)
        };
        let policy = OrderingPolicy::new(params.order, params.t_order);
        let strategy = if limit == 0 {
            None
        } else {
            if params.order == BuildOrder::Interaction
                && !(1..=sampling::twise::MAX_STRENGTH).contains(&params.t_order)
            {
                return Err(ProdlineError::InvalidStrength(params.t_order));
            }
            let settings = SamplingSettings {
                t: params.t,
                algorithm: params.algorithm.clone(),
                feature: params.feature.clone(),
                seed: params.seed,
                defaults: params.defaults.clone(),
                configs_dir: paths::configs_dir(workspace.project_dir()),
            };
            Some(sampling::strategy_for(
                params.kind,
                &settings,
                Arc::clone(&formula),
            )?)
        };
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            params,
            formula,
            composer,
            workspace,
            strategy,
            policy,
            limit,
            cancel: CancelToken::new(),
            status: SharedStatus::new(),
            subscribers: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn policy(&self) -> OrderingPolicy {
        self.policy
    }

    /// Token that cancels this job from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// Receive a [`BuildRecord`] for every configuration a worker finishes.
    pub fn subscribe(&mut self) -> Receiver<BuildRecord> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Target before any configuration has been produced.
    pub fn initial_target(&self) -> Option<usize> {
        match self.strategy.as_ref()?.expected_count() {
            Some(expected) => Some(expected.min(self.limit)),
            None if self.limit != usize::MAX => Some(self.limit),
            None => None,
        }
    }

    /// Run the job to completion on the calling thread. `on_progress`
    /// receives the progress line on every poll.
    pub fn run(mut self, mut on_progress: impl FnMut(&str)) -> Result<BuildSummary> {
        let started_at = Utc::now();
        let counters = Arc::new(ProgressCounters::new(self.initial_target()));

        let Some(strategy) = self.strategy.take() else {
            debug!(job = %self.id, "nothing to build");
            return Ok(self.noop_summary(started_at));
        };
        if !self.composer.prepare()? {
            info!(composer = self.composer.name(), "composer declined the build");
            return Ok(self.noop_summary(started_at));
        }

        info!(
            job = %self.id,
            kind = %self.params.kind,
            order = %self.policy,
            project = self.workspace.project_name(),
            "{}",
            self.params.kind.job_title()
        );
        let layout = self.prepare_output();
        let classpath = self.resolve_classpath();
        self.workspace.clear_markers();

        let buffer = Arc::new(ConfigurationBuffer::new(self.policy).with_limit(self.limit));
        let producer = self.spawn_producer(strategy, Arc::clone(&buffer))?;

        let shared = Arc::new(WorkerShared {
            buffer: Arc::clone(&buffer),
            composer: Arc::clone(&self.composer),
            workspace: Arc::clone(&self.workspace),
            counters: Arc::clone(&counters),
            cancel: self.cancel.clone(),
            layout: layout.clone(),
            variables: self.formula.variables().to_vec().into(),
            classpath: classpath.into(),
            run_tests: self.params.run_tests,
            poll_interval: self.params.poll_interval,
            subscribers: Mutex::new(std::mem::take(&mut self.subscribers)),
        });
        let size = WorkerPool::pool_size(self.composer.supports_parallel_build(), counters.target());
        let mut pool = WorkerPool::start(shared, size)?;

        // Producing.
        while matches!(self.status.get(), JobStatus::NotStarted | JobStatus::Running)
            && !producer.is_finished()
        {
            on_progress(&counters.task_description(buffer.size()));
            if self.cancel.is_cancelled() {
                self.status.advance(JobStatus::Cancelled);
                break;
            }
            thread::sleep(self.params.poll_interval);
        }
        // The producer settles the status itself unless it died.
        if producer.join().is_err() {
            warn!("configuration producer panicked");
            self.status.advance(JobStatus::Finished);
        }

        // Draining.
        let total = buffer.sort(&self.cancel);
        let target = counters.settle_target(total);
        debug!(total, target, "configuration count settled");
        loop {
            let replaced = pool.reap();
            if replaced > 0 {
                debug!(replaced, "replenished worker pool");
            }
            if pool.is_empty() || self.cancel.is_cancelled() {
                break;
            }
            on_progress(&counters.task_description(buffer.size()));
            thread::sleep(self.params.poll_interval);
        }
        pool.interrupt_all();

        let cancelled = self.cancel.is_cancelled() || self.status.get() == JobStatus::Cancelled;
        let built = counters.built().min(target);
        let elapsed = counters.elapsed();
        on_progress(&counters.task_description(buffer.size()));
        info!(
            "{built} of {target} configurations built in {}",
            format_duration(elapsed)
        );
        if let OutputLayout::Shared { products } = &layout {
            self.workspace.refresh(products);
        }

        Ok(BuildSummary {
            job_id: self.id.clone(),
            project: self.workspace.project_name().to_string(),
            kind: self.params.kind,
            built,
            failed: counters.failed(),
            skipped: counters.skipped(),
            target: Some(target),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            cancelled,
            started_at,
        })
    }

    fn noop_summary(&self, started_at: DateTime<Utc>) -> BuildSummary {
        BuildSummary {
            job_id: self.id.clone(),
            project: self.workspace.project_name().to_string(),
            kind: self.params.kind,
            built: 0,
            failed: 0,
            skipped: 0,
            target: Some(0),
            elapsed_ms: 0,
            cancelled: false,
            started_at,
        }
    }

    /// Shared mode: fresh `products/` with its scratch bin folder. Project
    /// mode: remove sibling projects left over from the last run of this
    /// build kind. Failures here are logged and the build continues.
    fn prepare_output(&self) -> OutputLayout {
        if self.params.create_new_projects {
            let prefix = format!(
                "{}{}",
                self.workspace.project_name(),
                self.params.kind.project_separator()
            );
            match self.workspace.list_projects(&prefix) {
                Ok(stale) => {
                    for name in stale {
                        if let Err(e) = self.workspace.delete_project(&name) {
                            warn!(project = %name, error = %e, "cannot delete stale project");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "cannot list stale projects"),
            }
            return OutputLayout::Projects { prefix };
        }

        let products = match self
            .workspace
            .create_or_clear_folder(PRODUCTS_DIR)
            .or_else(|first| {
                debug!(error = %first, "retrying products folder");
                self.workspace.create_or_clear_folder(PRODUCTS_DIR)
            }) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "cannot clear products folder, building into it as is");
                paths::products_dir(self.workspace.project_dir())
            }
        };
        if let Err(e) = self.workspace.create_folder(&products.join(TEMP_BIN_DIR)) {
            warn!(error = %e, "cannot create temporary bin folder");
        }
        OutputLayout::Shared { products }
    }

    fn resolve_classpath(&self) -> Vec<PathBuf> {
        self.workspace
            .resolve_classpath()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "skipping classpath entry");
                    None
                }
            })
            .collect()
    }

    fn spawn_producer(
        &self,
        strategy: Box<dyn SamplingStrategy>,
        buffer: Arc<ConfigurationBuffer>,
    ) -> Result<JoinHandle<()>> {
        let formula = Arc::clone(&self.formula);
        let status = self.status.clone();
        let cancel = self.cancel.clone();
        let limit = self.limit;
        let handle = thread::Builder::new()
            .name("prodline-producer".to_string())
            .spawn(move || produce(strategy, formula.as_ref(), &buffer, &status, &cancel, limit))?;
        Ok(handle)
    }
}

/// Pull at most `limit` valid configurations from the strategy into the
/// buffer.
fn produce(
    strategy: Box<dyn SamplingStrategy>,
    formula: &dyn Formula,
    buffer: &ConfigurationBuffer,
    status: &SharedStatus,
    cancel: &CancelToken,
    limit: usize,
) {
    if !status.advance(JobStatus::Running) {
        return;
    }
    let mut stream = match strategy.configurations() {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "sampling failed");
            status.advance(JobStatus::Finished);
            return;
        }
    };
    let mut produced = 0;
    while produced < limit {
        if cancel.is_cancelled() {
            break;
        }
        let Some(config) = stream.next() else {
            break;
        };
        if !formula.is_valid(&config) {
            warn!(literals = ?config.literals(), "dropping invalid configuration");
            continue;
        }
        if buffer.enqueue(config).is_err() {
            break;
        }
        produced += 1;
    }
    debug!(produced, "producer done");
    if cancel.is_cancelled() {
        status.advance(JobStatus::Cancelled);
    } else {
        status.advance(JobStatus::Finished);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::ConfigFileComposer;
    use crate::model::{FeatureDef, FeatureModel};
    use crate::workspace::FsWorkspace;
    use tempfile::TempDir;

    fn abc() -> Arc<dyn Formula> {
        let model = FeatureModel {
            name: "abc".to_string(),
            features: ["A", "B", "C"]
                .iter()
                .map(|n| FeatureDef {
                    name: n.to_string(),
                    default: false,
                    description: None,
                })
                .collect(),
            constraints: vec!["A => B".to_string()],
        };
        Arc::new(model.formula().unwrap())
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

    #[test]
    fn status_moves_forward_only() {
        let status = SharedStatus::new();
        assert!(status.advance(JobStatus::Running));
        assert!(!status.advance(JobStatus::NotStarted));
        assert!(status.advance(JobStatus::Cancelled));
        assert!(!status.advance(JobStatus::Finished));
        assert_eq!(status.get(), JobStatus::Cancelled);
    }

    #[test]
    fn all_valid_builds_every_solution() {
        let tmp = TempDir::new().unwrap();
        let ws = workspace(&tmp);
        let mut job = BuildJob::new(params(), abc(), Arc::new(ConfigFileComposer), ws).unwrap();
        let records = job.subscribe();
        let mut lines = Vec::new();
        let summary = job.run(|line| lines.push(line.to_string())).unwrap();

        assert_eq!(summary.built, 6);
        assert_eq!(summary.target, Some(6));
        assert!(!summary.cancelled);
        assert_eq!(records.try_iter().count(), 6);
        assert!(lines.iter().all(|l| l.starts_with("Built configurations: ")));
        assert!(tmp.path().join("shop/products/bin-tmp").is_dir());
        assert!(tmp.path().join("shop/products/00006/00006.config").is_file());
    }

    #[test]
    fn zero_max_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let ws = workspace(&tmp);
        let job = BuildJob::new(
            JobParams { max: 0, ..params() },
            abc(),
            Arc::new(ConfigFileComposer),
            ws,
        )
        .unwrap();
        let summary = job.run(|_| {}).unwrap();
        assert_eq!((summary.built, summary.target), (0, Some(0)));
        assert!(!tmp.path().join("shop/products").exists());
    }

    #[test]
    fn max_limits_the_sample() {
        let tmp = TempDir::new().unwrap();
        let job = BuildJob::new(
            JobParams { max: 4, ..params() },
            abc(),
            Arc::new(ConfigFileComposer),
            workspace(&tmp),
        )
        .unwrap();
        assert_eq!(job.initial_target(), Some(4));
        let summary = job.run(|_| {}).unwrap();
        assert_eq!((summary.built, summary.target), (4, Some(4)));
    }

    #[test]
    fn separate_projects_replace_stale_siblings() {
        let tmp = TempDir::new().unwrap();
        let ws = workspace(&tmp);
        std::fs::create_dir_all(tmp.path().join("shop-integration-00007")).unwrap();
        let job = BuildJob::new(
            JobParams {
                kind: BuildKind::Integration,
                feature: Some("A".to_string()),
                create_new_projects: true,
                ..params()
            },
            abc(),
            Arc::new(ConfigFileComposer),
            ws,
        )
        .unwrap();
        let summary = job.run(|_| {}).unwrap();
        assert_eq!(summary.built, 2);
        assert!(!tmp.path().join("shop-integration-00007").exists());
        assert!(tmp
            .path()
            .join("shop-integration-00001/shop-integration-00001.config")
            .is_file());
        assert!(tmp.path().join("shop-integration-00002").is_dir());
    }

    #[test]
    fn unknown_algorithm_fails_at_init() {
        let tmp = TempDir::new().unwrap();
        let result = BuildJob::new(
            JobParams {
                kind: BuildKind::TWise,
                algorithm: "casa".to_string(),
                ..params()
            },
            abc(),
            Arc::new(ConfigFileComposer),
            workspace(&tmp),
        );
        assert!(matches!(result, Err(ProdlineError::UnknownAlgorithm(_))));
        assert!(!tmp.path().join("shop/products").exists());
    }

    #[test]
    fn interaction_order_checks_strength() {
        let tmp = TempDir::new().unwrap();
        let result = BuildJob::new(
            JobParams {
                order: BuildOrder::Interaction,
                t_order: 7,
                ..params()
            },
            abc(),
            Arc::new(ConfigFileComposer),
            workspace(&tmp),
        );
        assert!(matches!(result, Err(ProdlineError::InvalidStrength(7))));
    }

    #[test]
    fn ordering_strength_is_independent_of_sampling_strength() {
        let tmp = TempDir::new().unwrap();
        let job = BuildJob::new(
            JobParams {
                kind: BuildKind::TWise,
                t: 3,
                order: BuildOrder::Interaction,
                t_order: 2,
                ..params()
            },
            abc(),
            Arc::new(ConfigFileComposer),
            workspace(&tmp),
        )
        .unwrap();
        assert_eq!(job.policy(), OrderingPolicy::Interaction(2));
        let summary = job.run(|_| {}).unwrap();
        // 3-wise over three features needs every valid configuration
        assert_eq!(summary.built, 6);
    }

    /// Formula whose validity check panics, taking the producer down.
    struct PanickingFormula(Arc<dyn Formula>);

    impl Formula for PanickingFormula {
        fn variables(&self) -> &[String] {
            self.0.variables()
        }

        fn is_valid(&self, _config: &crate::configuration::Configuration) -> bool {
            panic!("validity check failed");
        }

        fn complete(
            &self,
            assumptions: &[crate::configuration::Literal],
            preferred: &dyn Fn(usize) -> bool,
        ) -> Option<crate::configuration::Configuration> {
            self.0.complete(assumptions, preferred)
        }

        fn solutions(&self) -> Box<dyn Iterator<Item = crate::configuration::Configuration> + Send> {
            self.0.solutions()
        }
    }

    #[test]
    fn panicked_producer_still_finishes_the_job() {
        let tmp = TempDir::new().unwrap();
        let job = BuildJob::new(
            params(),
            Arc::new(PanickingFormula(abc())),
            Arc::new(ConfigFileComposer),
            workspace(&tmp),
        )
        .unwrap();
        let status = job.status();
        let summary = job.run(|_| {}).unwrap();

        assert_eq!(status.get(), JobStatus::Finished);
        assert_eq!(summary.built, 0);
        assert!(!summary.cancelled);
    }

    #[test]
    fn cancelled_job_keeps_cancelled_status() {
        let tmp = TempDir::new().unwrap();
        let job = BuildJob::new(params(), abc(), Arc::new(ConfigFileComposer), workspace(&tmp))
            .unwrap();
        let status = job.status();
        job.cancel_token().cancel();
        let summary = job.run(|_| {}).unwrap();

        assert_eq!(status.get(), JobStatus::Cancelled);
        assert!(summary.cancelled);
    }
}
