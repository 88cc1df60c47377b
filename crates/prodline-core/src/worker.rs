//! Build workers.
//!
//! Each worker is a named thread that takes configurations from the shared
//! buffer and hands them to the composer, one at a time. Workers never abort
//! a build in flight; cancellation only stops them from taking the next one.

use crate::buffer::ConfigurationBuffer;
use crate::composer::{BuildContext, Composer};
use crate::configuration::Configuration;
use crate::error::Result;
use crate::paths;
use crate::progress::{CancelToken, ProgressCounters};
use crate::types::{BuildOutcome, WorkerState};
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One built configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub index: usize,
    pub configuration: Configuration,
    pub outcome: BuildOutcome,
    pub worker: usize,
    pub duration_ms: u64,
}

/// Where each build writes its output.
#[derive(Debug, Clone)]
pub enum OutputLayout {
    /// `products/00001`, `products/00002`, ... inside the project.
    Shared { products: PathBuf },
    /// Sibling projects named `<prefix>00001`, ...
    Projects { prefix: String },
}

/// State every worker of a job reads.
pub struct WorkerShared {
    pub buffer: Arc<ConfigurationBuffer>,
    pub composer: Arc<dyn Composer>,
    pub workspace: Arc<dyn Workspace>,
    pub counters: Arc<ProgressCounters>,
    /// The job's cancellation token.
    pub cancel: CancelToken,
    pub layout: OutputLayout,
    pub variables: Arc<[String]>,
    pub classpath: Arc<[PathBuf]>,
    pub run_tests: bool,
    pub poll_interval: Duration,
    pub subscribers: Mutex<Vec<Sender<BuildRecord>>>,
}

impl WorkerShared {
    pub fn context(&self, index: usize) -> BuildContext {
        let (name, output_dir) = match &self.layout {
            OutputLayout::Shared { products } => {
                let name = paths::variant_name(index);
                let dir = products.join(&name);
                (name, dir)
            }
            OutputLayout::Projects { prefix } => {
                let name = format!("{prefix}{}", paths::variant_name(index));
                let dir = self.workspace.project_path(&name);
                (name, dir)
            }
        };
        BuildContext {
            index,
            name,
            output_dir,
            variables: Arc::clone(&self.variables),
            classpath: Arc::clone(&self.classpath),
            run_tests: self.run_tests,
        }
    }

    fn publish(&self, record: BuildRecord) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(record.clone()).is_ok());
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct Worker {
    ordinal: usize,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

/// Marks the worker terminated however its thread exits.
struct TerminateOnDrop(Arc<AtomicU8>);

impl Drop for TerminateOnDrop {
    fn drop(&mut self) {
        self.0.store(WorkerState::Terminated.as_u8(), Ordering::SeqCst);
    }
}

impl Worker {
    pub fn spawn(ordinal: usize, shared: Arc<WorkerShared>, stop: CancelToken) -> Result<Self> {
        let state = Arc::new(AtomicU8::new(WorkerState::Idle.as_u8()));
        let thread_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(format!("prodline-worker-{ordinal}"))
            .spawn(move || {
                let _terminate = TerminateOnDrop(Arc::clone(&thread_state));
                run_worker(ordinal, &shared, &stop, &thread_state);
            })?;
        Ok(Self {
            ordinal,
            state,
            handle: Some(handle),
        })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == WorkerState::Terminated
            || self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(worker = self.ordinal, "worker panicked");
            }
        }
    }
}

fn run_worker(ordinal: usize, shared: &WorkerShared, stop: &CancelToken, state: &AtomicU8) {
    debug!(worker = ordinal, "worker started");
    loop {
        if shared.cancel.is_cancelled() || stop.is_cancelled() {
            break;
        }
        let Some((index, config)) = shared.buffer.dequeue() else {
            if shared.buffer.is_drained() {
                break;
            }
            thread::sleep(shared.poll_interval);
            continue;
        };
        state.store(WorkerState::Building.as_u8(), Ordering::SeqCst);
        build_one(ordinal, shared, index, config);
        state.store(WorkerState::Idle.as_u8(), Ordering::SeqCst);
    }
    debug!(worker = ordinal, "worker finished");
}

fn build_one(ordinal: usize, shared: &WorkerShared, index: usize, config: Configuration) {
    let ctx = shared.context(index);
    let started = Instant::now();
    let outcome = match shared.workspace.create_folder(&ctx.output_dir) {
        Ok(()) => shared.composer.build(&config, &ctx),
        Err(e) => BuildOutcome::failed(format!("cannot create {}: {e}", ctx.output_dir.display())),
    };
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    shared.counters.record(&outcome);
    match &outcome {
        BuildOutcome::Success => {
            debug!(worker = ordinal, index, duration_ms, "built configuration");
        }
        BuildOutcome::Failed { .. } | BuildOutcome::Skipped { .. } => {
            warn!(worker = ordinal, index, outcome = %outcome, "configuration not built");
            shared.workspace.raise_marker(index, &outcome.to_string());
        }
    }
    shared.publish(BuildRecord {
        index,
        configuration: config,
        outcome,
        worker: ordinal,
        duration_ms,
    });
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

pub struct WorkerPool {
    shared: Arc<WorkerShared>,
    stop: CancelToken,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Number of workers for a job: one when the composer cannot build in
    /// parallel, otherwise twice the available cores bounded by what is left
    /// to build.
    pub fn pool_size(parallel: bool, remaining: Option<usize>) -> usize {
        if !parallel {
            return 1;
        }
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        let size = match remaining {
            Some(remaining) => (2 * cores).min(remaining),
            None => 2 * cores,
        };
        size.max(1)
    }

    pub fn start(shared: Arc<WorkerShared>, size: usize) -> Result<Self> {
        let stop = CancelToken::new();
        let mut workers = Vec::with_capacity(size);
        for ordinal in 1..=size.max(1) {
            workers.push(Worker::spawn(ordinal, Arc::clone(&shared), stop.clone())?);
        }
        debug!(workers = workers.len(), "worker pool started");
        Ok(Self {
            shared,
            stop,
            workers,
        })
    }

    /// Workers not yet reaped.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Join terminated workers. While the buffer still holds configurations
    /// and the job goes on, each one is replaced by a fresh worker with the
    /// same ordinal. Returns the number of replacements.
    pub fn reap(&mut self) -> usize {
        let mut replaced = 0;
        let mut alive = Vec::with_capacity(self.workers.len());
        for mut worker in std::mem::take(&mut self.workers) {
            if !worker.is_terminated() {
                alive.push(worker);
                continue;
            }
            worker.join();
            let stopping = self.shared.cancel.is_cancelled() || self.stop.is_cancelled();
            if !stopping && self.shared.buffer.size() > 0 {
                debug!(worker = worker.ordinal(), "replacing terminated worker");
                match Worker::spawn(worker.ordinal(), Arc::clone(&self.shared), self.stop.clone()) {
                    Ok(fresh) => {
                        alive.push(fresh);
                        replaced += 1;
                    }
                    Err(e) => warn!(error = %e, "cannot replace worker"),
                }
            }
        }
        self.workers = alive;
        replaced
    }

    /// Stop every worker after its current build and wait for it.
    pub fn interrupt_all(&mut self) {
        self.stop.cancel();
        for worker in &mut self.workers {
            worker.join();
        }
        self.workers.clear();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.interrupt_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
