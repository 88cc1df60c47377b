//! Progress accounting shared between the orchestrator and the workers.

use crate::types::BuildOutcome;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const UNKNOWN_TARGET: usize = usize::MAX;

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// ProgressCounters
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ProgressCounters {
    target: AtomicUsize,
    built: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    started: Instant,
}

impl ProgressCounters {
    pub fn new(target: Option<usize>) -> Self {
        Self {
            target: AtomicUsize::new(target.unwrap_or(UNKNOWN_TARGET)),
            built: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    /// `None` while the total is still being counted.
    pub fn target(&self) -> Option<usize> {
        match self.target.load(Ordering::SeqCst) {
            UNKNOWN_TARGET => None,
            t => Some(t),
        }
    }

    /// Lower the target to `total` once the real number of configurations is
    /// known. The target only ever shrinks.
    pub fn settle_target(&self, total: usize) -> usize {
        let current = self.target.fetch_min(total, Ordering::SeqCst);
        current.min(total)
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn record(&self, outcome: &BuildOutcome) {
        let counter = match outcome {
            BuildOutcome::Success => &self.built,
            BuildOutcome::Failed { .. } => &self.failed,
            BuildOutcome::Skipped { .. } => &self.skipped,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Remaining time extrapolated from the average build so far.
    pub fn eta(&self) -> Option<Duration> {
        estimate_remaining(self.elapsed(), self.built(), self.target())
    }

    pub fn task_description(&self, buffered: usize) -> String {
        task_description(self.built(), self.target(), buffered, self.eta())
    }
}

/// `elapsed × (target − built) / built`; unknown until the first build and
/// while the target is still being counted.
pub fn estimate_remaining(
    elapsed: Duration,
    built: usize,
    target: Option<usize>,
) -> Option<Duration> {
    let target = target?;
    if built == 0 {
        return None;
    }
    let remaining = target.saturating_sub(built) as u128;
    let nanos = elapsed.as_nanos() * remaining / built as u128;
    Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
}

/// Progress line shown while a job runs.
pub fn task_description(
    built: usize,
    target: Option<usize>,
    buffered: usize,
    eta: Option<Duration>,
) -> String {
    let target = match target {
        Some(t) => t.to_string(),
        None => "counting...".to_string(),
    };
    let eta = eta.map(format_duration).unwrap_or_default();
    format!("Built configurations: {built}/{target} ({buffered} buffered) Expected time: {eta}")
}

/// `1h 02min 05s.`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!(
        "{}h {:02}min {:02}s.",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    )
}
