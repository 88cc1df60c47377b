//! Ordering buffer between the producer and the workers.
//!
//! The producer enqueues configurations as the strategy yields them. With the
//! default policy workers drain them in insertion order right away. The
//! dissimilarity and interaction policies need the complete set, so nothing
//! is handed out until [`ConfigurationBuffer::sort`] has run; after that the
//! buffer is sealed and every dequeue draws from the sorted sequence.

use crate::configuration::{Configuration, Literal};
use crate::error::{ProdlineError, Result};
use crate::progress::CancelToken;
use crate::sampling::twise::literal_tuples;
use crate::types::BuildOrder;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

// ---------------------------------------------------------------------------
// OrderingPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// Insertion order.
    Default,
    /// Each next configuration is the one farthest from the previous pick.
    Dissimilarity,
    /// Each next configuration covers the most not-yet-covered t-tuples.
    Interaction(usize),
}

impl OrderingPolicy {
    pub fn new(order: BuildOrder, t: usize) -> Self {
        match order {
            BuildOrder::Default => OrderingPolicy::Default,
            BuildOrder::Dissimilarity => OrderingPolicy::Dissimilarity,
            BuildOrder::Interaction => OrderingPolicy::Interaction(t.max(1)),
        }
    }

    /// True when the policy can only order the complete set.
    pub fn needs_full_set(self) -> bool {
        !matches!(self, OrderingPolicy::Default)
    }
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingPolicy::Default => f.write_str("default"),
            OrderingPolicy::Dissimilarity => f.write_str("dissimilarity"),
            OrderingPolicy::Interaction(t) => write!(f, "interaction(t={t})"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigurationBuffer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<Configuration>,
    enqueued: usize,
    dequeued: usize,
    sealed: bool,
    sorted: bool,
}

#[derive(Debug)]
pub struct ConfigurationBuffer {
    policy: OrderingPolicy,
    limit: Option<usize>,
    state: Mutex<State>,
}

impl ConfigurationBuffer {
    pub fn new(policy: OrderingPolicy) -> Self {
        Self {
            policy,
            limit: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Cap the total number of configurations handed out once sorted.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn policy(&self) -> OrderingPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, config: Configuration) -> Result<()> {
        let mut state = self.lock();
        if state.sealed {
            return Err(ProdlineError::BufferSealed);
        }
        state.pending.push_back(config);
        state.enqueued += 1;
        Ok(())
    }

    /// Next configuration and its 1-based build index. `None` only means
    /// nothing is available right now.
    pub fn dequeue(&self) -> Option<(usize, Configuration)> {
        let mut state = self.lock();
        if self.policy.needs_full_set() && !state.sorted {
            return None;
        }
        let config = state.pending.pop_front()?;
        state.dequeued += 1;
        Some((state.dequeued, config))
    }

    pub fn size(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn total_enqueued(&self) -> usize {
        self.lock().enqueued
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub fn is_sorted(&self) -> bool {
        self.lock().sorted
    }

    /// Sealed and empty: no configuration will ever be handed out again.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.sealed && state.pending.is_empty()
    }

    /// Seal the buffer and apply the ordering policy to what remains.
    /// Returns the authoritative total: handed out so far plus remaining.
    /// A second call only reports the total.
    pub fn sort(&self, cancel: &CancelToken) -> usize {
        let pending: Vec<Configuration> = {
            let mut state = self.lock();
            if state.sorted {
                return state.dequeued + state.pending.len();
            }
            state.sealed = true;
            state.pending.drain(..).collect()
        };

        let before = pending.len();
        let ordered = match self.policy {
            OrderingPolicy::Default => pending,
            OrderingPolicy::Dissimilarity => by_dissimilarity(dedup(pending), cancel),
            OrderingPolicy::Interaction(t) => by_interaction(dedup(pending), t, cancel),
        };
        debug!(
            policy = %self.policy,
            before,
            after = ordered.len(),
            "sorted configuration buffer"
        );

        let mut state = self.lock();
        state.pending = ordered.into();
        if let Some(limit) = self.limit {
            let allowed = limit.saturating_sub(state.dequeued);
            state.pending.truncate(allowed);
        }
        state.sorted = true;
        state.dequeued + state.pending.len()
    }
}

fn dedup(configs: Vec<Configuration>) -> Vec<Configuration> {
    let mut seen = HashSet::new();
    configs
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// Index of the first maximum, so ties keep insertion order.
fn first_max(scores: impl Iterator<Item = usize>) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (i, score) in scores.enumerate() {
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

fn by_dissimilarity(mut rest: Vec<Configuration>, cancel: &CancelToken) -> Vec<Configuration> {
    let mut ordered = Vec::with_capacity(rest.len());
    if rest.is_empty() {
        return ordered;
    }
    ordered.push(rest.remove(0));
    while !rest.is_empty() {
        if cancel.is_cancelled() {
            ordered.append(&mut rest);
            break;
        }
        let last = &ordered[ordered.len() - 1];
        let Some(pick) = first_max(rest.iter().map(|c| c.distance(last))) else {
            break;
        };
        ordered.push(rest.remove(pick));
    }
    ordered
}

fn by_interaction(rest: Vec<Configuration>, t: usize, cancel: &CancelToken) -> Vec<Configuration> {
    let mut rest: Vec<(Configuration, Vec<Vec<Literal>>)> = rest
        .into_iter()
        .map(|c| {
            let tuples = literal_tuples(&c, t);
            (c, tuples)
        })
        .collect();
    let mut covered: HashSet<Vec<Literal>> = HashSet::new();
    let mut ordered = Vec::with_capacity(rest.len());
    while !rest.is_empty() {
        if cancel.is_cancelled() {
            ordered.extend(rest.drain(..).map(|(c, _)| c));
            break;
        }
        let gains = rest
            .iter()
            .map(|(_, tuples)| tuples.iter().filter(|t| !covered.contains(*t)).count());
        let Some(pick) = first_max(gains) else {
            break;
        };
        let (config, tuples) = rest.remove(pick);
        covered.extend(tuples);
        ordered.push(config);
    }
    ordered
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
