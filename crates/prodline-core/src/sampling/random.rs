use super::{ConfigurationStream, SamplingStrategy};
use crate::configuration::Configuration;
use crate::error::Result;
use crate::model::Formula;
use crate::types::BuildKind;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;

/// Consecutive duplicate draws after which the space counts as exhausted.
pub const RANDOM_RETRY_LIMIT: usize = 64;

/// Unbounded stream of distinct random valid configurations.
///
/// Each draw completes an empty assignment with a freshly randomized
/// polarity preference per variable. The job's `max` bounds the run; the
/// stream ends on its own only when it keeps drawing configurations it has
/// already produced.
pub struct RandomSampling {
    formula: Arc<dyn Formula>,
    rng: StdRng,
}

impl RandomSampling {
    pub fn new(formula: Arc<dyn Formula>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { formula, rng }
    }
}

impl SamplingStrategy for RandomSampling {
    fn kind(&self) -> BuildKind {
        BuildKind::Random
    }

    fn configurations(self: Box<Self>) -> Result<ConfigurationStream> {
        Ok(Box::new(RandomDraws {
            formula: self.formula,
            rng: self.rng,
            seen: HashSet::new(),
            done: false,
        }))
    }
}

struct RandomDraws {
    formula: Arc<dyn Formula>,
    rng: StdRng,
    seen: HashSet<Configuration>,
    done: bool,
}

impl Iterator for RandomDraws {
    type Item = Configuration;

    fn next(&mut self) -> Option<Configuration> {
        if self.done {
            return None;
        }
        let n = self.formula.variables().len();
        for _ in 0..RANDOM_RETRY_LIMIT {
            let prefs: Vec<bool> = (0..n).map(|_| self.rng.gen()).collect();
            let Some(config) = self.formula.complete(&[], &|v| prefs[v - 1]) else {
                self.done = true;
                return None;
            };
            if self.seen.insert(config.clone()) {
                return Some(config);
            }
        }
        self.done = true;
        None
    }
}
