//! T-wise sampling.
//!
//! A t-tuple is a set of `t` literals over distinct variables. The sample
//! must cover every t-tuple that occurs in at least one valid configuration.
//! Tuples that no valid configuration contains are discarded up front, so
//! each emitted configuration covers at least one new tuple and the sequence
//! always terminates.

use super::{ConfigurationStream, SamplingStrategy};
use crate::configuration::{literal, Configuration, Literal};
use crate::error::{ProdlineError, Result};
use crate::model::Formula;
use crate::types::BuildKind;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub const MAX_STRENGTH: usize = 4;

/// Random completions drawn per IncLing step.
pub const INCLING_CANDIDATES: usize = 8;

// ---------------------------------------------------------------------------
// TWiseAlgorithm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TWiseAlgorithm {
    /// Greedy growth: seed with the first uncovered tuple, absorb every
    /// compatible tuple that keeps the assignment satisfiable.
    Chvatal,
    /// Pairwise only: pick the best of several random completions of the
    /// first uncovered pair.
    IncLing,
}

impl TWiseAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            TWiseAlgorithm::Chvatal => "chvatal",
            TWiseAlgorithm::IncLing => "incling",
        }
    }
}

impl fmt::Display for TWiseAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TWiseAlgorithm {
    type Err = ProdlineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chvatal" => Ok(TWiseAlgorithm::Chvatal),
            "icpl" => {
                warn!("icpl is sampled with the chvatal greedy cover");
                Ok(TWiseAlgorithm::Chvatal)
            }
            "incling" => Ok(TWiseAlgorithm::IncLing),
            _ => Err(ProdlineError::UnknownAlgorithm(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tuples
// ---------------------------------------------------------------------------

/// All `k`-element index combinations of `0..n` in lexicographic order.
pub(crate) fn index_combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.clone());
        let mut i = k;
        while i > 0 && idx[i - 1] == n - k + i - 1 {
            i -= 1;
        }
        if i == 0 {
            return out;
        }
        idx[i - 1] += 1;
        for j in i..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

/// The t-tuples a configuration covers: every `t`-subset of its literals.
pub(crate) fn literal_tuples(config: &Configuration, t: usize) -> Vec<Vec<Literal>> {
    let lits = config.literals();
    index_combinations(lits.len(), t)
        .into_iter()
        .map(|combo| combo.into_iter().map(|i| lits[i]).collect())
        .collect()
}

/// Every t-tuple over the formula's variables that some valid configuration
/// contains.
pub fn valid_tuples(formula: &dyn Formula, t: usize) -> Vec<Vec<Literal>> {
    let n = formula.variables().len();
    let mut tuples = Vec::new();
    for vars in index_combinations(n, t) {
        for mask in 0..(1u32 << t) {
            let tuple: Vec<Literal> = vars
                .iter()
                .enumerate()
                .map(|(bit, v)| literal(v + 1, mask & (1 << bit) == 0))
                .collect();
            if formula.is_satisfiable(&tuple) {
                tuples.push(tuple);
            }
        }
    }
    tuples
}

fn compatible(assumptions: &[Literal], tuple: &[Literal]) -> bool {
    !tuple.iter().any(|l| assumptions.contains(&-l))
}

// ---------------------------------------------------------------------------
// TWise
// ---------------------------------------------------------------------------

pub struct TWise {
    formula: Arc<dyn Formula>,
    algorithm: TWiseAlgorithm,
    t: usize,
    seed: u64,
}

impl TWise {
    pub fn new(
        formula: Arc<dyn Formula>,
        algorithm: TWiseAlgorithm,
        t: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        if !(1..=MAX_STRENGTH).contains(&t) {
            return Err(ProdlineError::InvalidStrength(t));
        }
        let t = match algorithm {
            TWiseAlgorithm::IncLing if t != 2 => {
                warn!(requested = t, "incling samples pairwise only, using t=2");
                2
            }
            _ => t,
        };
        let variables = formula.variables().len().max(1);
        let t = if t > variables {
            warn!(requested = t, variables, "strength exceeds the feature count, using t={variables}");
            variables
        } else {
            t
        };
        Ok(Self {
            formula,
            algorithm,
            t,
            seed: seed.unwrap_or(0),
        })
    }

    pub fn strength(&self) -> usize {
        self.t
    }
}

impl SamplingStrategy for TWise {
    fn kind(&self) -> BuildKind {
        BuildKind::TWise
    }

    fn configurations(self: Box<Self>) -> Result<ConfigurationStream> {
        // Tuple enumeration is deferred to the first draw so that it runs on
        // the producer thread.
        Ok(Box::new(Cover {
            formula: self.formula,
            algorithm: self.algorithm,
            t: self.t,
            rng: StdRng::seed_from_u64(self.seed),
            uncovered: None,
        }))
    }
}

struct Cover {
    formula: Arc<dyn Formula>,
    algorithm: TWiseAlgorithm,
    t: usize,
    rng: StdRng,
    uncovered: Option<Vec<Vec<Literal>>>,
}

impl Cover {
    fn chvatal_step(&self, uncovered: &[Vec<Literal>]) -> Option<Configuration> {
        let mut assumptions: Vec<Literal> = uncovered[0].clone();
        for tuple in &uncovered[1..] {
            if tuple.iter().all(|l| assumptions.contains(l)) {
                continue;
            }
            if !compatible(&assumptions, tuple) {
                continue;
            }
            let mut candidate = assumptions.clone();
            candidate.extend(tuple.iter().filter(|l| !assumptions.contains(*l)));
            if self.formula.is_satisfiable(&candidate) {
                assumptions = candidate;
            }
        }
        self.formula.complete(&assumptions, &|_| false)
    }

    fn incling_step(&mut self, uncovered: &[Vec<Literal>]) -> Option<Configuration> {
        let n = self.formula.variables().len();
        let seed = &uncovered[0];
        let mut best: Option<(usize, Configuration)> = None;
        for _ in 0..INCLING_CANDIDATES {
            let prefs: Vec<bool> = (0..n).map(|_| self.rng.gen()).collect();
            let Some(config) = self.formula.complete(seed, &|v| prefs[v - 1]) else {
                continue;
            };
            let gain = uncovered.iter().filter(|t| config.covers(t)).count();
            if best.as_ref().map_or(true, |(g, _)| gain > *g) {
                best = Some((gain, config));
            }
        }
        best.map(|(_, config)| config)
    }
}

impl Iterator for Cover {
    type Item = Configuration;

    fn next(&mut self) -> Option<Configuration> {
        let mut uncovered = match self.uncovered.take() {
            Some(u) => u,
            None => {
                let tuples = valid_tuples(self.formula.as_ref(), self.t);
                debug!(t = self.t, tuples = tuples.len(), "collected valid tuples");
                tuples
            }
        };
        if uncovered.is_empty() {
            self.uncovered = Some(uncovered);
            return None;
        }
        let config = match self.algorithm {
            TWiseAlgorithm::Chvatal => self.chvatal_step(&uncovered),
            TWiseAlgorithm::IncLing => self.incling_step(&uncovered),
        };
        match config {
            Some(config) => {
                uncovered.retain(|t| !config.covers(t));
                self.uncovered = Some(uncovered);
                Some(config)
            }
            None => {
                // every remaining tuple was proven satisfiable; only a
                // formula that changed underneath us lands here
                self.uncovered = Some(Vec::new());
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::test_support::formula;

    fn sample(
        names: &[&str],
        constraints: &[&str],
        algorithm: TWiseAlgorithm,
        t: usize,
    ) -> (Arc<dyn Formula>, Vec<Configuration>) {
        let f: Arc<dyn Formula> = Arc::new(formula(names, constraints));
        let strategy = Box::new(TWise::new(Arc::clone(&f), algorithm, t, Some(3)).unwrap());
        let configs = strategy.configurations().unwrap().collect();
        (f, configs)
    }

    fn assert_full_coverage(f: &dyn Formula, configs: &[Configuration], t: usize) {
        for tuple in valid_tuples(f, t) {
            assert!(
                configs.iter().any(|c| c.covers(&tuple)),
                "tuple {tuple:?} not covered"
            );
        }
    }

    #[test]
    fn combinations_are_lexicographic() {
        assert_eq!(
            index_combinations(4, 2),
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert!(index_combinations(2, 3).is_empty());
    }

    #[test]
    fn invalid_tuples_are_excluded() {
        let f = formula(&["A", "B"], &["A => B"]);
        let tuples = valid_tuples(&f, 2);
        assert_eq!(tuples.len(), 3);
        assert!(!tuples.contains(&vec![1, -2]));
    }

    #[test]
    fn chvatal_pairwise_covers_all_valid_pairs() {
        let names = ["A", "B", "C", "D", "E"];
        let (f, configs) = sample(&names, &["A => B", "!(C & D)"], TWiseAlgorithm::Chvatal, 2);
        assert!(configs.iter().all(|c| f.is_valid(c)));
        assert_full_coverage(f.as_ref(), &configs, 2);
        // far fewer than the 24 valid configurations
        assert!(configs.len() < 12, "sample too large: {}", configs.len());
    }

    #[test]
    fn chvatal_three_wise_coverage() {
        let (f, configs) = sample(&["A", "B", "C", "D"], &[], TWiseAlgorithm::Chvatal, 3);
        assert_full_coverage(f.as_ref(), &configs, 3);
    }

    #[test]
    fn incling_covers_pairs() {
        let (f, configs) = sample(&["A", "B", "C", "D"], &["A => B"], TWiseAlgorithm::IncLing, 2);
        assert!(configs.iter().all(|c| f.is_valid(c)));
        assert_full_coverage(f.as_ref(), &configs, 2);
    }

    #[test]
    fn algorithm_names() {
        assert_eq!("ICPL".parse::<TWiseAlgorithm>().unwrap(), TWiseAlgorithm::Chvatal);
        assert_eq!("incling".parse::<TWiseAlgorithm>().unwrap(), TWiseAlgorithm::IncLing);
        assert!("casa".parse::<TWiseAlgorithm>().is_err());
    }

    #[test]
    fn strength_bounds() {
        let f: Arc<dyn Formula> = Arc::new(formula(&["A", "B"], &[]));
        assert!(matches!(
            TWise::new(Arc::clone(&f), TWiseAlgorithm::Chvatal, 0, None),
            Err(ProdlineError::InvalidStrength(0))
        ));
        assert!(TWise::new(Arc::clone(&f), TWiseAlgorithm::Chvatal, 5, None).is_err());
        let incling = TWise::new(f, TWiseAlgorithm::IncLing, 3, None).unwrap();
        assert_eq!(incling.strength(), 2);
    }

    #[test]
    fn icpl_alias_samples_with_chvatal() {
        let alias = "icpl".parse::<TWiseAlgorithm>().unwrap();
        assert_eq!(alias, TWiseAlgorithm::Chvatal);
        assert_eq!(alias.as_str(), "chvatal");
    }

    #[test]
    fn strength_above_feature_count_is_clamped() {
        let f: Arc<dyn Formula> = Arc::new(formula(&["A"], &[]));
        let twise = TWise::new(Arc::clone(&f), TWiseAlgorithm::Chvatal, 3, None).unwrap();
        assert_eq!(twise.strength(), 1);

        let (f, configs) = sample(&["A", "B"], &[], TWiseAlgorithm::Chvatal, 4);
        assert_full_coverage(f.as_ref(), &configs, 2);
        assert_eq!(configs.len(), 4);
    }
}
