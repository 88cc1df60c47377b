//! Backtracking reference solver.
//!
//! Variables are decided in index order. After every decision each
//! constraint is evaluated three-valued over the partial assignment and the
//! branch is pruned as soon as one of them is definitely false. This is
//! exponential in the worst case and only meant for small models; larger
//! models plug in their own [`Formula`].

use super::{Expr, FeatureModel, Formula};
use crate::configuration::{literal, var_of, Configuration, Literal};
use crate::error::Result;
use std::sync::Arc;

#[derive(Debug)]
struct Inner {
    variables: Vec<String>,
    constraints: Vec<Expr>,
}

impl Inner {
    fn consistent(&self, values: &[Option<bool>]) -> bool {
        self.constraints
            .iter()
            .all(|c| c.eval(values) != Some(false))
    }

    fn search(
        &self,
        values: &mut Vec<Option<bool>>,
        fixed: &[bool],
        depth: usize,
        preferred: &dyn Fn(usize) -> bool,
    ) -> bool {
        if depth == values.len() {
            return true;
        }
        if fixed[depth] {
            return self.consistent(values) && self.search(values, fixed, depth + 1, preferred);
        }
        let first = preferred(depth + 1);
        for value in [first, !first] {
            values[depth] = Some(value);
            if self.consistent(values) && self.search(values, fixed, depth + 1, preferred) {
                return true;
            }
        }
        values[depth] = None;
        false
    }
}

/// Formula over a [`FeatureModel`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ModelFormula {
    inner: Arc<Inner>,
}

impl ModelFormula {
    pub fn new(model: &FeatureModel) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                variables: model.variables(),
                constraints: model.parse_constraints()?,
            }),
        })
    }

    /// Number of valid configurations.
    pub fn count(&self) -> usize {
        self.solutions().count()
    }
}

impl Formula for ModelFormula {
    fn variables(&self) -> &[String] {
        &self.inner.variables
    }

    fn is_valid(&self, config: &Configuration) -> bool {
        let n = self.inner.variables.len();
        if config.len() != n || config.literals().iter().any(|l| var_of(*l) > n) {
            return false;
        }
        let values: Vec<Option<bool>> = (1..=n).map(|v| config.value(v)).collect();
        self.inner
            .constraints
            .iter()
            .all(|c| c.eval(&values) == Some(true))
    }

    fn complete(
        &self,
        assumptions: &[Literal],
        preferred: &dyn Fn(usize) -> bool,
    ) -> Option<Configuration> {
        let n = self.inner.variables.len();
        let mut values = vec![None; n];
        let mut fixed = vec![false; n];
        for lit in assumptions {
            let var = var_of(*lit);
            if var == 0 || var > n {
                return None;
            }
            let value = *lit > 0;
            match values[var - 1] {
                Some(existing) if existing != value => return None,
                _ => {
                    values[var - 1] = Some(value);
                    fixed[var - 1] = true;
                }
            }
        }
        if !self.inner.consistent(&values) {
            return None;
        }
        if !self.inner.search(&mut values, &fixed, 0, preferred) {
            return None;
        }
        Some(Configuration::new(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| literal(i + 1, v.unwrap_or(false))),
        ))
    }

    fn solutions(&self) -> Box<dyn Iterator<Item = Configuration> + Send> {
        Box::new(Solutions::new(Arc::clone(&self.inner)))
    }
}

// ---------------------------------------------------------------------------
// Solutions
// ---------------------------------------------------------------------------

/// Depth-first enumeration with an explicit stack so it can be driven lazily
/// from the producer thread. Each variable is tried selected first.
struct Solutions {
    inner: Arc<Inner>,
    values: Vec<Option<bool>>,
    /// Per depth: 0 = untried, 1 = `true` tried, 2 = both tried.
    tried: Vec<u8>,
    depth: usize,
    exhausted: bool,
}

impl Solutions {
    fn new(inner: Arc<Inner>) -> Self {
        let n = inner.variables.len();
        let values = vec![None; n];
        let exhausted = !inner.consistent(&values);
        Self {
            inner,
            values,
            tried: vec![0; n],
            depth: 0,
            exhausted,
        }
    }
}

impl Iterator for Solutions {
    type Item = Configuration;

    fn next(&mut self) -> Option<Configuration> {
        let n = self.values.len();
        loop {
            if self.exhausted {
                return None;
            }
            if self.depth == n {
                let config = Configuration::new(
                    self.values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| literal(i + 1, v.unwrap_or(false))),
                );
                if n == 0 {
                    self.exhausted = true;
                } else {
                    self.depth = n - 1;
                }
                return Some(config);
            }
            let d = self.depth;
            match self.tried[d] {
                0 => {
                    self.tried[d] = 1;
                    self.values[d] = Some(true);
                }
                1 => {
                    self.tried[d] = 2;
                    self.values[d] = Some(false);
                }
                _ => {
                    self.tried[d] = 0;
                    self.values[d] = None;
                    if d == 0 {
                        self.exhausted = true;
                    } else {
                        self.depth -= 1;
                    }
                    continue;
                }
            }
            if self.inner.consistent(&self.values) {
                self.depth += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
