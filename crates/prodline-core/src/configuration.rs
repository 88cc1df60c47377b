//! Immutable feature selections.
//!
//! A [`Configuration`] is a set of signed literals over the model's variables.
//! Variable `v` (1-based, matching the order of the model's feature list) is
//! selected by literal `+v` and deselected by `-v`. Variables without a
//! literal are unset. Literals are kept sorted by variable so equality and
//! hashing are structural.

use crate::error::{ProdlineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Signed, non-zero variable reference.
pub type Literal = i32;

/// 1-based variable of a literal.
pub fn var_of(lit: Literal) -> usize {
    lit.unsigned_abs() as usize
}

/// Literal for `var` with the given polarity.
pub fn literal(var: usize, selected: bool) -> Literal {
    let v = var as Literal;
    if selected {
        v
    } else {
        -v
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    literals: Vec<Literal>,
}

impl Configuration {
    /// Build from arbitrary literals. Zero literals are dropped; when a
    /// variable appears twice the first occurrence wins.
    pub fn new(literals: impl IntoIterator<Item = Literal>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut literals: Vec<Literal> = literals
            .into_iter()
            .filter(|l| *l != 0 && seen.insert(var_of(*l)))
            .collect();
        literals.sort_by_key(|l| var_of(*l));
        Self { literals }
    }

    /// Full assignment: `values[i]` is the value of variable `i + 1`.
    pub fn from_values(values: &[bool]) -> Self {
        Self {
            literals: values
                .iter()
                .enumerate()
                .map(|(i, v)| literal(i + 1, *v))
                .collect(),
        }
    }

    /// Full assignment selecting exactly the named features.
    pub fn from_selection<S: AsRef<str>>(variables: &[String], selected: &[S]) -> Result<Self> {
        let index: HashMap<&str, usize> = variables
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let mut values = vec![false; variables.len()];
        for name in selected {
            let name = name.as_ref();
            let i = index
                .get(name)
                .ok_or_else(|| ProdlineError::UnknownFeature(name.to_string()))?;
            values[*i] = true;
        }
        Ok(Self::from_values(&values))
    }

    pub fn literals(&self) -> &[Literal] {
        &self.literals
    }

    /// Number of assigned variables.
    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    pub fn value(&self, var: usize) -> Option<bool> {
        self.literals
            .binary_search_by_key(&var, |l| var_of(*l))
            .ok()
            .map(|i| self.literals[i] > 0)
    }

    pub fn contains(&self, lit: Literal) -> bool {
        self.value(var_of(lit)) == Some(lit > 0)
    }

    /// True when every literal in `lits` is part of this configuration.
    pub fn covers(&self, lits: &[Literal]) -> bool {
        lits.iter().all(|l| self.contains(*l))
    }

    /// Selected variables in ascending order.
    pub fn selected(&self) -> impl Iterator<Item = usize> + '_ {
        self.literals.iter().filter(|l| **l > 0).map(|l| var_of(*l))
    }

    pub fn selected_names<'a>(&self, variables: &'a [String]) -> Vec<&'a str> {
        self.selected()
            .filter_map(|v| variables.get(v - 1).map(String::as_str))
            .collect()
    }

    /// Number of variables on which the two selections disagree. A variable
    /// assigned in only one of them counts as a difference.
    pub fn distance(&self, other: &Configuration) -> usize {
        let (mut i, mut j, mut diff) = (0, 0, 0);
        let (a, b) = (&self.literals, &other.literals);
        while i < a.len() && j < b.len() {
            let (va, vb) = (var_of(a[i]), var_of(b[j]));
            if va == vb {
                if a[i] != b[j] {
                    diff += 1;
                }
                i += 1;
                j += 1;
            } else if va < vb {
                diff += 1;
                i += 1;
            } else {
                diff += 1;
                j += 1;
            }
        }
        diff + (a.len() - i) + (b.len() - j)
    }

    /// Render in the `.config` format: one selected feature name per line.
    pub fn to_config_text(&self, variables: &[String]) -> String {
        let mut out = String::new();
        for name in self.selected_names(variables) {
            out.push_str(name);
            out.push('\n');
        }
        out
    }

    /// Parse the `.config` format. Blank lines and `#` comments are ignored;
    /// every feature not listed is deselected.
    pub fn parse_config_text(variables: &[String], text: &str) -> Result<Self> {
        let selected: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        Self::from_selection(variables, &selected)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
