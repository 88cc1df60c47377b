//! Feature model definition and the formula interface the pipeline samples from.
//!
//! The pipeline never decides satisfiability itself; it talks to a
//! [`Formula`]. [`ModelFormula`] is the reference implementation built from a
//! YAML [`FeatureModel`].

pub mod expr;
pub mod solver;

pub use expr::Expr;
pub use solver::ModelFormula;

use crate::configuration::{Configuration, Literal};
use crate::error::{ProdlineError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ---------------------------------------------------------------------------
// Formula
// ---------------------------------------------------------------------------

/// Read-only view of a feature-model formula.
///
/// Implementations must be safe to share between the producer and all
/// workers for the lifetime of a job.
pub trait Formula: Send + Sync {
    /// Feature names; variable `v` is `variables()[v - 1]`.
    fn variables(&self) -> &[String];

    /// True when `config` assigns every variable and satisfies the model.
    fn is_valid(&self, config: &Configuration) -> bool;

    /// Find a full valid assignment containing every literal in
    /// `assumptions`. Free variables are tried with `preferred(var)` first.
    fn complete(
        &self,
        assumptions: &[Literal],
        preferred: &dyn Fn(usize) -> bool,
    ) -> Option<Configuration>;

    /// Lazily enumerate every valid configuration.
    fn solutions(&self) -> Box<dyn Iterator<Item = Configuration> + Send>;

    fn is_satisfiable(&self, assumptions: &[Literal]) -> bool {
        self.complete(assumptions, &|_| false).is_some()
    }

    /// 1-based variable for a feature name.
    fn variable(&self, name: &str) -> Option<usize> {
        self.variables()
            .iter()
            .position(|v| v == name)
            .map(|i| i + 1)
    }
}

// ---------------------------------------------------------------------------
// FeatureModel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDef {
    pub name: String,
    /// Value used for this feature when an integration build holds
    /// everything else at its default.
    #[serde(default)]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureModel {
    pub name: String,
    pub features: Vec<FeatureDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
}

impl FeatureModel {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ProdlineError::ModelNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        let model: FeatureModel = serde_yaml::from_str(&data)?;
        model.validate()?;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Names must be unique and path-safe; constraints must parse.
    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(ProdlineError::InvalidModel(
                "model declares no features".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for feature in &self.features {
            paths::validate_name(&feature.name)?;
            if !seen.insert(feature.name.as_str()) {
                return Err(ProdlineError::InvalidModel(format!(
                    "duplicate feature '{}'",
                    feature.name
                )));
            }
        }
        self.parse_constraints().map(|_| ())
    }

    pub fn variables(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    pub fn parse_constraints(&self) -> Result<Vec<Expr>> {
        self.constraints
            .iter()
            .map(|c| {
                Expr::parse(c, |name| {
                    self.features
                        .iter()
                        .position(|f| f.name == name)
                        .map(|i| i + 1)
                })
            })
            .collect()
    }

    /// Default value for every variable, indexed by `var - 1`.
    pub fn defaults(&self) -> Vec<bool> {
        self.features.iter().map(|f| f.default).collect()
    }

    pub fn formula(&self) -> Result<ModelFormula> {
        ModelFormula::new(self)
    }

    /// Small model written by `prodline init`.
    pub fn example(name: impl Into<String>) -> Self {
        let feature = |name: &str, default: bool| FeatureDef {
            name: name.to_string(),
            default,
            description: None,
        };
        Self {
            name: name.into(),
            features: vec![
                feature("Base", true),
                feature("Logging", false),
                feature("Encryption", false),
                feature("Compression", false),
            ],
            constraints: vec!["Base".to_string(), "Encryption => Logging".to_string()],
        }
    }
}

/// Load the model configured for a project, falling back to the default path.
pub fn load_project_model(root: &Path, model_path: Option<&Path>) -> Result<FeatureModel> {
    let path = match model_path {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => root.join(p),
        None => paths::model_path(root),
    };
    FeatureModel::load(&path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
