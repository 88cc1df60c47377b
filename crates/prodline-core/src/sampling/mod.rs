//! Sampling strategies.
//!
//! Each strategy turns a [`Formula`] into a lazy sequence of valid
//! configurations. The job runs that sequence on a background producer
//! thread and feeds it into the ordering buffer. Strategies are selected once
//! per job through [`strategy_for`]; an unknown algorithm or feature is an
//! error before anything starts.

pub mod all_valid;
pub mod current;
pub mod integration;
pub mod random;
pub mod twise;

pub use all_valid::AllValid;
pub use current::CurrentSelection;
pub use integration::Integration;
pub use random::RandomSampling;
pub use twise::{TWise, TWiseAlgorithm};

use crate::configuration::Configuration;
use crate::error::{ProdlineError, Result};
use crate::model::Formula;
use crate::types::BuildKind;
use std::path::PathBuf;
use std::sync::Arc;

/// Lazy sequence of configurations produced by a strategy.
pub type ConfigurationStream = Box<dyn Iterator<Item = Configuration> + Send>;

pub trait SamplingStrategy: Send {
    fn kind(&self) -> BuildKind;

    /// Number of configurations the strategy will emit, when known up front.
    fn expected_count(&self) -> Option<usize> {
        None
    }

    /// Consume the strategy and return its configuration sequence.
    fn configurations(self: Box<Self>) -> Result<ConfigurationStream>;
}

/// Strategy-specific inputs gathered from the job parameters.
#[derive(Debug, Clone, Default)]
pub struct SamplingSettings {
    /// Interaction strength for t-wise sampling.
    pub t: usize,
    /// T-wise algorithm name, resolved through [`TWiseAlgorithm`].
    pub algorithm: String,
    /// Feature under test for integration builds.
    pub feature: Option<String>,
    pub seed: Option<u64>,
    /// Default value per variable (`var - 1`), used by integration builds.
    pub defaults: Vec<bool>,
    /// Folder holding user-authored `.config` files.
    pub configs_dir: PathBuf,
}

/// Resolve the strategy for `kind`.
pub fn strategy_for(
    kind: BuildKind,
    settings: &SamplingSettings,
    formula: Arc<dyn Formula>,
) -> Result<Box<dyn SamplingStrategy>> {
    let strategy: Box<dyn SamplingStrategy> = match kind {
        BuildKind::AllValid => Box::new(AllValid::new(formula)),
        BuildKind::AllCurrent => {
            Box::new(CurrentSelection::new(formula, &settings.configs_dir)?)
        }
        BuildKind::Random => Box::new(RandomSampling::new(formula, settings.seed)),
        BuildKind::TWise => {
            let algorithm: TWiseAlgorithm = settings.algorithm.parse()?;
            Box::new(TWise::new(formula, algorithm, settings.t, settings.seed)?)
        }
        BuildKind::Integration => {
            let feature = settings.feature.as_deref().ok_or_else(|| {
                ProdlineError::UnknownFeature("integration build needs a feature".to_string())
            })?;
            Box::new(Integration::new(formula, feature, settings.defaults.clone())?)
        }
    };
    Ok(strategy)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::model::{FeatureDef, FeatureModel, ModelFormula};

    pub fn formula(names: &[&str], constraints: &[&str]) -> ModelFormula {
        FeatureModel {
            name: "test".to_string(),
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
        .formula()
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::formula;
    use super::*;

    fn settings() -> SamplingSettings {
        SamplingSettings {
            t: 2,
            algorithm: "chvatal".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn dispatch_matches_kind() {
        let f: Arc<dyn Formula> = Arc::new(formula(&["A", "B"], &[]));
        for kind in [BuildKind::AllValid, BuildKind::Random, BuildKind::TWise] {
            let s = strategy_for(kind, &settings(), Arc::clone(&f)).unwrap();
            assert_eq!(s.kind(), kind);
        }
    }

    #[test]
    fn unknown_algorithm_fails_before_sampling() {
        let f: Arc<dyn Formula> = Arc::new(formula(&["A", "B"], &[]));
        let mut s = settings();
        s.algorithm = "casa".to_string();
        let err = strategy_for(BuildKind::TWise, &s, f).err().unwrap();
        assert!(matches!(err, ProdlineError::UnknownAlgorithm(name) if name == "casa"));
    }

    #[test]
    fn integration_without_feature_fails() {
        let f: Arc<dyn Formula> = Arc::new(formula(&["A"], &[]));
        assert!(strategy_for(BuildKind::Integration, &settings(), f).is_err());
    }
}
