use super::{ConfigurationStream, SamplingStrategy};
use crate::configuration::{literal, Configuration};
use crate::error::{ProdlineError, Result};
use crate::model::Formula;
use crate::types::BuildKind;
use std::sync::Arc;
use tracing::warn;

/// Integration check for one feature: the product with the feature selected
/// and the product with it deselected, everything else held as close to the
/// model defaults as the constraints allow.
pub struct Integration {
    formula: Arc<dyn Formula>,
    feature: String,
    var: usize,
    defaults: Vec<bool>,
}

impl Integration {
    pub fn new(formula: Arc<dyn Formula>, feature: &str, defaults: Vec<bool>) -> Result<Self> {
        let var = formula
            .variable(feature)
            .ok_or_else(|| ProdlineError::UnknownFeature(feature.to_string()))?;
        Ok(Self {
            formula,
            feature: feature.to_string(),
            var,
            defaults,
        })
    }

    fn variant(&self, selected: bool) -> Option<Configuration> {
        let defaults = &self.defaults;
        let config = self.formula.complete(&[literal(self.var, selected)], &|v| {
            defaults.get(v - 1).copied().unwrap_or(false)
        });
        if config.is_none() {
            warn!(
                feature = %self.feature,
                selected,
                "no valid configuration with this feature polarity"
            );
        }
        config
    }
}

impl SamplingStrategy for Integration {
    fn kind(&self) -> BuildKind {
        BuildKind::Integration
    }

    fn expected_count(&self) -> Option<usize> {
        Some(2)
    }

    fn configurations(self: Box<Self>) -> Result<ConfigurationStream> {
        let variants: Vec<Configuration> = [true, false]
            .into_iter()
            .filter_map(|selected| self.variant(selected))
            .collect();
        Ok(Box::new(variants.into_iter()))
    }
}
