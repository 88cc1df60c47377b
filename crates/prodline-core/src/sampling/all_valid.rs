use super::{ConfigurationStream, SamplingStrategy};
use crate::error::Result;
use crate::model::Formula;
use crate::types::BuildKind;
use std::sync::Arc;

/// Every valid configuration, in solver order. The total is only known once
/// the enumeration finishes.
pub struct AllValid {
    formula: Arc<dyn Formula>,
}

impl AllValid {
    pub fn new(formula: Arc<dyn Formula>) -> Self {
        Self { formula }
    }
}

impl SamplingStrategy for AllValid {
    fn kind(&self) -> BuildKind {
        BuildKind::AllValid
    }

    fn configurations(self: Box<Self>) -> Result<ConfigurationStream> {
        Ok(self.formula.solutions())
    }
}
