use super::{ConfigurationStream, SamplingStrategy};
use crate::configuration::Configuration;
use crate::error::Result;
use crate::model::Formula;
use crate::paths::CONFIG_EXTENSION;
use crate::types::BuildKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Builds the configurations the user has authored as `.config` files.
///
/// Files are read in name order when the sequence is consumed. Files that
/// fail to parse or describe an invalid selection are skipped with a warning.
pub struct CurrentSelection {
    formula: Arc<dyn Formula>,
    files: Vec<PathBuf>,
}

impl CurrentSelection {
    pub fn new(formula: Arc<dyn Formula>, configs_dir: &Path) -> Result<Self> {
        Ok(Self {
            formula,
            files: list_config_files(configs_dir)?,
        })
    }
}

/// `.config` files directly inside `dir`, sorted by file name. A missing
/// folder has no files.
pub fn list_config_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == CONFIG_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl SamplingStrategy for CurrentSelection {
    fn kind(&self) -> BuildKind {
        BuildKind::AllCurrent
    }

    fn expected_count(&self) -> Option<usize> {
        Some(self.files.len())
    }

    fn configurations(self: Box<Self>) -> Result<ConfigurationStream> {
        let formula = self.formula;
        Ok(Box::new(self.files.into_iter().filter_map(move |path| {
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot read configuration");
                    return None;
                }
            };
            let config = match Configuration::parse_config_text(formula.variables(), &text) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot parse configuration");
                    return None;
                }
            };
            if !formula.is_valid(&config) {
                warn!(path = %path.display(), "configuration violates the feature model");
                return None;
            }
            Some(config)
        })))
    }
}
