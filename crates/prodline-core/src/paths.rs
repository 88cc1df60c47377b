use crate::error::{ProdlineError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const PRODLINE_DIR: &str = ".prodline";
pub const CONFIGS_DIR: &str = ".prodline/configs";

pub const CONFIG_FILE: &str = ".prodline/config.yaml";
pub const MODEL_FILE: &str = ".prodline/model.yaml";
pub const MARKERS_FILE: &str = ".prodline/markers.log";

/// Shared output folder when variants are not built as separate projects.
pub const PRODUCTS_DIR: &str = "products";
/// Scratch folder inside the products folder used by compiling composers.
pub const TEMP_BIN_DIR: &str = "bin-tmp";

pub const CONFIG_EXTENSION: &str = "config";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn prodline_dir(root: &Path) -> PathBuf {
    root.join(PRODLINE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn model_path(root: &Path) -> PathBuf {
    root.join(MODEL_FILE)
}

pub fn configs_dir(root: &Path) -> PathBuf {
    root.join(CONFIGS_DIR)
}

pub fn markers_path(root: &Path) -> PathBuf {
    root.join(MARKERS_FILE)
}

pub fn products_dir(root: &Path) -> PathBuf {
    root.join(PRODUCTS_DIR)
}

/// Zero-padded name used for a variant's output folder and config file.
pub fn variant_name(index: usize) -> String {
    format!("{index:05}")
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").unwrap())
}

/// Validate a project or feature name used to build file system paths.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 || name.contains("..") || !name_re().is_match(name) {
        return Err(ProdlineError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
