use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProdlineError {
    #[error("not initialized: run 'prodline init'")]
    NotInitialized,

    #[error("feature model not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("invalid feature model: {0}")]
    InvalidModel(String),

    #[error("cannot parse expression '{input}': {message}")]
    ParseExpression { input: String, message: String },

    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    #[error("unknown build kind: {0}")]
    UnknownBuildKind(String),

    #[error("unknown ordering policy: {0}")]
    UnknownOrderingPolicy(String),

    #[error("unknown sampling algorithm '{0}': expected one of chvatal, icpl, incling")]
    UnknownAlgorithm(String),

    #[error("invalid interaction strength {0}: must be between 1 and 4")]
    InvalidStrength(usize),

    #[error("invalid name '{0}': must be alphanumeric with '-', '_' or '.'")]
    InvalidName(String),

    #[error("configuration buffer is sealed")]
    BufferSealed,

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("composer error: {0}")]
    Composer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ProdlineError>;
