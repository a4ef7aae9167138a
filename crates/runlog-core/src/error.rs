//! Error types for runlog-core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunlogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credentials rejected, or the tracking service could not be reached
    /// while establishing the session.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Tracking service error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run {0} is not active")]
    RunNotActive(String),

    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    #[error("Parameter '{key}' already logged with value '{existing}', refusing '{new}'")]
    ParamConflict {
        key: String,
        existing: String,
        new: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl RunlogError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, RunlogError::Authentication(_))
    }
}

pub type Result<T> = std::result::Result<T, RunlogError>;
