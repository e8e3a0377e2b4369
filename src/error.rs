//! Error types for NavCity metrics

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading, computing, or correcting statistics
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Missing file: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Unknown destination: {0:?}")]
    UnknownDestination(String),

    #[error("Correction target not found: {0}")]
    CorrectionTargetNotFound(String),

    #[error("Unknown statistics field: {0}")]
    UnknownField(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}
