use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while saving or loading point histories.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("sidecar json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sidecar {0} not found")]
    MissingSidecar(PathBuf),
    #[error("{0} not found (probably deleted)")]
    RemovedPoint(String),
    #[error("invalid stored timestamp {0:?}")]
    BadTimestamp(String),
    #[error("invalid resampling frequency {0:?}")]
    BadFrequency(String),
}
