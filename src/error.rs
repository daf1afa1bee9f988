//! Error types for the progression engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProgressionError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Track not started: {0}")]
    TrackNotStarted(String),

    #[error("Module locked: {0}")]
    ModuleLocked(String),

    #[error("Prerequisites not met: {0}")]
    PrerequisitesNotMet(String),

    #[error("Alias conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
