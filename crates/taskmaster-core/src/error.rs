//! Error types shared across the TaskMaster crates.
//!
//! Policy denials (rate limit, access, quota) are normal outcomes and are
//! never represented here.

use thiserror::Error;

/// Recoverable failures of the subsystem's collaborators and plumbing.
#[derive(Debug, Error)]
pub enum TaskmasterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Email transport error: {0}")]
    Transport(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskmasterError>;
