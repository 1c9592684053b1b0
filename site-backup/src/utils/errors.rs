//! Error types for the backup engine.

use crate::models::backup_job::JobStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backup {0} has already completed")]
    AlreadyCompleted(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl BackupError {
    pub fn not_found(what: &str, id: &str) -> Self {
        BackupError::NotFound(format!("{} {}", what, id))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
