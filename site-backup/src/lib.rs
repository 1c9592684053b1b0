//! Site Backup Library
//!
//! Chunked, resumable backups of a WordPress site's files and SQLite
//! database, driven by short ticks.

pub mod config;
pub mod daemon;
pub mod db;
pub mod executor;
pub mod fs;
pub mod models;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{BackupError, Result};
