//! File system selection for backups.

pub mod filter;
pub mod walker;

pub use filter::{should_skip_extension, should_skip_path, BACKUP_DIR_NAME};
