//! Manifest embedded in every archive.
//!
//! Describes what a backup contains so restore can validate an archive
//! before it touches the live site.

use crate::models::backup_record::Includes;
use crate::models::BackupJob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILENAME: &str = "backup-manifest.json";
pub const DATABASE_DUMP_FILENAME: &str = "database.sql";
pub const MANIFEST_VERSION: u32 = 1;

/// Backup manifest, serialized as `backup-manifest.json` at the archive root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub generator: String,
    pub includes: Includes,
    pub total_files: u64,
    pub processed_files: u64,
    pub total_bytes: u64,
    pub tables: Vec<String>,
    pub error_count: usize,
}

impl Manifest {
    pub fn for_job(job: &BackupJob, includes: Includes, tables: Vec<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            job_id: job.id.clone(),
            created_at: job.created_at,
            generator: format!("site-backup {}", env!("CARGO_PKG_VERSION")),
            includes,
            total_files: job.total_files,
            processed_files: job.processed_files,
            total_bytes: job.total_bytes,
            tables,
            error_count: job.errors.len(),
        }
    }

    pub fn has_database(&self) -> bool {
        self.includes.database
    }
}
