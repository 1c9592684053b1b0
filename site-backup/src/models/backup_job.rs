use super::kv;
use crate::utils::format::percent;
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const JOB_KEY_PREFIX: &str = "backup_job_";

/// Errors shown by status snapshots; the job itself keeps them all.
pub const STATUS_ERROR_LIMIT: usize = 10;

// ── JobStatus ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Pending and processing jobs hold the single-flight slot.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── BackupOptions ──

/// What a job backs up. Frozen at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOptions {
    pub include_database: bool,
    pub include_files: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            include_database: true,
            include_files: true,
        }
    }
}

// ── BackupJob ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: String,
    pub status: JobStatus,
    pub options: BackupOptions,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub files_indexed: bool,
    pub total_files: u64,
    pub processed_files: u64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub current_chunk: u64,
    pub chunks_total: u64,

    pub tables_indexed: bool,
    pub total_tables: u64,
    pub processed_tables: u64,

    /// Committed length of the staging tar, excluding the end-of-archive trailer
    pub archive_offset: u64,
    /// Committed length of the SQL dump
    pub dump_offset: u64,

    pub errors: Vec<String>,
    pub backup_path: Option<String>,
    pub backup_size: Option<u64>,
}

impl BackupJob {
    pub fn new(options: BackupOptions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            options,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            files_indexed: false,
            total_files: 0,
            processed_files: 0,
            total_bytes: 0,
            processed_bytes: 0,
            current_chunk: 0,
            chunks_total: 0,
            tables_indexed: false,
            total_tables: 0,
            processed_tables: 0,
            archive_offset: 0,
            dump_offset: 0,
            errors: Vec::new(),
            backup_path: None,
            backup_size: None,
        }
    }

    /// Move to `next`, stamping the matching timestamp the first time only.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BackupError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        match next {
            JobStatus::Processing => {
                self.started_at.get_or_insert(now);
            }
            JobStatus::Completed => {
                self.completed_at.get_or_insert(now);
            }
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// The most recent errors, oldest first.
    pub fn recent_errors(&self, limit: usize) -> &[String] {
        let start = self.errors.len().saturating_sub(limit);
        &self.errors[start..]
    }

    pub fn files_done(&self) -> bool {
        !self.options.include_files
            || (self.files_indexed && self.processed_files >= self.total_files)
    }

    pub fn database_done(&self) -> bool {
        !self.options.include_database
            || (self.tables_indexed && self.processed_tables >= self.total_tables)
    }

    pub fn work_done(&self) -> bool {
        self.files_done() && self.database_done()
    }

    /// 100 only once completed; otherwise the rounded file ratio, capped at 99.
    pub fn progress(&self) -> u8 {
        if self.status == JobStatus::Completed {
            return 100;
        }
        percent(self.processed_files, self.total_files).min(99)
    }
}

fn job_key(id: &str) -> String {
    format!("{}{}", JOB_KEY_PREFIX, id)
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<BackupJob>> {
    match kv::get(conn, &job_key(id))? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub fn save(conn: &Connection, job: &BackupJob) -> Result<()> {
    let json = serde_json::to_string(job)?;
    kv::set(conn, &job_key(&job.id), &json)
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    kv::delete(conn, &job_key(id))
}

pub fn find_all(conn: &Connection) -> Result<Vec<BackupJob>> {
    let mut jobs = Vec::new();
    for (key, json) in kv::find_by_prefix(conn, JOB_KEY_PREFIX)? {
        match serde_json::from_str::<BackupJob>(&json) {
            Ok(job) => jobs.push(job),
            Err(e) => tracing::warn!(key = %key, error = %e, "Skipping unreadable job record"),
        }
    }
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(jobs)
}

/// The job currently holding the single-flight slot, if any.
pub fn find_active(conn: &Connection) -> Result<Option<BackupJob>> {
    Ok(find_all(conn)?.into_iter().find(|job| job.status.is_active()))
}
