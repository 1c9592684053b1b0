//! Durable persistence of backup jobs and the completed-backup index.
//!
//! Every mutation runs inside an `IMMEDIATE` SQLite transaction, which takes
//! the database write lock up front. That turns the single-flight check at
//! job creation into a real critical section even when several processes
//! (a daemon and a CLI invocation, say) share one state database.

use crate::db::{create_pool, migrate::migrate, DbPool};
use crate::models::backup_job::{self, BackupJob, BackupOptions};
use crate::models::backup_record::{self, BackupListing, BackupRecord};
use crate::{BackupError, Result};
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;

#[derive(Clone)]
pub struct JobStore {
    pool: DbPool,
}

impl JobStore {
    /// Open (creating if needed) the state database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let pool = create_pool(path)?;
        migrate(&pool)?;
        Ok(Self { pool })
    }

    fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Create a pending job unless another job is pending or processing.
    pub fn create(&self, options: BackupOptions) -> Result<BackupJob> {
        self.write(|conn| {
            if let Some(active) = backup_job::find_active(conn)? {
                return Err(BackupError::Conflict(format!(
                    "backup {} is already {}",
                    active.id, active.status
                )));
            }
            let job = BackupJob::new(options);
            backup_job::save(conn, &job)?;
            Ok(job)
        })
    }

    pub fn load(&self, job_id: &str) -> Result<BackupJob> {
        let conn = self.pool.get()?;
        backup_job::find_by_id(&conn, job_id)?
            .ok_or_else(|| BackupError::not_found("backup job", job_id))
    }

    pub fn save(&self, job: &BackupJob) -> Result<()> {
        self.write(|conn| backup_job::save(conn, job))
    }

    /// Persist `job` only if the stored copy is still pending or processing.
    ///
    /// Returns false (and writes nothing) when the job was cancelled or
    /// otherwise finished since it was loaded.
    pub fn save_if_active(&self, job: &BackupJob) -> Result<bool> {
        self.write(|conn| {
            let active = backup_job::find_by_id(conn, &job.id)?
                .is_some_and(|stored| stored.status.is_active());
            if active {
                backup_job::save(conn, job)?;
            }
            Ok(active)
        })
    }

    /// Load, modify and save a job in one transaction. Nothing is written if `f` fails.
    pub fn update<F>(&self, job_id: &str, f: F) -> Result<BackupJob>
    where
        F: FnOnce(&mut BackupJob) -> Result<()>,
    {
        self.write(|conn| {
            let mut job = backup_job::find_by_id(conn, job_id)?
                .ok_or_else(|| BackupError::not_found("backup job", job_id))?;
            f(&mut job)?;
            backup_job::save(conn, &job)?;
            Ok(job)
        })
    }

    /// Save a completed job and append its record atomically.
    ///
    /// Returns false if the stored job is no longer active.
    pub fn complete(&self, job: &BackupJob, record: BackupRecord) -> Result<bool> {
        self.write(|conn| {
            let active = backup_job::find_by_id(conn, &job.id)?
                .is_some_and(|stored| stored.status.is_active());
            if !active {
                return Ok(false);
            }
            backup_job::save(conn, job)?;
            let mut records = backup_record::find_all(conn)?;
            records.retain(|r| r.id != record.id);
            records.push(record);
            backup_record::store_all(conn, &records)?;
            Ok(true)
        })
    }

    pub fn delete(&self, job_id: &str) -> Result<bool> {
        self.write(|conn| backup_job::delete(conn, job_id))
    }

    pub fn active_job(&self) -> Result<Option<BackupJob>> {
        let conn = self.pool.get()?;
        backup_job::find_active(&conn)
    }

    /// A page of completed backups, newest first, plus the total count.
    pub fn list_records(&self, limit: usize, offset: usize) -> Result<(Vec<BackupListing>, usize)> {
        let mut records = self.records()?;
        let total = records.len();
        backup_record::sort_newest_first(&mut records);
        let page = records
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(BackupListing::from)
            .collect();
        Ok((page, total))
    }

    /// Every record, in index order.
    pub fn records(&self) -> Result<Vec<BackupRecord>> {
        let conn = self.pool.get()?;
        backup_record::find_all(&conn)
    }

    pub fn find_record(&self, id: &str) -> Result<Option<BackupRecord>> {
        Ok(self.records()?.into_iter().find(|r| r.id == id))
    }

    pub fn append_record(&self, record: BackupRecord) -> Result<()> {
        self.write(|conn| {
            let mut records = backup_record::find_all(conn)?;
            records.retain(|r| r.id != record.id);
            records.push(record);
            backup_record::store_all(conn, &records)
        })
    }

    pub fn remove_record(&self, id: &str) -> Result<bool> {
        self.write(|conn| {
            let mut records = backup_record::find_all(conn)?;
            let before = records.len();
            records.retain(|r| r.id != id);
            if records.len() == before {
                return Ok(false);
            }
            backup_record::store_all(conn, &records)?;
            Ok(true)
        })
    }
}
