//! Backup orchestration.
//!
//! Drives each job through pending → processing → completed/failed/cancelled
//! across repeated short ticks. Every tick loads the job, does one bounded
//! unit of work (one archive chunk and/or one table), persists progress and
//! asks the tick scheduler for the next tick.

use super::job_store::JobStore;
use super::tick_driver::TickScheduler;
use crate::config::BackupSettings;
use crate::executor::{
    restore_archive, ChunkedArchiver, DatabaseDumper, Manifest, RestoreOptions, RestoreReport,
    StagingArea,
};
use crate::models::backup_job::STATUS_ERROR_LIMIT;
use crate::models::backup_record::sort_newest_first;
use crate::models::{BackupJob, BackupListing, BackupOptions, BackupRecord, Includes, JobStatus};
use crate::utils::format::format_bytes;
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TickOutcome {
    /// Job unknown or no longer active; nothing was done
    Stale,
    Rescheduled,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedBackup {
    pub job_id: String,
    pub status: JobStatus,
    pub total_files: u64,
    pub processed_files: u64,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct BackupStatus {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub options: BackupOptions,
    pub total_files: u64,
    pub processed_files: u64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub current_chunk: u64,
    pub chunks_total: u64,
    pub total_tables: u64,
    pub processed_tables: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
    pub size_human: Option<String>,
    /// The most recent errors only
    pub errors: Vec<String>,
    pub error_count: usize,
}

impl From<&BackupJob> for BackupStatus {
    fn from(job: &BackupJob) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress(),
            options: job.options,
            total_files: job.total_files,
            processed_files: job.processed_files,
            total_bytes: job.total_bytes,
            processed_bytes: job.processed_bytes,
            current_chunk: job.current_chunk,
            chunks_total: job.chunks_total,
            total_tables: job.total_tables,
            processed_tables: job.processed_tables,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            file_path: job.backup_path.clone(),
            file_size: job.backup_size,
            size_human: job.backup_size.map(format_bytes),
            errors: job.recent_errors(STATUS_ERROR_LIMIT).to_vec(),
            error_count: job.errors.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupPage {
    pub backups: Vec<BackupListing>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedBackup {
    pub backup_id: String,
    pub file_removed: bool,
}

pub struct BackupManager {
    store: JobStore,
    settings: BackupSettings,
    ticks: Arc<dyn TickScheduler>,
}

impl BackupManager {
    pub fn new(store: JobStore, settings: BackupSettings, ticks: Arc<dyn TickScheduler>) -> Self {
        Self {
            store,
            settings,
            ticks,
        }
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Queue a new backup. Returns immediately; the work happens in ticks.
    pub fn create_backup(&self, options: BackupOptions) -> Result<CreatedBackup> {
        if !options.include_database && !options.include_files {
            return Err(BackupError::Invalid(
                "a backup must include the database, the files, or both".into(),
            ));
        }
        if options.include_database && self.settings.database.is_none() {
            return Err(BackupError::Invalid(
                "database backup requested but no site database is configured".into(),
            ));
        }

        let job = self.store.create(options)?;
        info!(
            job_id = %job.id,
            include_database = options.include_database,
            include_files = options.include_files,
            "Backup queued"
        );
        self.ticks.schedule_tick(&job.id, Duration::ZERO);

        Ok(CreatedBackup {
            job_id: job.id.clone(),
            status: job.status,
            total_files: job.total_files,
            processed_files: job.processed_files,
            created_at: job.created_at,
        })
    }

    /// Advance a job by one unit of work.
    pub fn tick(&self, job_id: &str) -> Result<TickOutcome> {
        let mut job = match self.store.load(job_id) {
            Ok(job) => job,
            Err(BackupError::NotFound(_)) => {
                debug!(job_id, "Ignoring tick for unknown job");
                return Ok(TickOutcome::Stale);
            }
            Err(e) => return Err(e),
        };
        if !job.status.is_active() {
            debug!(job_id, status = %job.status, "Ignoring stale tick");
            return Ok(TickOutcome::Stale);
        }

        let staging = StagingArea::new(&self.settings.staging_root(), &job.id);
        if job.status == JobStatus::Pending {
            job.transition(JobStatus::Processing)?;
            info!(job_id, "Backup started");
        }

        match self.run_step(&mut job, &staging) {
            Ok(true) => self.finish(job, &staging),
            Ok(false) => {
                if !self.store.save_if_active(&job)? {
                    info!(job_id, "Backup was cancelled during tick");
                    self.discard_staging(&job.id, &staging);
                    return Ok(TickOutcome::Stale);
                }
                self.ticks.schedule_tick(&job.id, self.settings.tick_interval);
                Ok(TickOutcome::Rescheduled)
            }
            Err(e) => self.fail(job, &staging, e),
        }
    }

    /// Tick whichever job is active, if any.
    pub fn tick_active(&self) -> Result<Option<(String, TickOutcome)>> {
        match self.store.active_job()? {
            Some(job) => {
                let outcome = self.tick(&job.id)?;
                Ok(Some((job.id, outcome)))
            }
            None => Ok(None),
        }
    }

    /// Re-arm the tick of the active job, e.g. one left by a previous process
    /// or created by another one.
    pub fn resume_active(&self) -> Result<Option<String>> {
        let Some(job) = self.store.active_job()? else {
            return Ok(None);
        };
        debug!(job_id = %job.id, status = %job.status, "Re-arming active backup");
        self.ticks.schedule_tick(&job.id, Duration::ZERO);
        Ok(Some(job.id))
    }

    pub fn get_backup_status(&self, job_id: &str) -> Result<BackupStatus> {
        let job = self.store.load(job_id)?;
        Ok(BackupStatus::from(&job))
    }

    pub fn cancel_backup(&self, job_id: &str) -> Result<BackupStatus> {
        let mut cancelled_now = false;
        let job = self.store.update(job_id, |job| match job.status {
            JobStatus::Completed => Err(BackupError::AlreadyCompleted(job.id.clone())),
            JobStatus::Cancelled | JobStatus::Failed => Ok(()),
            JobStatus::Pending | JobStatus::Processing => {
                job.transition(JobStatus::Cancelled)?;
                cancelled_now = true;
                Ok(())
            }
        })?;

        if cancelled_now {
            info!(job_id, "Backup cancelled");
            let staging = StagingArea::new(&self.settings.staging_root(), &job.id);
            self.discard_staging(&job.id, &staging);
            if let Some(path) = &job.backup_path {
                remove_file_if_exists(Path::new(path)).ok();
            }
        }
        Ok(BackupStatus::from(&job))
    }

    pub fn list_backups(&self, limit: usize, offset: usize) -> Result<BackupPage> {
        let (backups, total) = self.store.list_records(limit, offset)?;
        Ok(BackupPage {
            backups,
            total,
            limit,
            offset,
        })
    }

    pub fn delete_backup(&self, backup_id: &str) -> Result<DeletedBackup> {
        let record = self
            .store
            .find_record(backup_id)?
            .ok_or_else(|| BackupError::not_found("backup", backup_id))?;

        let file_removed = remove_file_if_exists(Path::new(&record.file_path))?;
        self.store.remove_record(backup_id)?;
        self.store.delete(backup_id)?;

        info!(backup_id, path = %record.file_path, file_removed, "Backup deleted");
        Ok(DeletedBackup {
            backup_id: backup_id.to_string(),
            file_removed,
        })
    }

    pub fn restore_backup(&self, backup_id: &str, options: RestoreOptions) -> Result<RestoreReport> {
        let record = self
            .store
            .find_record(backup_id)?
            .ok_or_else(|| BackupError::not_found("backup", backup_id))?;
        if let Some(active) = self.store.active_job()? {
            return Err(BackupError::Conflict(format!(
                "backup {} is {}; restore is unavailable until it finishes",
                active.id, active.status
            )));
        }

        info!(backup_id, path = %record.file_path, "Restoring backup");
        let report = restore_archive(Path::new(&record.file_path), backup_id, &self.settings, options)?;
        info!(
            backup_id,
            status = ?report.status,
            files = report.files_restored,
            database = report.database_restored,
            "Restore finished"
        );
        Ok(report)
    }

    /// One archive chunk and one table. Returns true once all work is done.
    fn run_step(&self, job: &mut BackupJob, staging: &StagingArea) -> Result<bool> {
        staging.ensure()?;

        if job.options.include_files && !job.files_done() {
            ChunkedArchiver::new(&self.settings).process_chunk(job, staging)?;
        }
        if job.options.include_database && !job.database_done() {
            let database = self
                .settings
                .database
                .as_ref()
                .ok_or_else(|| BackupError::Config("no site database is configured".into()))?;
            DatabaseDumper::open(database)?.process_table(job, staging)?;
        }
        Ok(job.work_done())
    }

    fn finish(&self, mut job: BackupJob, staging: &StagingArea) -> Result<TickOutcome> {
        let includes = Includes::from_selection(
            job.options.include_database,
            job.options.include_files,
            &self.settings.include_dirs,
        );
        let tables = match staging.tables_or_empty() {
            Ok(tables) => tables,
            Err(e) => return self.fail(job, staging, e),
        };
        let manifest = Manifest::for_job(&job, includes, tables);
        let sealed = match ChunkedArchiver::new(&self.settings).seal(&job, staging, &manifest) {
            Ok(sealed) => sealed,
            Err(e) => return self.fail(job, staging, e),
        };

        let file_path = sealed.path.to_string_lossy().to_string();
        job.backup_path = Some(file_path.clone());
        job.backup_size = Some(sealed.size);
        job.transition(JobStatus::Completed)?;

        let record = BackupRecord {
            id: job.id.clone(),
            file_path,
            file_size: sealed.size,
            timestamp: job.created_at,
            includes,
        };
        if !self.store.complete(&job, record)? {
            info!(job_id = %job.id, "Backup was cancelled while sealing");
            remove_file_if_exists(&sealed.path).ok();
            self.discard_staging(&job.id, staging);
            return Ok(TickOutcome::Stale);
        }

        self.discard_staging(&job.id, staging);
        info!(
            job_id = %job.id,
            path = %sealed.path.display(),
            size = sealed.size,
            files = job.processed_files,
            tables = job.processed_tables,
            errors = job.errors.len(),
            "Backup completed"
        );
        self.apply_retention();
        Ok(TickOutcome::Completed)
    }

    fn fail(&self, mut job: BackupJob, staging: &StagingArea, cause: BackupError) -> Result<TickOutcome> {
        error!(job_id = %job.id, error = %cause, "Backup failed");
        job.record_error(cause.to_string());
        job.transition(JobStatus::Failed)?;
        if !self.store.save_if_active(&job)? {
            return Ok(TickOutcome::Stale);
        }
        self.discard_staging(&job.id, staging);
        Ok(TickOutcome::Failed)
    }

    fn discard_staging(&self, job_id: &str, staging: &StagingArea) {
        if let Err(e) = staging.remove() {
            warn!(job_id, error = %e, "Failed to remove staging directory");
        }
    }

    /// Delete completed backups beyond the configured limit, oldest first.
    fn apply_retention(&self) {
        let Some(max_backups) = self.settings.max_backups else {
            return;
        };
        let mut records = match self.store.records() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to read backup index for retention");
                return;
            }
        };
        if records.len() <= max_backups {
            return;
        }

        sort_newest_first(&mut records);
        for record in &records[max_backups..] {
            match self.delete_backup(&record.id) {
                Ok(_) => info!(backup_id = %record.id, max_backups, "Deleted backup beyond retention limit"),
                Err(e) => warn!(backup_id = %record.id, error = %e, "Failed to delete old backup"),
            }
        }
    }
}

/// Returns whether a file was removed. A missing file is not an error.
fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RestoreStatus;
    use crate::services::tick_driver::{drain, QueuedTicks};
    use rusqlite::Connection;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        root: PathBuf,
        queue: Arc<QueuedTicks>,
        manager: BackupManager,
    }

    fn harness_with(files: usize, with_database: bool, tweak: impl FnOnce(&mut BackupSettings)) -> Harness {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let uploads = root.join("wp-content/uploads");
        fs::create_dir_all(&uploads).unwrap();
        for i in 0..files {
            fs::write(uploads.join(format!("img-{:04}.jpg", i)), format!("image {}", i)).unwrap();
        }

        let mut settings = BackupSettings::new(&root, root.join("wp-content/site-backups"));
        settings.tick_interval = Duration::ZERO;
        if with_database {
            let db = root.join("wp-content/database/.ht.sqlite");
            fs::create_dir_all(db.parent().unwrap()).unwrap();
            Connection::open(&db)
                .unwrap()
                .execute_batch(
                    "CREATE TABLE wp_posts (id INTEGER PRIMARY KEY, title TEXT);
                     CREATE TABLE wp_users (id INTEGER PRIMARY KEY, login TEXT);
                     INSERT INTO wp_posts (title) VALUES ('Hello');
                     INSERT INTO wp_users (login) VALUES ('admin');",
                )
                .unwrap();
            settings.database = Some(db);
        }
        tweak(&mut settings);

        let store = JobStore::open(&root.join("state.db")).unwrap();
        let queue = Arc::new(QueuedTicks::new());
        let manager = BackupManager::new(store, settings, queue.clone());
        Harness {
            _dir: dir,
            root,
            queue,
            manager,
        }
    }

    fn harness(files: usize) -> Harness {
        harness_with(files, false, |_| {})
    }

    fn files_only() -> BackupOptions {
        BackupOptions {
            include_database: false,
            include_files: true,
        }
    }

    fn run_backup(h: &Harness, options: BackupOptions) -> String {
        let created = h.manager.create_backup(options).unwrap();
        drain(&h.manager, &h.queue).unwrap();
        created.job_id
    }

    #[test]
    fn test_end_to_end_three_chunks() {
        let h = harness(250);
        let created = h.manager.create_backup(files_only()).unwrap();
        assert_eq!(created.status, JobStatus::Pending);
        assert_eq!(created.total_files, 0);
        assert_eq!(h.queue.len(), 1);

        let mut outcomes = Vec::new();
        let mut processed = Vec::new();
        let mut progress = Vec::new();
        while let Some(job_id) = h.queue.pop() {
            outcomes.push(h.manager.tick(&job_id).unwrap());
            let status = h.manager.get_backup_status(&job_id).unwrap();
            processed.push(status.processed_files);
            progress.push(status.progress);
        }

        assert_eq!(
            outcomes,
            vec![
                TickOutcome::Rescheduled,
                TickOutcome::Rescheduled,
                TickOutcome::Completed
            ]
        );
        assert_eq!(processed, vec![100, 200, 250]);
        assert_eq!(progress, vec![40, 80, 100]);

        let status = h.manager.get_backup_status(&created.job_id).unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.total_files, 250);
        assert_eq!(status.chunks_total, 3);
        assert_eq!(status.current_chunk, 3);
        assert!(status.started_at.is_some());
        assert!(status.completed_at.is_some());
        let path = status.file_path.unwrap();
        assert!(Path::new(&path).exists());
        assert_eq!(status.file_size, Some(fs::metadata(&path).unwrap().len()));
        assert!(!h
            .manager
            .settings()
            .staging_root()
            .join(&created.job_id)
            .exists());

        let page = h.manager.list_backups(20, 0).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.backups[0].record.id, created.job_id);
        assert!(page.backups[0].file_exists);
        assert!(page.backups[0].record.includes.uploads);
        assert!(!page.backups[0].record.includes.database);
    }

    #[test]
    fn test_files_and_database() {
        let h = harness_with(5, true, |_| {});
        let job_id = run_backup(&h, BackupOptions::default());

        let status = h.manager.get_backup_status(&job_id).unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.total_tables, 2);
        assert_eq!(status.processed_tables, 2);
        assert_eq!(status.error_count, 0);

        let record = &h.manager.list_backups(1, 0).unwrap().backups[0].record;
        assert!(record.includes.database);
    }

    #[test]
    fn test_single_flight() {
        let h = harness(3);
        let first = h.manager.create_backup(files_only()).unwrap();
        assert!(matches!(
            h.manager.create_backup(files_only()),
            Err(BackupError::Conflict(_))
        ));

        drain(&h.manager, &h.queue).unwrap();
        assert_eq!(
            h.manager.get_backup_status(&first.job_id).unwrap().status,
            JobStatus::Completed
        );
        assert!(h.manager.create_backup(files_only()).is_ok());
    }

    #[test]
    fn test_create_rejects_empty_or_unconfigured_selection() {
        let h = harness(1);
        let nothing = BackupOptions {
            include_database: false,
            include_files: false,
        };
        assert!(matches!(
            h.manager.create_backup(nothing),
            Err(BackupError::Invalid(_))
        ));
        assert!(matches!(
            h.manager.create_backup(BackupOptions::default()),
            Err(BackupError::Invalid(_))
        ));
        assert!(h.queue.is_empty());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let h = harness(250);
        let created = h.manager.create_backup(files_only()).unwrap();
        let job_id = h.queue.pop().unwrap();
        assert_eq!(h.manager.tick(&job_id).unwrap(), TickOutcome::Rescheduled);
        assert!(h.manager.settings().staging_root().join(&job_id).exists());

        let status = h.manager.cancel_backup(&created.job_id).unwrap();
        assert_eq!(status.status, JobStatus::Cancelled);
        assert!(!h.manager.settings().staging_root().join(&job_id).exists());

        let again = h.manager.cancel_backup(&created.job_id).unwrap();
        assert_eq!(again.status, JobStatus::Cancelled);

        // The queued tick is now stale
        assert_eq!(
            drain(&h.manager, &h.queue).unwrap(),
            vec![(job_id.clone(), TickOutcome::Stale)]
        );
        let status = h.manager.get_backup_status(&job_id).unwrap();
        assert_eq!(status.processed_files, 100);
        assert!(status.file_path.is_none());
    }

    #[test]
    fn test_cancel_completed_and_unknown() {
        let h = harness(2);
        let job_id = run_backup(&h, files_only());
        assert!(matches!(
            h.manager.cancel_backup(&job_id),
            Err(BackupError::AlreadyCompleted(_))
        ));
        assert!(matches!(
            h.manager.cancel_backup("no-such-job"),
            Err(BackupError::NotFound(_))
        ));
    }

    #[test]
    fn test_tick_unknown_job_is_stale() {
        let h = harness(0);
        assert_eq!(h.manager.tick("nope").unwrap(), TickOutcome::Stale);
        assert!(h.manager.tick_active().unwrap().is_none());
    }

    #[test]
    fn test_fatal_error_fails_job() {
        let h = harness_with(2, true, |settings| {
            settings.database = Some(PathBuf::from("/nonexistent/site.db"));
        });
        let job_id = run_backup(&h, BackupOptions::default());

        let status = h.manager.get_backup_status(&job_id).unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.error_count, 1);
        assert!(status.completed_at.is_none());
        assert!(h.queue.is_empty());

        // Failed jobs free the slot and cancelling them is a no-op
        assert_eq!(
            h.manager.cancel_backup(&job_id).unwrap().status,
            JobStatus::Failed
        );
        assert!(h.manager.list_backups(10, 0).unwrap().backups.is_empty());
    }

    #[test]
    fn test_status_shows_last_ten_errors() {
        let h = harness(1);
        let created = h.manager.create_backup(files_only()).unwrap();
        h.manager
            .store
            .update(&created.job_id, |job| {
                for i in 0..20 {
                    job.record_error(format!("error {}", i));
                }
                Ok(())
            })
            .unwrap();

        let status = h.manager.get_backup_status(&created.job_id).unwrap();
        assert_eq!(status.error_count, 20);
        let expected: Vec<String> = (10..20).map(|i| format!("error {}", i)).collect();
        assert_eq!(status.errors, expected);
    }

    #[test]
    fn test_vanished_file_does_not_fail_job() {
        let h = harness(150);
        let created = h.manager.create_backup(files_only()).unwrap();
        let job_id = h.queue.pop().unwrap();
        h.manager.tick(&job_id).unwrap();

        fs::remove_file(h.root.join("wp-content/uploads/img-0120.jpg")).unwrap();
        drain(&h.manager, &h.queue).unwrap();

        let status = h.manager.get_backup_status(&created.job_id).unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.processed_files, 150);
        assert_eq!(status.error_count, 1);
        assert!(status.errors[0].contains("img-0120.jpg"));
    }

    #[test]
    fn test_list_newest_first() {
        let h = harness(1);
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(run_backup(&h, files_only()));
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let page = h.manager.list_backups(20, 0).unwrap();
        let listed: Vec<String> = page.backups.iter().map(|b| b.record.id.clone()).collect();
        ids.reverse();
        assert_eq!(listed, ids);
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_delete_twice() {
        let h = harness(2);
        let job_id = run_backup(&h, files_only());
        let path = h.manager.get_backup_status(&job_id).unwrap().file_path.unwrap();

        let deleted = h.manager.delete_backup(&job_id).unwrap();
        assert!(deleted.file_removed);
        assert!(!Path::new(&path).exists());
        assert!(matches!(
            h.manager.get_backup_status(&job_id),
            Err(BackupError::NotFound(_))
        ));
        assert!(matches!(
            h.manager.delete_backup(&job_id),
            Err(BackupError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_with_missing_file() {
        let h = harness(1);
        let job_id = run_backup(&h, files_only());
        let path = h.manager.get_backup_status(&job_id).unwrap().file_path.unwrap();
        fs::remove_file(&path).unwrap();

        assert!(!h.manager.list_backups(10, 0).unwrap().backups[0].file_exists);
        let deleted = h.manager.delete_backup(&job_id).unwrap();
        assert!(!deleted.file_removed);
    }

    #[test]
    fn test_retention_keeps_newest() {
        let h = harness_with(1, false, |settings| settings.max_backups = Some(2));
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(run_backup(&h, files_only()));
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let page = h.manager.list_backups(10, 0).unwrap();
        let listed: Vec<&str> = page.backups.iter().map(|b| b.record.id.as_str()).collect();
        assert_eq!(listed, vec![ids[2].as_str(), ids[1].as_str()]);
        assert!(matches!(
            h.manager.get_backup_status(&ids[0]),
            Err(BackupError::NotFound(_))
        ));
    }

    #[test]
    fn test_restore_round_trip() {
        let h = harness_with(2, true, |_| {});
        let job_id = run_backup(&h, BackupOptions::default());

        let image = h.root.join("wp-content/uploads/img-0001.jpg");
        fs::write(&image, b"defaced").unwrap();
        let db = h.manager.settings().database.clone().unwrap();
        Connection::open(&db)
            .unwrap()
            .execute_batch("DELETE FROM wp_posts")
            .unwrap();

        let report = h
            .manager
            .restore_backup(&job_id, RestoreOptions::default())
            .unwrap();
        assert_eq!(report.status, RestoreStatus::Completed);
        assert_eq!(report.files_restored, 2);
        assert!(report.database_restored);
        assert_eq!(fs::read(&image).unwrap(), b"image 1");
        let title: String = Connection::open(&db)
            .unwrap()
            .query_row("SELECT title FROM wp_posts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(title, "Hello");
    }

    #[test]
    fn test_restore_guards() {
        let h = harness(2);
        let job_id = run_backup(&h, files_only());

        assert!(matches!(
            h.manager.restore_backup("missing", RestoreOptions::default()),
            Err(BackupError::NotFound(_))
        ));
        assert!(matches!(
            h.manager.restore_backup(
                &job_id,
                RestoreOptions {
                    restore_database: false,
                    restore_files: false,
                }
            ),
            Err(BackupError::Invalid(_))
        ));

        h.manager.create_backup(files_only()).unwrap();
        assert!(matches!(
            h.manager.restore_backup(&job_id, RestoreOptions::default()),
            Err(BackupError::Conflict(_))
        ));
    }

    #[test]
    fn test_resume_and_tick_active() {
        let h = harness(150);
        let created = h.manager.create_backup(files_only()).unwrap();
        // Simulate a restart: the queued tick is lost
        h.queue.pop();

        assert_eq!(h.manager.resume_active().unwrap(), Some(created.job_id.clone()));
        assert_eq!(h.queue.pop(), Some(created.job_id.clone()));

        let (job_id, outcome) = h.manager.tick_active().unwrap().unwrap();
        assert_eq!(job_id, created.job_id);
        assert_eq!(outcome, TickOutcome::Rescheduled);
        let (_, outcome) = h.manager.tick_active().unwrap().unwrap();
        assert_eq!(outcome, TickOutcome::Completed);
        assert!(h.manager.resume_active().unwrap().is_none());
    }
}
