use crate::models::BackupOptions;
use crate::services::backup_manager::BackupManager;
use crate::{BackupError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

fn scheduler_error(e: JobSchedulerError) -> BackupError {
    BackupError::Scheduler(e.to_string())
}

/// Creates backups on a cron schedule while the daemon runs.
pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    manager: Arc<BackupManager>,
}

impl BackupScheduler {
    pub async fn new(manager: Arc<BackupManager>) -> Result<Self> {
        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            manager,
        })
    }

    pub async fn schedule_backups(&self, cron_expression: &str, options: BackupOptions) -> Result<()> {
        let manager = self.manager.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let manager = manager.clone();
            Box::pin(async move {
                let created = tokio::task::spawn_blocking(move || manager.create_backup(options)).await;
                match created {
                    Ok(Ok(created)) => {
                        tracing::info!(job_id = %created.job_id, "Scheduled backup queued")
                    }
                    Ok(Err(BackupError::Conflict(reason))) => {
                        tracing::warn!(reason = %reason, "Skipping scheduled backup: another backup is active")
                    }
                    Ok(Err(e)) => tracing::error!(error = %e, "Scheduled backup failed to start"),
                    Err(e) => tracing::error!(error = %e, "Scheduled backup task panicked"),
                }
            })
        })
        .map_err(scheduler_error)?;

        self.scheduler
            .lock()
            .await
            .add(job)
            .await
            .map_err(scheduler_error)?;
        tracing::info!(cron = %cron_expression, "Automatic backups scheduled");
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.lock().await.start().await.map_err(scheduler_error)?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler
            .lock()
            .await
            .shutdown()
            .await
            .map_err(scheduler_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupSettings;
    use crate::services::job_store::JobStore;
    use crate::services::tick_driver::QueuedTicks;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> Arc<BackupManager> {
        let root = dir.path();
        std::fs::create_dir_all(root.join("wp-content/uploads")).unwrap();
        let settings = BackupSettings::new(root, root.join("wp-content/site-backups"));
        let store = JobStore::open(&root.join("state.db")).unwrap();
        Arc::new(BackupManager::new(store, settings, Arc::new(QueuedTicks::new())))
    }

    fn files_only() -> BackupOptions {
        BackupOptions {
            include_database: false,
            include_files: true,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_cron_is_rejected() {
        let dir = TempDir::new().unwrap();
        let scheduler = BackupScheduler::new(manager(&dir)).await.unwrap();
        let result = scheduler.schedule_backups("not a cron", files_only()).await;
        assert!(matches!(result, Err(BackupError::Scheduler(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_firing_creates_one_backup() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let scheduler = BackupScheduler::new(manager.clone()).await.unwrap();
        scheduler
            .schedule_backups("* * * * * *", files_only())
            .await
            .unwrap();
        scheduler.start().await.unwrap();

        let mut active = None;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            active = manager.resume_active().unwrap();
            if active.is_some() {
                break;
            }
        }
        assert!(active.is_some());

        // Later firings hit the single-flight check and are skipped
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(manager.resume_active().unwrap(), active);
        scheduler.shutdown().await.unwrap();
    }
}
