//! Tick scheduling.
//!
//! The backup manager never runs a job to completion itself; it asks a
//! [`TickScheduler`] for the next tick. The CLI uses an in-memory queue that
//! it drains synchronously, the daemon a channel consumed by [`TickDriver`].
//! The driver also polls the state database, so jobs created by another
//! process, or left without a tick after a failed one, still get driven.

use super::backup_manager::{BackupManager, TickOutcome};
use crate::Result;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Hook the manager uses to request the next tick of a job.
pub trait TickScheduler: Send + Sync {
    fn schedule_tick(&self, job_id: &str, delay: Duration);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── QueuedTicks ──

/// FIFO of pending ticks with at most one entry per job. Delays are ignored.
#[derive(Default)]
pub struct QueuedTicks {
    queue: Mutex<VecDeque<String>>,
}

impl QueuedTicks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<String> {
        lock(&self.queue).pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }
}

impl TickScheduler for QueuedTicks {
    fn schedule_tick(&self, job_id: &str, _delay: Duration) {
        let mut queue = lock(&self.queue);
        if !queue.iter().any(|queued| queued == job_id) {
            queue.push_back(job_id.to_string());
        }
    }
}

/// Run queued ticks until the queue is empty.
pub fn drain(manager: &BackupManager, queue: &QueuedTicks) -> Result<Vec<(String, TickOutcome)>> {
    let mut outcomes = Vec::new();
    while let Some(job_id) = queue.pop() {
        let outcome = manager.tick(&job_id)?;
        outcomes.push((job_id, outcome));
    }
    Ok(outcomes)
}

// ── ChannelTicks ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickRequest {
    pub job_id: String,
    pub delay: Duration,
}

/// Sends tick requests to a [`TickDriver`], dropping duplicates for a job
/// that already has one queued.
pub struct ChannelTicks {
    tx: mpsc::UnboundedSender<TickRequest>,
    pending: Arc<Mutex<HashSet<String>>>,
}

pub struct TickReceiver {
    rx: mpsc::UnboundedReceiver<TickRequest>,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl ChannelTicks {
    pub fn new() -> (Self, TickReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(HashSet::new()));
        (
            Self {
                tx,
                pending: pending.clone(),
            },
            TickReceiver { rx, pending },
        )
    }
}

impl TickScheduler for ChannelTicks {
    fn schedule_tick(&self, job_id: &str, delay: Duration) {
        let mut pending = lock(&self.pending);
        if !pending.insert(job_id.to_string()) {
            debug!(job_id, "Tick already queued");
            return;
        }
        let request = TickRequest {
            job_id: job_id.to_string(),
            delay,
        };
        if self.tx.send(request).is_err() {
            pending.remove(job_id);
            debug!(job_id, "Tick driver stopped, request dropped");
        }
    }
}

impl TickReceiver {
    pub async fn recv(&mut self) -> Option<TickRequest> {
        self.rx.recv().await
    }

    /// Allow new requests for `job_id`; called right before its tick runs.
    pub fn mark_started(&self, job_id: &str) {
        lock(&self.pending).remove(job_id);
    }
}

// ── TickDriver ──

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Runs tick requests one at a time until shut down.
pub struct TickDriver {
    manager: Arc<BackupManager>,
    rx: TickReceiver,
    shutdown: CancellationToken,
    poll_interval: Duration,
}

impl TickDriver {
    pub fn new(manager: Arc<BackupManager>, rx: TickReceiver, shutdown: CancellationToken) -> Self {
        Self {
            manager,
            rx,
            shutdown,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often to look for an active job nobody is ticking. Must be non-zero.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn run(mut self) {
        info!(poll_interval = ?self.poll_interval, "Tick driver started");
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let request = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = poll.tick() => {
                    self.poll_active().await;
                    continue;
                }
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            if !request.delay.is_zero() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(request.delay) => {}
                }
            }

            self.rx.mark_started(&request.job_id);
            let manager = self.manager.clone();
            let job_id = request.job_id.clone();
            // An in-flight tick always finishes, even during shutdown.
            match tokio::task::spawn_blocking(move || manager.tick(&job_id)).await {
                Ok(Ok(outcome)) => {
                    debug!(job_id = %request.job_id, outcome = ?outcome, "Tick finished")
                }
                Ok(Err(e)) => error!(job_id = %request.job_id, error = %e, "Tick failed"),
                Err(e) => error!(job_id = %request.job_id, error = %e, "Tick task panicked"),
            }
        }
        info!("Tick driver stopped");
    }

    /// Re-arm the active job, if any. Duplicate requests are dropped by the channel.
    async fn poll_active(&self) {
        let manager = self.manager.clone();
        match tokio::task::spawn_blocking(move || manager.resume_active()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(error = %e, "Failed to look for active backups"),
            Err(e) => error!(error = %e, "Active backup lookup panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupSettings;
    use crate::models::{BackupOptions, JobStatus};
    use crate::services::job_store::JobStore;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_queued_ticks_dedup() {
        let queue = QueuedTicks::new();
        queue.schedule_tick("a", Duration::ZERO);
        queue.schedule_tick("a", Duration::from_secs(1));
        queue.schedule_tick("b", Duration::ZERO);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().as_deref(), Some("a"));
        queue.schedule_tick("a", Duration::ZERO);
        assert_eq!(queue.pop().as_deref(), Some("b"));
        assert_eq!(queue.pop().as_deref(), Some("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_channel_ticks_dedup_until_started() {
        let (ticks, mut rx) = ChannelTicks::new();
        ticks.schedule_tick("job", Duration::ZERO);
        ticks.schedule_tick("job", Duration::ZERO);

        let request = rx.recv().await.unwrap();
        assert_eq!(request.job_id, "job");
        assert!(rx.rx.try_recv().is_err());

        rx.mark_started("job");
        ticks.schedule_tick("job", Duration::from_millis(5));
        let request = rx.recv().await.unwrap();
        assert_eq!(request.delay, Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_driver_runs_job_to_completion() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let uploads = root.join("wp-content/uploads");
        fs::create_dir_all(&uploads).unwrap();
        for i in 0..25 {
            fs::write(uploads.join(format!("{}.txt", i)), b"data").unwrap();
        }
        let mut settings = BackupSettings::new(root, root.join("wp-content/site-backups"));
        settings.limits.files_per_chunk = 10;
        settings.tick_interval = Duration::from_millis(1);

        let store = JobStore::open(&root.join("state.db")).unwrap();
        let (ticks, rx) = ChannelTicks::new();
        let manager = Arc::new(BackupManager::new(store, settings, Arc::new(ticks)));
        let shutdown = CancellationToken::new();
        let driver = tokio::spawn(TickDriver::new(manager.clone(), rx, shutdown.clone()).run());

        let created = manager
            .create_backup(BackupOptions {
                include_database: false,
                include_files: true,
            })
            .unwrap();

        let mut status = manager.get_backup_status(&created.job_id).unwrap();
        for _ in 0..500 {
            if status.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = manager.get_backup_status(&created.job_id).unwrap();
        }
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.processed_files, 25);
        assert_eq!(status.chunks_total, 3);
        assert_eq!(status.progress, 100);

        shutdown.cancel();
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn test_driver_picks_up_job_created_by_another_process() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let uploads = root.join("wp-content/uploads");
        fs::create_dir_all(&uploads).unwrap();
        for i in 0..5 {
            fs::write(uploads.join(format!("{}.txt", i)), b"data").unwrap();
        }
        let mut settings = BackupSettings::new(root, root.join("wp-content/site-backups"));
        settings.tick_interval = Duration::from_millis(1);
        let state_db = root.join("state.db");

        let (ticks, rx) = ChannelTicks::new();
        let daemon = Arc::new(BackupManager::new(
            JobStore::open(&state_db).unwrap(),
            settings.clone(),
            Arc::new(ticks),
        ));
        let shutdown = CancellationToken::new();
        let driver = tokio::spawn(
            TickDriver::new(daemon.clone(), rx, shutdown.clone())
                .with_poll_interval(Duration::from_millis(50))
                .run(),
        );

        // A one-shot command queues the job and exits without ticking it
        let job_id = {
            let cli = BackupManager::new(
                JobStore::open(&state_db).unwrap(),
                settings,
                Arc::new(QueuedTicks::new()),
            );
            cli.create_backup(BackupOptions {
                include_database: false,
                include_files: true,
            })
            .unwrap()
            .job_id
        };

        let mut status = daemon.get_backup_status(&job_id).unwrap();
        for _ in 0..500 {
            if status.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = daemon.get_backup_status(&job_id).unwrap();
        }
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.processed_files, 5);

        shutdown.cancel();
        driver.await.unwrap();
    }
}
