//! site-backup - command line entry point
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use site_backup::config::Config;
use site_backup::daemon::shutdown::ShutdownCoordinator;
use site_backup::executor::RestoreOptions;
use site_backup::models::BackupOptions;
use site_backup::services::{
    tick_driver, BackupManager, BackupScheduler, ChannelTicks, JobStore, QueuedTicks,
    TickDriver, TickOutcome, TickScheduler,
};
use site_backup::utils;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue a new backup
    Create {
        /// Leave the database out
        #[arg(long)]
        no_database: bool,
        /// Leave the site files out
        #[arg(long)]
        no_files: bool,
        /// Run the backup to completion before returning
        #[arg(long)]
        wait: bool,
    },
    /// Show the status of a backup job
    Status { job_id: String },
    /// Cancel a pending or running backup
    Cancel { job_id: String },
    /// List completed backups, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Delete a completed backup and its archive
    Delete { backup_id: String },
    /// Restore a completed backup over the live site
    Restore {
        backup_id: String,
        #[arg(long)]
        no_database: bool,
        #[arg(long)]
        no_files: bool,
    },
    /// Run one tick of the active backup (for an external cron)
    Tick {
        /// Keep ticking until the active backup finishes
        #[arg(long)]
        drain: bool,
    },
    /// Run ticks and scheduled backups until interrupted
    Daemon,
}

#[derive(Serialize)]
struct TickReport {
    job_id: Option<String>,
    outcome: Option<TickOutcome>,
    ticks: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    match args.command {
        Command::Daemon => run_daemon(config).await,
        command => run_command(config, command).await,
    }
}

/// Run blocking engine work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> site_backup::Result<T> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_manager(config: &Config, ticks: Arc<dyn TickScheduler>) -> Result<BackupManager> {
    let store = JobStore::open(&config.state_db())?;
    Ok(BackupManager::new(store, config.backup_settings(), ticks))
}

async fn run_command(config: Config, command: Command) -> Result<()> {
    let queue = Arc::new(QueuedTicks::new());
    let manager = Arc::new(open_manager(&config, queue.clone())?);

    match command {
        Command::Create {
            no_database,
            no_files,
            wait,
        } => {
            let options = BackupOptions {
                include_database: !no_database && config.site.database.is_some(),
                include_files: !no_files,
            };
            let created = blocking({
                let manager = manager.clone();
                move || manager.create_backup(options)
            })
            .await?;

            if wait {
                let job_id = created.job_id.clone();
                let status = blocking(move || {
                    tick_driver::drain(&manager, &queue)?;
                    manager.get_backup_status(&job_id)
                })
                .await?;
                print_json(&status)?;
            } else {
                print_json(&created)?;
            }
        }
        Command::Status { job_id } => {
            let status = blocking(move || manager.get_backup_status(&job_id)).await?;
            print_json(&status)?;
        }
        Command::Cancel { job_id } => {
            let status = blocking(move || manager.cancel_backup(&job_id)).await?;
            print_json(&status)?;
        }
        Command::List { limit, offset } => {
            let page = blocking(move || manager.list_backups(limit, offset)).await?;
            print_json(&page)?;
        }
        Command::Delete { backup_id } => {
            let deleted = blocking(move || manager.delete_backup(&backup_id)).await?;
            print_json(&deleted)?;
        }
        Command::Restore {
            backup_id,
            no_database,
            no_files,
        } => {
            let options = RestoreOptions {
                restore_database: !no_database,
                restore_files: !no_files,
            };
            let report = blocking(move || manager.restore_backup(&backup_id, options)).await?;
            print_json(&report)?;
        }
        Command::Tick { drain } => {
            let report = blocking(move || {
                let mut report = TickReport {
                    job_id: None,
                    outcome: None,
                    ticks: 0,
                };
                while let Some((job_id, outcome)) = manager.tick_active()? {
                    report.job_id = Some(job_id);
                    report.outcome = Some(outcome);
                    report.ticks += 1;
                    if !drain || outcome != TickOutcome::Rescheduled {
                        break;
                    }
                }
                Ok(report)
            })
            .await?;
            print_json(&report)?;
        }
        Command::Daemon => anyhow::bail!("daemon is not a one-shot command"),
    }
    Ok(())
}

async fn run_daemon(config: Config) -> Result<()> {
    tracing::info!(
        "Starting site-backup daemon v{} (site: {})",
        env!("CARGO_PKG_VERSION"),
        config.site.root.display()
    );

    let (ticks, rx) = ChannelTicks::new();
    let manager = Arc::new(open_manager(&config, Arc::new(ticks))?);

    let shutdown_coordinator = ShutdownCoordinator::new();
    let driver_handle = tokio::spawn(
        TickDriver::new(manager.clone(), rx, shutdown_coordinator.token())
            .with_poll_interval(Duration::from_secs(config.schedule.poll_interval_secs))
            .run(),
    );

    if let Some(job_id) = blocking({
        let manager = manager.clone();
        move || manager.resume_active()
    })
    .await?
    {
        tracing::info!(job_id = %job_id, "Resumed backup left active by a previous run");
    }

    let scheduler = match &config.schedule.cron {
        Some(cron) => {
            let include_database = config.schedule.include_database && config.site.database.is_some();
            if config.schedule.include_database && !include_database {
                tracing::warn!("Scheduled backups will skip the database: no site database is configured");
            }
            let options = BackupOptions {
                include_database,
                include_files: config.schedule.include_files,
            };
            let scheduler = BackupScheduler::new(manager.clone()).await?;
            scheduler.schedule_backups(cron, options).await?;
            scheduler.start().await?;
            Some(scheduler)
        }
        None => None,
    };

    shutdown_coordinator.wait_for_signal().await;

    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = %e, "Scheduler shutdown failed");
        }
    }

    // The driver stops after its in-flight tick
    match tokio::time::timeout(Duration::from_secs(30), driver_handle).await {
        Ok(Ok(())) => tracing::info!("Shutdown complete"),
        Ok(Err(e)) => tracing::error!("Tick driver panicked: {}", e),
        Err(_) => tracing::warn!("Tick driver did not stop in time, forcing exit"),
    }

    Ok(())
}
