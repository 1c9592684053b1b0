pub mod backup_manager;
pub mod backup_scheduler;
pub mod job_store;
pub mod tick_driver;

pub use backup_manager::{BackupManager, BackupStatus, CreatedBackup, TickOutcome};
pub use backup_scheduler::BackupScheduler;
pub use job_store::JobStore;
pub use tick_driver::{ChannelTicks, QueuedTicks, TickDriver, TickScheduler};
