pub mod backup_job;
pub mod backup_record;
pub mod kv;

pub use backup_job::{BackupJob, BackupOptions, JobStatus};
pub use backup_record::{BackupListing, BackupRecord, Includes};
