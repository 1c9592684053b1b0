//! Restore a completed backup onto the live site.
//!
//! The archive is unpacked into a private staging directory and validated
//! before anything live is touched. Files are copied over the site root; the
//! SQL dump is replayed inside a single transaction.

use super::manifest::{Manifest, DATABASE_DUMP_FILENAME, MANIFEST_FILENAME};
use super::staging::StagingArea;
use crate::config::BackupSettings;
use crate::{BackupError, Result};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOptions {
    pub restore_database: bool,
    pub restore_files: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            restore_database: true,
            restore_files: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreStatus {
    Completed,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub backup_id: String,
    pub files_restored: u64,
    pub database_restored: bool,
    pub status: RestoreStatus,
    pub errors: Vec<String>,
}

/// Restore `archive` (the backup `backup_id`) according to `options`.
pub fn restore_archive(
    archive: &Path,
    backup_id: &str,
    settings: &BackupSettings,
    options: RestoreOptions,
) -> Result<RestoreReport> {
    if !options.restore_database && !options.restore_files {
        return Err(BackupError::Invalid(
            "nothing to restore: both database and files were excluded".into(),
        ));
    }
    if !archive.is_file() {
        return Err(BackupError::NotFound(format!(
            "archive file {}",
            archive.display()
        )));
    }

    let staging = StagingArea::new(&settings.staging_root(), &format!("restore-{}", backup_id));
    staging.remove()?;
    staging.ensure()?;

    let result = restore_from_staging(archive, backup_id, settings, options, &staging);
    if let Err(e) = staging.remove() {
        warn!(backup_id, error = %e, "Failed to remove restore staging directory");
    }
    result
}

fn restore_from_staging(
    archive: &Path,
    backup_id: &str,
    settings: &BackupSettings,
    options: RestoreOptions,
    staging: &StagingArea,
) -> Result<RestoreReport> {
    let mut report = RestoreReport {
        backup_id: backup_id.to_string(),
        files_restored: 0,
        database_restored: false,
        status: RestoreStatus::Completed,
        errors: Vec::new(),
    };

    unpack(archive, staging.dir(), &mut report.errors)?;
    let manifest = read_manifest(staging.dir())?;
    if manifest.job_id != backup_id {
        return Err(BackupError::Invalid(format!(
            "archive belongs to backup {}, not {}",
            manifest.job_id, backup_id
        )));
    }

    // Everything the database replay needs is checked before files are written.
    let dump_path = staging.dir().join(DATABASE_DUMP_FILENAME);
    let database = if options.restore_database {
        if !manifest.has_database() || !dump_path.is_file() {
            return Err(BackupError::Invalid(format!(
                "backup {} does not contain a database dump",
                backup_id
            )));
        }
        let db_path = settings.database.as_ref().ok_or_else(|| {
            BackupError::Invalid("no site database is configured".into())
        })?;
        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        Some(conn)
    } else {
        None
    };

    if options.restore_files {
        report.files_restored = copy_files(staging.dir(), &settings.site_root, &mut report.errors);
        info!(backup_id, files = report.files_restored, "Restored files");
    }

    if let Some(mut conn) = database {
        match replay_dump(&mut conn, &dump_path) {
            Ok(()) => {
                report.database_restored = true;
                info!(backup_id, "Restored database");
            }
            Err(e) if options.restore_files => {
                warn!(backup_id, error = %e, "Database restore failed, rolled back");
                report.errors.push(format!("Database restore failed: {}", e));
            }
            Err(e) => return Err(e),
        }
    }

    if !report.errors.is_empty() {
        report.status = RestoreStatus::Partial;
    }
    Ok(report)
}

fn unpack(archive: &Path, dest: &Path, errors: &mut Vec<String>) -> Result<()> {
    let read_error =
        |e: std::io::Error| BackupError::Archive(format!("Cannot read {}: {}", archive.display(), e));

    let decoder = zstd::stream::read::Decoder::new(File::open(archive)?).map_err(read_error)?;
    let mut tar = tar::Archive::new(decoder);
    for entry in tar.entries().map_err(read_error)? {
        let mut entry = entry.map_err(read_error)?;
        let path = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        // unpack_in refuses entries that would land outside `dest`
        if !entry.unpack_in(dest).map_err(read_error)? {
            warn!(path = %path, "Skipping archive entry outside the restore directory");
            errors.push(format!("Skipped unsafe archive entry {}", path));
        }
    }
    Ok(())
}

fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILENAME);
    let bytes = fs::read(&path)
        .map_err(|_| BackupError::Invalid("archive has no backup manifest".into()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| BackupError::Invalid(format!("backup manifest is unreadable: {}", e)))
}

/// Copy every extracted site file into place. Returns how many were copied.
fn copy_files(source_root: &Path, site_root: &Path, errors: &mut Vec<String>) -> u64 {
    let mut copied = 0;
    for entry in WalkDir::new(source_root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                errors.push(format!("Cannot read extracted files: {}", e));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source_root) else {
            continue;
        };
        if relative == Path::new(MANIFEST_FILENAME) || relative == Path::new(DATABASE_DUMP_FILENAME) {
            continue;
        }

        let target = site_root.join(relative);
        let copy = target
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::copy(entry.path(), &target));
        match copy {
            Ok(_) => copied += 1,
            Err(e) => errors.push(format!("Failed to restore {}: {}", relative.display(), e)),
        }
    }
    copied
}

/// Replay the dump in one transaction; any failure leaves the database untouched.
fn replay_dump(conn: &mut Connection, dump_path: &Path) -> Result<()> {
    let sql = fs::read_to_string(dump_path)?;
    conn.execute_batch("PRAGMA foreign_keys = OFF")?;
    let tx = conn.transaction()?;
    tx.execute_batch(&sql)?;
    tx.commit()?;
    Ok(())
}
