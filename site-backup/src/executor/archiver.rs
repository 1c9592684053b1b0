//! Chunked, resumable archive builder.
//!
//! Each invocation appends one bounded chunk of files to a staging tar and
//! returns. The tar is reopened on every call and truncated to the job's
//! committed offset first, which drops both the end-of-archive trailer the
//! previous call wrote on close and any half-written entry left by an
//! interrupted call. Only `seal` produces the final compressed archive.

use super::manifest::{Manifest, DATABASE_DUMP_FILENAME, MANIFEST_FILENAME};
use super::staging::{open_at_committed, StagingArea};
use crate::config::BackupSettings;
use crate::fs::walker::{collect_candidates, FileEntry};
use crate::models::BackupJob;
use crate::{BackupError, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};
use tracing::{debug, info, warn};

/// Outcome of one archiver invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkReport {
    /// Files taken from the list this call (archived or skipped)
    pub files: u64,
    /// Source bytes written this call
    pub bytes: u64,
    /// Files that could not be read and were recorded as errors
    pub skipped: u64,
    /// True once every enumerated file has been processed
    pub done: bool,
}

/// Final archive location and size.
#[derive(Debug, Clone)]
pub struct SealedArchive {
    pub path: PathBuf,
    pub size: u64,
}

enum Appended {
    Written(u64),
    Skipped(String),
}

pub struct ChunkedArchiver<'a> {
    settings: &'a BackupSettings,
}

impl<'a> ChunkedArchiver<'a> {
    pub fn new(settings: &'a BackupSettings) -> Self {
        Self { settings }
    }

    /// Process one chunk of the job's file list, enumerating it first if needed.
    pub fn process_chunk(&self, job: &mut BackupJob, staging: &StagingArea) -> Result<ChunkReport> {
        if !job.files_indexed {
            self.index(job, staging)?;
        }

        if job.processed_files >= job.total_files {
            return Ok(ChunkReport {
                done: true,
                ..Default::default()
            });
        }

        let files = staging.read_file_list()?;
        let limits = self.settings.limits;
        let start = job.processed_files as usize;

        let tar_path = staging.archive_path();
        let file = open_at_committed(&tar_path, job.archive_offset)
            .map_err(|e| BackupError::Archive(format!("Cannot open {}: {}", tar_path.display(), e)))?;
        let mut builder = Builder::new(file);

        let mut report = ChunkReport::default();
        for entry in files.iter().skip(start) {
            if report.files as usize >= limits.files_per_chunk {
                break;
            }
            if report.files > 0 && report.bytes + entry.size > limits.max_chunk_bytes {
                break;
            }

            report.files += 1;
            match append_file(&mut builder, &self.settings.site_root, entry)? {
                Appended::Written(size) => report.bytes += size,
                Appended::Skipped(reason) => {
                    warn!(job_id = %job.id, path = %entry.path, "{}", reason);
                    job.record_error(reason);
                    report.skipped += 1;
                }
            }
        }

        let committed = builder
            .get_mut()
            .stream_position()
            .map_err(|e| archive_write_error(&tar_path, e))?;
        let file = builder
            .into_inner()
            .map_err(|e| archive_write_error(&tar_path, e))?;
        file.sync_all().map_err(|e| archive_write_error(&tar_path, e))?;

        job.processed_files += report.files;
        job.processed_bytes += report.bytes;
        job.archive_offset = committed;
        job.current_chunk += 1;

        // A byte-capped chunk ends early; re-estimate the remaining chunk count.
        let remaining = job.total_files - job.processed_files;
        job.chunks_total = job.current_chunk + remaining.div_ceil(limits.files_per_chunk as u64);

        report.done = remaining == 0;
        debug!(
            job_id = %job.id,
            chunk = job.current_chunk,
            chunks_total = job.chunks_total,
            files = report.files,
            bytes = report.bytes,
            "Archived chunk"
        );
        Ok(report)
    }

    /// Enumerate the site once and persist the candidate list.
    fn index(&self, job: &mut BackupJob, staging: &StagingArea) -> Result<()> {
        let enumeration = collect_candidates(
            &self.settings.site_root,
            &self.settings.include_dirs,
            &self.settings.backup_dir,
        );
        let total_bytes = enumeration.total_bytes();
        for error in enumeration.errors {
            job.record_error(error);
        }
        staging.write_file_list(&enumeration.files)?;

        job.total_files = enumeration.files.len() as u64;
        job.total_bytes = total_bytes;
        job.chunks_total = job
            .total_files
            .div_ceil(self.settings.limits.files_per_chunk as u64);
        job.files_indexed = true;

        info!(
            job_id = %job.id,
            total_files = job.total_files,
            total_bytes,
            chunks_total = job.chunks_total,
            "Indexed site files"
        );
        Ok(())
    }

    /// Append the dump and manifest, close the tar and compress it into the backup directory.
    pub fn seal(&self, job: &BackupJob, staging: &StagingArea, manifest: &Manifest) -> Result<SealedArchive> {
        let tar_path = staging.archive_path();
        let file = open_at_committed(&tar_path, job.archive_offset)
            .map_err(|e| BackupError::Archive(format!("Cannot open {}: {}", tar_path.display(), e)))?;
        let mut builder = Builder::new(file);

        let dump_path = staging.dump_path();
        if job.options.include_database && dump_path.exists() {
            let source = File::open(&dump_path)?;
            let mut header = regular_header(job.dump_offset, manifest.created_at.timestamp());
            builder
                .append_data(&mut header, DATABASE_DUMP_FILENAME, source.take(job.dump_offset))
                .map_err(|e| archive_write_error(&tar_path, e))?;
        }

        let manifest_json = serde_json::to_vec_pretty(manifest)?;
        let mut header = regular_header(manifest_json.len() as u64, manifest.created_at.timestamp());
        builder
            .append_data(&mut header, MANIFEST_FILENAME, manifest_json.as_slice())
            .map_err(|e| archive_write_error(&tar_path, e))?;

        let file = builder
            .into_inner()
            .map_err(|e| archive_write_error(&tar_path, e))?;
        file.sync_all().map_err(|e| archive_write_error(&tar_path, e))?;
        drop(file);

        fs::create_dir_all(&self.settings.backup_dir)?;
        let final_path = self.settings.backup_dir.join(archive_file_name(job));
        let part_path = final_path.with_file_name(format!("{}.part", archive_file_name(job)));

        compress(&tar_path, &part_path, self.settings.compression_level).map_err(|e| {
            let _ = fs::remove_file(&part_path);
            BackupError::Archive(format!("Compression to {} failed: {}", part_path.display(), e))
        })?;
        fs::rename(&part_path, &final_path)?;

        let size = fs::metadata(&final_path)?.len();
        info!(job_id = %job.id, path = %final_path.display(), size, "Archive sealed");
        Ok(SealedArchive {
            path: final_path,
            size,
        })
    }
}

/// `backup-<YYYYmmdd-HHMMSS>-<id8>.tar.zst`
pub fn archive_file_name(job: &BackupJob) -> String {
    let short_id: String = job.id.chars().filter(|c| *c != '-').take(8).collect();
    format!(
        "backup-{}-{}.tar.zst",
        job.created_at.format("%Y%m%d-%H%M%S"),
        short_id
    )
}

/// Append one site file. Source-side failures are per-item; archive-side failures are fatal.
fn append_file(builder: &mut Builder<File>, site_root: &Path, entry: &FileEntry) -> Result<Appended> {
    let full_path = site_root.join(&entry.path);
    let source = match open_source(&full_path) {
        Ok(file) => file,
        Err(e) => return Ok(Appended::Skipped(format!("Cannot read {}: {}", entry.path, e))),
    };
    let metadata = match source.metadata() {
        Ok(metadata) => metadata,
        Err(e) => return Ok(Appended::Skipped(format!("Cannot stat {}: {}", entry.path, e))),
    };
    if !metadata.is_file() {
        return Ok(Appended::Skipped(format!(
            "{} is no longer a regular file",
            entry.path
        )));
    }

    let size = metadata.len();
    let mut header = Header::new_gnu();
    header.set_metadata(&metadata);
    header.set_size(size);
    append_entry(builder, &entry.path, &mut header, size, source)
}

/// Write one entry of exactly `size` bytes from `source`.
///
/// If reading `source` fails the partial entry is cut off the tar and the
/// file is skipped. Only failures writing the tar are returned as errors.
fn append_entry<R: Read>(
    builder: &mut Builder<File>,
    path: &str,
    header: &mut Header,
    size: u64,
    source: R,
) -> Result<Appended> {
    let append_error = |e: io::Error| BackupError::Archive(format!("Failed to append {}: {}", path, e));
    let start = builder.get_mut().stream_position().map_err(append_error)?;

    let mut source = SourceReader::new(source);
    // A file truncated mid-read is zero-padded instead of corrupting the tar.
    let data = (&mut source).take(size).chain(io::repeat(0)).take(size);
    let appended = builder.append_data(header, path, data);

    if let Some(e) = source.error.take() {
        let file = builder.get_mut();
        file.set_len(start)
            .and_then(|_| file.seek(SeekFrom::Start(start)))
            .map_err(append_error)?;
        return Ok(Appended::Skipped(format!("Cannot read {}: {}", path, e)));
    }
    appended.map_err(append_error)?;
    Ok(Appended::Written(size))
}

/// Keeps the read error of the wrapped source, so that after the tar builder
/// fails it is known which side failed.
struct SourceReader<R> {
    inner: R,
    error: Option<io::Error>,
}

impl<R> SourceReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, error: None }
    }
}

impl<R: Read> Read for SourceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Err(e) if e.kind() != io::ErrorKind::Interrupted => {
                let surfaced = io::Error::new(e.kind(), e.to_string());
                self.error = Some(e);
                Err(surfaced)
            }
            result => result,
        }
    }
}

/// Open a site file without following a symlink swapped in after enumeration.
/// O_NONBLOCK keeps a FIFO from blocking the open; it is rejected as non-regular afterwards.
#[cfg(unix)]
fn open_source(path: &Path) -> io::Result<File> {
    use nix::fcntl::OFlag;
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .read(true)
        .custom_flags((OFlag::O_NOFOLLOW | OFlag::O_NONBLOCK).bits())
        .open(path)
}

#[cfg(not(unix))]
fn open_source(path: &Path) -> io::Result<File> {
    let metadata = fs::symlink_metadata(path)?;
    if !metadata.file_type().is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    File::open(path)
}

fn regular_header(size: u64, mtime: i64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(mtime.max(0) as u64);
    header
}

fn compress(source: &Path, destination: &Path, level: i32) -> io::Result<()> {
    let reader = BufReader::new(File::open(source)?);
    let writer = File::create(destination)?;
    zstd::stream::copy_encode(reader, &writer, level)?;
    writer.sync_all()
}

fn archive_write_error(path: &Path, e: io::Error) -> BackupError {
    BackupError::Archive(format!("Write to {} failed: {}", path.display(), e))
}
