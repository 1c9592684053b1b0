//! Per-job working directory.
//!
//! Holds everything a job needs between ticks: the growing tar, the
//! enumerated file and table lists, and the SQL dump.

use crate::fs::walker::FileEntry;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(staging_root: &Path, job_id: &str) -> Self {
        Self {
            dir: staging_root.join(job_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn archive_path(&self) -> PathBuf {
        self.dir.join("archive.tar")
    }

    pub fn file_list_path(&self) -> PathBuf {
        self.dir.join("files.json")
    }

    pub fn table_list_path(&self) -> PathBuf {
        self.dir.join("tables.json")
    }

    pub fn dump_path(&self) -> PathBuf {
        self.dir.join("database.sql")
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Remove the whole staging directory. Missing is fine.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_file_list(&self, files: &[FileEntry]) -> Result<()> {
        write_json(&self.file_list_path(), files)
    }

    pub fn read_file_list(&self) -> Result<Vec<FileEntry>> {
        read_json(&self.file_list_path())
    }

    pub fn write_table_list(&self, tables: &[String]) -> Result<()> {
        write_json(&self.table_list_path(), tables)
    }

    pub fn read_table_list(&self) -> Result<Vec<String>> {
        read_json(&self.table_list_path())
    }

    /// Table names if the database was dumped, otherwise empty.
    pub fn tables_or_empty(&self) -> Result<Vec<String>> {
        if self.table_list_path().exists() {
            self.read_table_list()
        } else {
            Ok(Vec::new())
        }
    }
}

/// Open `path` for appending after truncating it to `committed` bytes.
///
/// Anything past the committed length belongs to an interrupted or failed
/// unit of work (or to a trailer written on close) and is discarded.
pub fn open_at_committed(path: &Path, committed: u64) -> Result<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.set_len(committed)?;
    file.seek(SeekFrom::Start(committed))?;
    Ok(file)
}

/// Write JSON via a temp file and rename so readers never see half a list.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_lists_round_trip_and_remove() -> Result<()> {
        let root = TempDir::new()?;
        let staging = StagingArea::new(root.path(), "job-1");
        staging.ensure()?;

        let files = vec![FileEntry {
            path: "wp-content/uploads/a.jpg".into(),
            size: 10,
        }];
        staging.write_file_list(&files)?;
        assert_eq!(staging.read_file_list()?, files);
        assert!(staging.tables_or_empty()?.is_empty());

        staging.remove()?;
        assert!(!staging.dir().exists());
        // Removing twice is harmless
        staging.remove()?;
        Ok(())
    }

    #[test]
    fn test_open_at_committed_discards_tail() -> Result<()> {
        let root = TempDir::new()?;
        let path = root.path().join("data.bin");
        fs::write(&path, b"committed-garbage")?;

        let mut file = open_at_committed(&path, 9)?;
        file.write_all(b"+more")?;
        drop(file);

        assert_eq!(fs::read(&path)?, b"committed+more");
        Ok(())
    }
}
