use super::kv;
use crate::utils::format::format_bytes;
use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Key holding the completed-backup index.
pub const RECORDS_KEY: &str = "backup_records";

/// What a completed backup contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Includes {
    pub database: bool,
    pub uploads: bool,
    pub plugins: bool,
    pub themes: bool,
}

impl Includes {
    /// Derive the content flags from job options and the configured include dirs.
    ///
    /// A content directory counts as included when an include dir names it or
    /// contains it, e.g. `wp-content` covers uploads, plugins and themes.
    pub fn from_selection(include_database: bool, include_files: bool, include_dirs: &[PathBuf]) -> Self {
        let has_dir = |name: &str| {
            let content_dir = Path::new("wp-content").join(name);
            include_files
                && include_dirs.iter().any(|dir| {
                    let dir: PathBuf = dir
                        .components()
                        .filter(|c| !matches!(c, Component::CurDir))
                        .collect();
                    dir.file_name().is_some_and(|n| n == name) || content_dir.starts_with(&dir)
                })
        };
        Self {
            database: include_database,
            uploads: has_dir("uploads"),
            plugins: has_dir("plugins"),
            themes: has_dir("themes"),
        }
    }
}

/// Index entry for a completed backup. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub file_path: String,
    pub file_size: u64,
    pub timestamp: DateTime<Utc>,
    pub includes: Includes,
}

/// A record annotated at read time.
#[derive(Debug, Clone, Serialize)]
pub struct BackupListing {
    #[serde(flatten)]
    pub record: BackupRecord,
    pub file_exists: bool,
    pub size_human: String,
}

impl From<BackupRecord> for BackupListing {
    fn from(record: BackupRecord) -> Self {
        Self {
            file_exists: Path::new(&record.file_path).exists(),
            size_human: format_bytes(record.file_size),
            record,
        }
    }
}

pub fn find_all(conn: &Connection) -> Result<Vec<BackupRecord>> {
    match kv::get(conn, RECORDS_KEY)? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

pub fn store_all(conn: &Connection, records: &[BackupRecord]) -> Result<()> {
    let json = serde_json::to_string(records)?;
    kv::set(conn, RECORDS_KEY, &json)
}

/// Newest first; ties broken by id so paging is stable.
pub fn sort_newest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_includes_from_selection() {
        let dirs = vec![
            PathBuf::from("wp-content/uploads"),
            PathBuf::from("wp-content/themes"),
        ];
        let includes = Includes::from_selection(true, true, &dirs);
        assert_eq!(
            includes,
            Includes {
                database: true,
                uploads: true,
                plugins: false,
                themes: true,
            }
        );

        let db_only = Includes::from_selection(true, false, &dirs);
        assert!(db_only.database);
        assert!(!db_only.uploads && !db_only.themes);
    }

    #[test]
    fn test_includes_from_parent_dirs() {
        let everything = Includes {
            database: false,
            uploads: true,
            plugins: true,
            themes: true,
        };
        for parent in ["wp-content", "wp-content/", "./wp-content", "", "."] {
            let dirs = vec![PathBuf::from(parent)];
            assert_eq!(Includes::from_selection(false, true, &dirs), everything, "{:?}", parent);
        }

        let dirs = vec![PathBuf::from("wp-includes"), PathBuf::from("wp-content/uploads/2024")];
        assert_eq!(Includes::from_selection(false, true, &dirs), Includes::default());
    }

    #[test]
    fn test_listing_annotations() {
        let record = BackupRecord {
            id: "a".into(),
            file_path: "/nonexistent/backup.tar.zst".into(),
            file_size: 3 * 1024 * 1024,
            timestamp: Utc::now(),
            includes: Includes::default(),
        };
        let listing = BackupListing::from(record);
        assert!(!listing.file_exists);
        assert_eq!(listing.size_human, "3.00 MB");

        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["id"], "a");
        assert_eq!(json["file_exists"], false);
    }
}
