//! Skip predicates consulted once per filesystem entry during enumeration.

/// Directory name of the backup storage area inside a site.
pub const BACKUP_DIR_NAME: &str = "site-backups";

/// Path segments that exclude an entry (and everything below it).
const SKIPPED_SEGMENTS: &[&str] = &[BACKUP_DIR_NAME, "cache"];

/// Extensions of prior backup artifacts and log noise.
const SKIPPED_EXTENSIONS: &[&str] = &["wpress", "log"];

/// Returns true if any segment of `path` is a skipped directory name.
///
/// Matching is per segment and ASCII case-insensitive, so `wp-content/CACHE/x`
/// is skipped while `wp-content/cached-data/x` is not.
pub fn should_skip_path(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        SKIPPED_SEGMENTS
            .iter()
            .any(|skipped| segment.eq_ignore_ascii_case(skipped))
    })
}

/// Returns true if the extension of `filename` is excluded from backups.
///
/// The extension is whatever follows the last dot of the final segment, so a
/// bare `.log` counts as a log file.
pub fn should_skip_extension(filename: &str) -> bool {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rsplit_once('.') {
        Some((_, ext)) => SKIPPED_EXTENSIONS
            .iter()
            .any(|skipped| ext.eq_ignore_ascii_case(skipped)),
        None => false,
    }
}
