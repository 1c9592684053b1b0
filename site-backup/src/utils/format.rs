//! Human-readable formatting helpers.

/// Format bytes as a binary-prefixed size string (1 KB = 1024 B).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Integer percentage of `done` over `total`, rounded half up. Zero when `total` is zero.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let done = done.min(total);
    ((done * 100 + total / 2) / total) as u8
}
