//! Configuration management for site-backup.
//!
//! Loads configuration from a TOML file, then applies environment variable
//! overrides (a `.env` file in the working directory is honoured).

use crate::fs::filter::BACKUP_DIR_NAME;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunk: ChunkConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Site document root
    #[serde(default = "default_site_root")]
    pub root: PathBuf,

    /// Directories (relative to the root) included in file backups
    #[serde(default = "default_include_dirs")]
    pub include_dirs: Vec<PathBuf>,

    /// SQLite site database; database backups are unavailable without it
    #[serde(default)]
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where finished archives and staging data live (default: <root>/wp-content/site-backups)
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    /// Job state database (default: <backup_dir>/backup-state.db)
    #[serde(default)]
    pub state_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum files archived per tick
    #[serde(default = "default_files_per_chunk")]
    pub files_per_chunk: usize,

    /// Maximum source bytes archived per tick
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: u64,

    /// Delay between ticks of the same job in daemon mode
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// zstd level (1-22)
    #[serde(default = "default_compression_level")]
    pub level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression (with seconds) for automatic backups in daemon mode
    #[serde(default)]
    pub cron: Option<String>,

    #[serde(default = "default_true")]
    pub include_database: bool,

    #[serde(default = "default_true")]
    pub include_files: bool,

    /// How often the daemon checks the state database for an active backup
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Keep at most this many completed backups
    #[serde(default)]
    pub max_backups: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_site_root() -> PathBuf {
    PathBuf::from("/var/www/html")
}

fn default_include_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("wp-content/uploads"),
        PathBuf::from("wp-content/plugins"),
        PathBuf::from("wp-content/themes"),
    ]
}

fn default_files_per_chunk() -> usize {
    100
}

fn default_max_chunk_bytes() -> u64 {
    64 * 1024 * 1024 // 64MB
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_compression_level() -> i32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            root: default_site_root(),
            include_dirs: default_include_dirs(),
            database: None,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            files_per_chunk: default_files_per_chunk(),
            max_chunk_bytes: default_max_chunk_bytes(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: default_compression_level(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: None,
            include_database: true,
            include_files: true,
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(root) = std::env::var("SITE_BACKUP_ROOT") {
            self.site.root = PathBuf::from(root);
        }
        if let Ok(dir) = std::env::var("SITE_BACKUP_DIR") {
            self.storage.backup_dir = Some(PathBuf::from(dir));
        }
        if let Ok(db) = std::env::var("SITE_BACKUP_DATABASE") {
            self.site.database = Some(PathBuf::from(db));
        }
        if let Some(files) = std::env::var("SITE_BACKUP_CHUNK_FILES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.chunk.files_per_chunk = files;
        }
        if let Ok(cron) = std::env::var("SITE_BACKUP_CRON") {
            self.schedule.cron = Some(cron);
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log.level = level;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.chunk.files_per_chunk == 0 {
            anyhow::bail!("chunk.files_per_chunk must be at least 1");
        }
        if self.chunk.max_chunk_bytes == 0 {
            anyhow::bail!("chunk.max_chunk_bytes must be at least 1");
        }
        if !(1..=22).contains(&self.compression.level) {
            anyhow::bail!("compression.level must be between 1 and 22");
        }
        if self.schedule.poll_interval_secs == 0 {
            anyhow::bail!("schedule.poll_interval_secs must be at least 1");
        }
        if self.retention.max_backups == Some(0) {
            anyhow::bail!("retention.max_backups must be at least 1 when set");
        }
        Ok(())
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.storage
            .backup_dir
            .clone()
            .unwrap_or_else(|| self.site.root.join("wp-content").join(BACKUP_DIR_NAME))
    }

    pub fn state_db(&self) -> PathBuf {
        self.storage
            .state_db
            .clone()
            .unwrap_or_else(|| self.backup_dir().join("backup-state.db"))
    }

    /// Resolve the engine settings used by the backup manager
    pub fn backup_settings(&self) -> BackupSettings {
        BackupSettings {
            site_root: self.site.root.clone(),
            include_dirs: self.site.include_dirs.clone(),
            database: self.site.database.clone(),
            backup_dir: self.backup_dir(),
            limits: ChunkLimits {
                files_per_chunk: self.chunk.files_per_chunk,
                max_chunk_bytes: self.chunk.max_chunk_bytes,
            },
            compression_level: self.compression.level,
            tick_interval: Duration::from_millis(self.chunk.tick_interval_ms),
            max_backups: self.retention.max_backups,
        }
    }
}

/// Per-tick work bounds for the archiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub files_per_chunk: usize,
    pub max_chunk_bytes: u64,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            files_per_chunk: default_files_per_chunk(),
            max_chunk_bytes: default_max_chunk_bytes(),
        }
    }
}

/// Resolved paths and limits for the backup engine.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub site_root: PathBuf,
    pub include_dirs: Vec<PathBuf>,
    pub database: Option<PathBuf>,
    pub backup_dir: PathBuf,
    pub limits: ChunkLimits,
    pub compression_level: i32,
    pub tick_interval: Duration,
    pub max_backups: Option<usize>,
}

impl BackupSettings {
    /// Settings with default include dirs and limits for a site root.
    pub fn new(site_root: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            site_root: site_root.into(),
            include_dirs: default_include_dirs(),
            database: None,
            backup_dir: backup_dir.into(),
            limits: ChunkLimits::default(),
            compression_level: default_compression_level(),
            tick_interval: Duration::from_millis(default_tick_interval_ms()),
            max_backups: None,
        }
    }

    pub fn staging_root(&self) -> PathBuf {
        self.backup_dir.join(".staging")
    }
}
