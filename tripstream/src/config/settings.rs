//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub timeline: TimelineSettings,
    pub fetch: FetchSettings,
    pub prefetch: PrefetchSettings,
    pub unit: UnitSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

/// Timeline layout.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSettings {
    /// Instant the animation window opens. When unset, callers supply one
    /// (the CLI uses the earliest trip in the store).
    pub window_start: Option<DateTime<Utc>>,
    /// Chunk duration in seconds.
    pub chunk_size_secs: u64,
    /// Batch duration in seconds; must be a multiple of the chunk size.
    pub batch_size_secs: u64,
    /// Trail visibility after a trip ends, in seconds.
    pub fade_secs: u64,
}

/// Store fetch behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Prefetch and eviction.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchSettings {
    /// Fraction of a batch after which the next batch is prefetched.
    pub threshold: f64,
    /// Chunks resolved before playback starts.
    pub initial_chunks: u64,
    /// Loaded batches kept behind playback; `None` keeps everything.
    pub retain_behind: Option<u64>,
}

/// Processing unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSettings {
    pub ready_timeout_secs: u64,
    pub channel_capacity: usize,
}

/// Backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    /// JSON-lines trip file.
    pub path: Option<PathBuf>,
}

/// Logging.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Directory for log files.
    pub directory: PathBuf,
    /// Log file name inside `directory`.
    pub file: String,
}
