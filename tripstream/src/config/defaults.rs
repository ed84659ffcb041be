//! Default values for all configuration settings.
//!
//! Contains the `DEFAULT_*` constants and the `ConfigFile::default()`
//! implementation.

use super::file::config_directory;
use super::settings::*;
use crate::logging::DEFAULT_LOG_FILE;

// =============================================================================
// Timeline
// =============================================================================

/// Chunk duration in seconds.
pub const DEFAULT_CHUNK_SIZE_SECS: u64 = 30;

/// Batch duration in seconds (one hour).
pub const DEFAULT_BATCH_SIZE_SECS: u64 = 3600;

/// How long a finished trip's trail stays visible, in seconds.
pub const DEFAULT_FADE_SECS: u64 = 60;

// =============================================================================
// Fetch
// =============================================================================

/// Attempts per batch fetch.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay between fetch attempts in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3000;

// =============================================================================
// Prefetch
// =============================================================================

/// Fraction of a batch after which the next batch is prefetched.
pub const DEFAULT_PREFETCH_THRESHOLD: f64 = 0.5;

/// Chunks resolved before playback starts.
pub const DEFAULT_INITIAL_CHUNKS: u64 = 3;

// =============================================================================
// Processing unit and channels
// =============================================================================

/// Seconds to wait for the processing unit to acknowledge init.
pub const DEFAULT_UNIT_READY_TIMEOUT_SECS: u64 = 10;

/// Request channel capacity into the processing unit.
pub const DEFAULT_UNIT_CHANNEL_CAPACITY: usize = 64;

/// Command channel capacity into the orchestrator.
pub const DEFAULT_COMMAND_CHANNEL_CAPACITY: usize = 256;

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            timeline: TimelineSettings {
                window_start: None,
                chunk_size_secs: DEFAULT_CHUNK_SIZE_SECS,
                batch_size_secs: DEFAULT_BATCH_SIZE_SECS,
                fade_secs: DEFAULT_FADE_SECS,
            },
            fetch: FetchSettings {
                max_retries: DEFAULT_MAX_RETRIES,
                retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            },
            prefetch: PrefetchSettings {
                threshold: DEFAULT_PREFETCH_THRESHOLD,
                initial_chunks: DEFAULT_INITIAL_CHUNKS,
                retain_behind: None,
            },
            unit: UnitSettings {
                ready_timeout_secs: DEFAULT_UNIT_READY_TIMEOUT_SECS,
                channel_capacity: DEFAULT_UNIT_CHANNEL_CAPACITY,
            },
            store: StoreSettings { path: None },
            logging: LoggingSettings {
                directory: config_directory().join("logs"),
                file: DEFAULT_LOG_FILE.to_string(),
            },
        }
    }
}
