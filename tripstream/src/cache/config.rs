//! Runtime configuration of the batch cache.

use super::CacheError;
use crate::config::{
    DEFAULT_COMMAND_CHANNEL_CAPACITY, DEFAULT_FADE_SECS, DEFAULT_INITIAL_CHUNKS,
    DEFAULT_PREFETCH_THRESHOLD, DEFAULT_UNIT_CHANNEL_CAPACITY, DEFAULT_UNIT_READY_TIMEOUT_SECS,
};
use crate::retry::RetryPolicy;
use crate::window::Timeline;
use std::time::Duration;

/// Configuration for [`BatchCache`](super::BatchCache).
///
/// Every field except the timeline has a default; use the `with_*` methods to
/// override them.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use chrono::{TimeZone, Utc};
/// use tripstream::cache::CacheConfig;
/// use tripstream::window::Timeline;
///
/// let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
/// let timeline = Timeline::new(start, Duration::from_secs(30), Duration::from_secs(3600))?;
/// let config = CacheConfig::new(timeline)
///     .with_prefetch_threshold(0.75)
///     .with_retain_behind(Some(2));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.prefetch_trigger(), 90);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Batch and chunk layout.
    pub timeline: Timeline,

    /// How long a finished trip stays visible.
    pub fade: Duration,

    /// Fetch retry policy.
    pub retry: RetryPolicy,

    /// Fraction of a batch after which the next batch is prefetched.
    /// Must be in `(0, 1]`; 1.0 never triggers.
    pub prefetch_threshold: f64,

    /// Chunks resolved by `start` before it returns.
    pub initial_chunks: u64,

    /// Loaded batches kept behind the playback batch. `None` disables
    /// automatic eviction.
    pub retain_behind: Option<u64>,

    /// How long `start` waits for the processing unit to become ready.
    pub unit_ready_timeout: Duration,

    /// Capacity of the request channel into the processing unit.
    pub unit_channel_capacity: usize,

    /// Capacity of the command channel into the orchestrator.
    pub command_channel_capacity: usize,
}

impl CacheConfig {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            fade: Duration::from_secs(DEFAULT_FADE_SECS),
            retry: RetryPolicy::default(),
            prefetch_threshold: DEFAULT_PREFETCH_THRESHOLD,
            initial_chunks: DEFAULT_INITIAL_CHUNKS,
            retain_behind: None,
            unit_ready_timeout: Duration::from_secs(DEFAULT_UNIT_READY_TIMEOUT_SECS),
            unit_channel_capacity: DEFAULT_UNIT_CHANNEL_CAPACITY,
            command_channel_capacity: DEFAULT_COMMAND_CHANNEL_CAPACITY,
        }
    }

    pub fn with_fade(mut self, fade: Duration) -> Self {
        self.fade = fade;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_prefetch_threshold(mut self, threshold: f64) -> Self {
        self.prefetch_threshold = threshold;
        self
    }

    pub fn with_initial_chunks(mut self, chunks: u64) -> Self {
        self.initial_chunks = chunks;
        self
    }

    pub fn with_retain_behind(mut self, batches: Option<u64>) -> Self {
        self.retain_behind = batches;
        self
    }

    pub fn with_unit_ready_timeout(mut self, timeout: Duration) -> Self {
        self.unit_ready_timeout = timeout;
        self
    }

    pub fn with_unit_channel_capacity(mut self, capacity: usize) -> Self {
        self.unit_channel_capacity = capacity;
        self
    }

    pub fn with_command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// Checks values that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<(), CacheError> {
        if !(self.prefetch_threshold > 0.0 && self.prefetch_threshold <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "prefetch threshold must be in (0, 1], got {}",
                self.prefetch_threshold
            )));
        }
        if self.unit_ready_timeout.is_zero() {
            return Err(CacheError::InvalidConfig(
                "unit ready timeout must be positive".to_string(),
            ));
        }
        if self.unit_channel_capacity == 0 || self.command_channel_capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "channel capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Position inside a batch at which the next batch is prefetched.
    ///
    /// Equal to `chunks_per_batch` when the threshold is 1.0, which no
    /// position reaches.
    pub fn prefetch_trigger(&self) -> u64 {
        let chunks = self.timeline.chunks_per_batch();
        let trigger = (self.prefetch_threshold * chunks as f64).ceil() as u64;
        trigger.min(chunks)
    }
}
