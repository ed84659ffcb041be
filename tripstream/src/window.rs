//! Timeline partitioning into batches and chunks.
//!
//! The animation window opens at `window_start` and is cut into fixed-duration
//! batches (the unit fetched from the backing store) and smaller chunks (the
//! unit consumed by the animation loop). Every batch holds exactly
//! `chunks_per_batch` chunks, so translating between the two is integer
//! arithmetic.
//!
//! ```text
//! window_start
//! │
//! ├──────────── batch 0 ────────────┬──────────── batch 1 ───────────── ...
//! │ c0 │ c1 │ ... │ c(n-1)          │ cn │ c(n+1) │ ...
//! ```
//!
//! All sizes have millisecond resolution.

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::ops::Range;
use std::time::Duration;
use thiserror::Error;

/// Identifier of a batch (one page of the timeline).
pub type BatchId = u64;

/// Index of a chunk (one consumer-sized slice of the timeline).
pub type ChunkIndex = u64;

/// Errors raised when building or querying a [`Timeline`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    /// Chunk size rounds down to zero milliseconds.
    #[error("chunk size must be at least one millisecond")]
    ZeroChunkSize,

    /// Batch size is zero or not an exact multiple of the chunk size.
    #[error("batch size ({batch_ms} ms) must be a positive multiple of chunk size ({chunk_ms} ms)")]
    UnevenBatchSize { batch_ms: u64, chunk_ms: u64 },

    /// The requested offset cannot be represented as a calendar instant.
    #[error("offset of {offset_ms} ms is out of range for window starting at {window_start}")]
    OutOfRange {
        window_start: DateTime<Utc>,
        offset_ms: u64,
    },
}

/// Half-open calendar interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a new range.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Returns true if `instant` lies inside the range.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Returns the length of the range.
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}

/// Stateless translator between simulation offsets, chunks and batches.
///
/// Construction validates that the batch size divides evenly into chunks, so
/// every query afterwards is infallible except for calendar overflow.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use chrono::{TimeZone, Utc};
/// use tripstream::window::Timeline;
///
/// let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
/// let timeline = Timeline::new(start, Duration::from_secs(30), Duration::from_secs(3600))?;
///
/// assert_eq!(timeline.chunks_per_batch(), 120);
/// assert_eq!(timeline.batch_of(125), 1);
/// # Ok::<(), tripstream::window::WindowError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    window_start: DateTime<Utc>,
    chunk_ms: u64,
    batch_ms: u64,
    chunks_per_batch: u64,
}

impl Timeline {
    /// Creates a timeline opening at `window_start`.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::ZeroChunkSize`] if the chunk size is below one
    /// millisecond and [`WindowError::UnevenBatchSize`] if the batch size is
    /// not a positive multiple of the chunk size.
    pub fn new(
        window_start: DateTime<Utc>,
        chunk_size: Duration,
        batch_size: Duration,
    ) -> Result<Self, WindowError> {
        let chunk_ms = saturating_millis(chunk_size);
        let batch_ms = saturating_millis(batch_size);

        if chunk_ms == 0 {
            return Err(WindowError::ZeroChunkSize);
        }
        if batch_ms == 0 || batch_ms % chunk_ms != 0 {
            return Err(WindowError::UnevenBatchSize { batch_ms, chunk_ms });
        }

        Ok(Self {
            window_start,
            chunk_ms,
            batch_ms,
            chunks_per_batch: batch_ms / chunk_ms,
        })
    }

    /// Instant at which the animation window opens.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// Duration of one chunk.
    pub fn chunk_size(&self) -> Duration {
        Duration::from_millis(self.chunk_ms)
    }

    /// Duration of one batch.
    pub fn batch_size(&self) -> Duration {
        Duration::from_millis(self.batch_ms)
    }

    /// Number of chunks in every batch.
    pub fn chunks_per_batch(&self) -> u64 {
        self.chunks_per_batch
    }

    /// Batch containing `chunk`.
    #[inline]
    pub fn batch_of(&self, chunk: ChunkIndex) -> BatchId {
        chunk / self.chunks_per_batch
    }

    /// Zero-based position of `chunk` inside its batch.
    #[inline]
    pub fn position_in_batch(&self, chunk: ChunkIndex) -> u64 {
        chunk % self.chunks_per_batch
    }

    /// First chunk owned by `batch`.
    pub fn first_chunk(&self, batch: BatchId) -> ChunkIndex {
        batch.saturating_mul(self.chunks_per_batch)
    }

    /// Chunk indices owned by `batch`.
    pub fn chunks_of(&self, batch: BatchId) -> Range<ChunkIndex> {
        let first = self.first_chunk(batch);
        first..first.saturating_add(self.chunks_per_batch)
    }

    /// Chunk playing at simulation offset `offset` from the window start.
    pub fn chunk_at(&self, offset: Duration) -> ChunkIndex {
        saturating_millis(offset) / self.chunk_ms
    }

    /// Chunk containing a calendar instant, or `None` before the window opens.
    pub fn chunk_containing(&self, instant: DateTime<Utc>) -> Option<ChunkIndex> {
        if instant < self.window_start {
            return None;
        }
        let offset_ms = (instant - self.window_start).num_milliseconds();
        u64::try_from(offset_ms).ok().map(|ms| ms / self.chunk_ms)
    }

    /// Calendar range covered by `batch`.
    pub fn batch_range(&self, batch: BatchId) -> Result<TimeRange, WindowError> {
        self.range_of(batch, self.batch_ms)
    }

    /// Calendar range covered by `chunk`.
    pub fn chunk_range(&self, chunk: ChunkIndex) -> Result<TimeRange, WindowError> {
        self.range_of(chunk, self.chunk_ms)
    }

    /// Maps a simulation offset and span to an absolute calendar range.
    pub fn absolute_range(&self, offset: Duration, span: Duration) -> Result<TimeRange, WindowError> {
        let start_ms = saturating_millis(offset);
        let end_ms = start_ms.saturating_add(saturating_millis(span));
        Ok(TimeRange::new(
            self.instant_at(start_ms)?,
            self.instant_at(end_ms)?,
        ))
    }

    fn range_of(&self, index: u64, size_ms: u64) -> Result<TimeRange, WindowError> {
        let start_ms = index.checked_mul(size_ms).ok_or(self.out_of_range(u64::MAX))?;
        let end_ms = start_ms
            .checked_add(size_ms)
            .ok_or(self.out_of_range(u64::MAX))?;
        Ok(TimeRange::new(
            self.instant_at(start_ms)?,
            self.instant_at(end_ms)?,
        ))
    }

    fn instant_at(&self, offset_ms: u64) -> Result<DateTime<Utc>, WindowError> {
        i64::try_from(offset_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|delta| self.window_start.checked_add_signed(delta))
            .ok_or(self.out_of_range(offset_ms))
    }

    fn out_of_range(&self, offset_ms: u64) -> WindowError {
        WindowError::OutOfRange {
            window_start: self.window_start,
            offset_ms,
        }
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
