//! Error types for the batch cache.

use crate::window::{BatchId, ChunkIndex, WindowError};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`BatchCache`](super::BatchCache).
///
/// Cloneable so a single batch failure can be delivered to every waiter of
/// that batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    /// The store kept failing until the retry policy gave up.
    #[error("failed to fetch batch {batch} after {attempts} attempts: {message}")]
    Fetch {
        batch: BatchId,
        attempts: u32,
        message: String,
    },

    /// Non-fatal problem reported by the processing unit.
    #[error("processing error ({context}): {message}")]
    Processing { message: String, context: String },

    /// The processing unit stopped unexpectedly.
    #[error("processing unit crashed")]
    UnitCrashed,

    /// The processing unit thread could not be started.
    #[error("failed to start processing unit: {0}")]
    UnitStartup(String),

    /// The processing unit did not acknowledge init in time.
    #[error("processing unit not ready after {0:?}")]
    UnitNotReady(Duration),

    /// A request for this chunk is already outstanding.
    #[error("chunk {0} already has a pending request")]
    ChunkAlreadyPending(ChunkIndex),

    /// Chunk or batch index outside the representable timeline.
    #[error(transparent)]
    Window(#[from] WindowError),

    /// Configuration rejected before start.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// The cache was terminated.
    #[error("cache terminated")]
    Terminated,
}
