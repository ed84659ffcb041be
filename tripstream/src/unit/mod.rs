//! Processing unit: the context that turns raw batches into chunks.
//!
//! The unit runs on its own OS thread and is reachable only through
//! messages. It owns every raw trip it has been given and the chunk slices
//! derived from them; the orchestrator never reads that memory directly.
//!
//! ```text
//!   Orchestrator                         Processing unit (thread)
//!        │ ── Init ─────────────────────────► │
//!        │ ◄──────────────────────────── Ready │
//!        │ ── LoadBatch(batch, trips) ──────► │ slice into chunks
//!        │ ◄──────── BatchProcessed(batch, n) │
//!        │ ◄─────────── RequestBatch(batch+1) │ (trail crosses batch end)
//!        │ ── RequestChunk(chunk) ──────────► │
//!        │ ◄──── ChunkResponse(chunk, trips)  │
//!        │ ── ClearBatch(batch) ────────────► │ drop chunk range
//!        │ ◄─────────── Error(message, ctx)   │ non-fatal
//! ```

mod slicer;
mod worker;

pub use slicer::{slice_batch, SlicedBatch};
pub use worker::{spawn_unit, UnitHandle, UNIT_THREAD_NAME};

use crate::trip::Trip;
use crate::window::{BatchId, ChunkIndex, Timeline};
use std::sync::Arc;
use std::time::Duration;

/// Trips of one chunk, shared without copying.
pub type ChunkTrips = Arc<[Trip]>;

/// Returns an empty chunk result.
pub fn empty_chunk() -> ChunkTrips {
    Arc::from(Vec::<Trip>::new())
}

/// Messages sent to the processing unit.
#[derive(Debug)]
pub enum UnitRequest {
    /// One-time configuration; must precede every other message.
    Init { timeline: Timeline, fade: Duration },
    /// Hands ownership of a fetched batch to the unit.
    LoadBatch { batch: BatchId, trips: Vec<Trip> },
    /// Asks for the trips of one chunk.
    RequestChunk { chunk: ChunkIndex },
    /// Drops everything retained for a batch.
    ClearBatch { batch: BatchId },
}

impl UnitRequest {
    /// Short message name used in logs and error contexts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::LoadBatch { .. } => "load-batch",
            Self::RequestChunk { .. } => "request-chunk",
            Self::ClearBatch { .. } => "clear-batch",
        }
    }
}

/// Messages emitted by the processing unit.
#[derive(Debug, Clone)]
pub enum UnitEvent {
    /// Init handled; the unit accepts work.
    Ready,
    /// A batch was sliced and retained.
    BatchProcessed { batch: BatchId, trip_count: usize },
    /// Answer to [`UnitRequest::RequestChunk`].
    ChunkResponse { chunk: ChunkIndex, trips: ChunkTrips },
    /// The unit wants a batch it does not hold.
    RequestBatch { batch: BatchId },
    /// Non-fatal processing problem.
    Error { message: String, context: String },
}
