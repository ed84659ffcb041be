//! Processing unit thread and its handle.
//!
//! The unit runs on a dedicated, named thread. Requests arrive on a bounded
//! channel read with `blocking_recv`; events leave on an unbounded channel so
//! the unit never blocks on the orchestrator. Closing the request channel
//! stops the thread. If the thread dies for any other reason its event sender
//! is dropped, which the orchestrator observes as a crash.

use super::slicer::slice_batch;
use super::{empty_chunk, ChunkTrips, UnitEvent, UnitRequest};
use crate::trip::Trip;
use crate::window::{BatchId, ChunkIndex, Timeline};
use chrono::TimeDelta;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Name of the processing unit thread.
pub const UNIT_THREAD_NAME: &str = "trip-slicer";

/// Spawns the processing unit thread.
///
/// Returns the request handle and the receiving side of the event channel.
///
/// # Errors
///
/// Returns an error if the OS refuses to create the thread.
pub fn spawn_unit(
    capacity: usize,
) -> io::Result<(UnitHandle, mpsc::UnboundedReceiver<UnitEvent>)> {
    let (request_tx, request_rx) = mpsc::channel(capacity.max(1));
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let thread = thread::Builder::new()
        .name(UNIT_THREAD_NAME.to_string())
        .spawn(move || ProcessingUnit::new(event_tx).run(request_rx))?;

    debug!(capacity, "Processing unit thread spawned");

    Ok((
        UnitHandle {
            requests: Some(request_tx),
            thread: Some(thread),
        },
        event_rx,
    ))
}

/// Sending side of the processing unit.
pub struct UnitHandle {
    requests: Option<mpsc::Sender<UnitRequest>>,
    thread: Option<JoinHandle<()>>,
}

impl UnitHandle {
    /// Wraps a request channel served by something other than the unit thread.
    #[cfg(test)]
    pub(crate) fn detached(requests: mpsc::Sender<UnitRequest>) -> Self {
        Self {
            requests: Some(requests),
            thread: None,
        }
    }

    /// Sends a request. Returns false if the unit is gone.
    pub async fn send(&self, request: UnitRequest) -> bool {
        match &self.requests {
            Some(tx) => tx.send(request).await.is_ok(),
            None => false,
        }
    }

    /// Closes the request channel and waits for the thread to exit.
    ///
    /// Calling this more than once is harmless.
    pub async fn stop(&mut self) {
        self.requests.take();

        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => debug!("Processing unit thread joined"),
                Ok(Err(_)) => warn!("Processing unit thread panicked"),
                Err(e) => warn!(error = %e, "Failed to join processing unit thread"),
            }
        }
    }
}

/// Settings received with `Init`.
#[derive(Clone, Copy)]
struct UnitSettings {
    timeline: Timeline,
    fade: TimeDelta,
}

/// State owned by the unit thread.
struct ProcessingUnit {
    settings: Option<UnitSettings>,
    chunks: HashMap<ChunkIndex, ChunkTrips>,
    held: BTreeSet<BatchId>,
    events: mpsc::UnboundedSender<UnitEvent>,
}

impl ProcessingUnit {
    fn new(events: mpsc::UnboundedSender<UnitEvent>) -> Self {
        Self {
            settings: None,
            chunks: HashMap::new(),
            held: BTreeSet::new(),
            events,
        }
    }

    fn run(mut self, mut requests: mpsc::Receiver<UnitRequest>) {
        while let Some(request) = requests.blocking_recv() {
            self.handle(request);
        }
        debug!(batches = self.held.len(), "Processing unit stopped");
    }

    fn handle(&mut self, request: UnitRequest) {
        if let UnitRequest::Init { timeline, fade } = request {
            self.init(timeline, fade);
            return;
        }

        let Some(UnitSettings { timeline, fade }) = self.settings else {
            self.report(
                format!("{} received before init", request.kind()),
                request.kind(),
            );
            return;
        };

        match request {
            UnitRequest::LoadBatch { batch, trips } => {
                self.load_batch(&timeline, fade, batch, trips)
            }
            UnitRequest::RequestChunk { chunk } => self.request_chunk(&timeline, chunk),
            UnitRequest::ClearBatch { batch } => self.clear_batch(&timeline, batch),
            UnitRequest::Init { .. } => {}
        }
    }

    fn init(&mut self, timeline: Timeline, fade: Duration) {
        if self.settings.is_some() {
            self.report("processing unit already initialised", "init");
            return;
        }

        let fade = TimeDelta::from_std(fade).unwrap_or(TimeDelta::MAX);
        self.settings = Some(UnitSettings { timeline, fade });
        info!(
            window_start = %timeline.window_start(),
            chunks_per_batch = timeline.chunks_per_batch(),
            "Processing unit ready"
        );
        self.emit(UnitEvent::Ready);
    }

    fn load_batch(&mut self, timeline: &Timeline, fade: TimeDelta, batch: BatchId, trips: Vec<Trip>) {
        if self.held.contains(&batch) {
            debug!(batch, "Reloading batch, dropping previous slices");
            self.clear_batch(timeline, batch);
        }

        let received = trips.len();
        let context = format!("load-batch {batch}");
        let sliced = match slice_batch(timeline, fade, batch, trips) {
            Ok(sliced) => sliced,
            Err(e) => {
                self.report(e.to_string(), context);
                self.held.insert(batch);
                self.emit(UnitEvent::BatchProcessed {
                    batch,
                    trip_count: 0,
                });
                return;
            }
        };

        if !sliced.malformed.is_empty() {
            self.report(
                format!(
                    "skipped {} trips ending before they start (first: {})",
                    sliced.malformed.len(),
                    sliced.malformed[0]
                ),
                context,
            );
        }

        let chunk_count = sliced.chunks.len();
        for (chunk, trips) in sliced.chunks {
            self.chunks.insert(chunk, Arc::from(trips));
        }
        self.held.insert(batch);

        debug!(
            batch,
            received,
            retained = sliced.retained,
            discarded = sliced.discarded,
            chunks = chunk_count,
            "Batch sliced"
        );

        self.emit(UnitEvent::BatchProcessed {
            batch,
            trip_count: sliced.retained,
        });

        if sliced.trail_exceeds_batch {
            if let Some(next) = batch.checked_add(1) {
                if !self.held.contains(&next) {
                    self.emit(UnitEvent::RequestBatch { batch: next });
                }
            }
        }
    }

    fn request_chunk(&mut self, timeline: &Timeline, chunk: ChunkIndex) {
        let batch = timeline.batch_of(chunk);
        let trips = if self.held.contains(&batch) {
            self.chunks.get(&chunk).cloned().unwrap_or_else(empty_chunk)
        } else {
            self.report(
                format!("chunk {chunk} requested but batch {batch} is not held"),
                "request-chunk",
            );
            empty_chunk()
        };

        self.emit(UnitEvent::ChunkResponse { chunk, trips });
    }

    fn clear_batch(&mut self, timeline: &Timeline, batch: BatchId) {
        if !self.held.remove(&batch) {
            debug!(batch, "Clear for batch not held, ignoring");
            return;
        }
        let before = self.chunks.len();
        for chunk in timeline.chunks_of(batch) {
            self.chunks.remove(&chunk);
        }
        debug!(batch, chunks = before - self.chunks.len(), "Batch cleared");
    }

    fn report(&self, message: impl Into<String>, context: impl Into<String>) {
        let message = message.into();
        let context = context.into();
        warn!(%message, %context, "Processing error");
        self.emit(UnitEvent::Error { message, context });
    }

    fn emit(&self, event: UnitEvent) {
        // Receiver gone means the orchestrator shut down; the request channel
        // closes right after and ends the loop.
        let _ = self.events.send(event);
    }
}
