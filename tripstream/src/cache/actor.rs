//! Orchestrator task owning all batch lifecycle state.
//!
//! The actor is the single writer of the loaded and loading sets. It receives
//! commands from [`BatchCache`](super::BatchCache), events from the
//! processing unit and completions of fetch tasks, and multiplexes them in one
//! `select!` loop.
//!
//! # Batch lifecycle
//!
//! ```text
//!              ensure_batch             fetch ok            BatchProcessed
//! NotLoaded ───────────────► Fetching ───────────► Processing ─────────────► Loaded
//!     ▲                         │                                              │
//!     │      retries exhausted  │                                              │
//!     ├─────────────────────────┘                  clear / evict               │
//!     └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything that needs a batch becomes a [`Waiter`] on it. The first waiter
//! starts the fetch; later waiters join the same load.

use super::{CacheConfig, CacheError, CacheStats, ErrorSink};
use crate::retry::{RetryError, RetryPolicy};
use crate::store::TripStore;
use crate::trip::{merge_by_id, Trip};
use crate::unit::{empty_chunk, ChunkTrips, UnitEvent, UnitHandle, UnitRequest};
use crate::window::{BatchId, ChunkIndex, Timeline};
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) type ChunkReply = oneshot::Sender<Result<ChunkTrips, CacheError>>;
pub(crate) type LoadReply = oneshot::Sender<Result<(), CacheError>>;

type FetchOutcome = (BatchId, Result<Vec<Trip>, CacheError>);

// =============================================================================
// Messages
// =============================================================================

/// Commands sent by the handle.
pub(crate) enum Command {
    RequestChunk { chunk: ChunkIndex, reply: ChunkReply },
    LoadBatch { batch: BatchId, reply: LoadReply },
    Prefetch { batch: BatchId },
    ClearBatch { batch: BatchId },
    EvictBefore { batch: BatchId, reply: oneshot::Sender<usize> },
    IsLoaded { batch: BatchId, reply: oneshot::Sender<bool> },
    Stats { reply: oneshot::Sender<CacheStats> },
}

/// Something waiting for a batch to finish loading.
enum Waiter {
    /// A chunk request; forwarded to the unit once the batch is loaded.
    Chunk { chunk: ChunkIndex, reply: ChunkReply },
    /// An explicit load.
    Load { reply: LoadReply },
    /// A prefetch; failures go to the error sink.
    Prefetch,
}

enum LoadPhase {
    Fetching,
    Processing,
}

struct BatchLoad {
    phase: LoadPhase,
    waiters: Vec<Waiter>,
}

// =============================================================================
// Actor
// =============================================================================

pub(crate) struct CacheActor<S: TripStore> {
    config: CacheConfig,
    store: Arc<S>,
    sink: Arc<dyn ErrorSink>,
    unit: UnitHandle,
    events: mpsc::UnboundedReceiver<UnitEvent>,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,

    loaded: BTreeSet<BatchId>,
    loading: HashMap<BatchId, BatchLoad>,
    pending_chunks: HashMap<ChunkIndex, ChunkReply>,
    fetches: JoinSet<FetchOutcome>,
    /// Highest batch reached by a chunk request.
    playback_batch: BatchId,
    /// Trail requests from the unit that were too far ahead of playback.
    deferred_trails: BTreeSet<BatchId>,
    unit_crashed: bool,
    stats: CacheStats,
}

impl<S: TripStore> CacheActor<S> {
    pub(crate) fn new(
        config: CacheConfig,
        store: Arc<S>,
        sink: Arc<dyn ErrorSink>,
        unit: UnitHandle,
        events: mpsc::UnboundedReceiver<UnitEvent>,
        commands: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            sink,
            unit,
            events,
            commands,
            shutdown,
            loaded: BTreeSet::new(),
            loading: HashMap::new(),
            pending_chunks: HashMap::new(),
            fetches: JoinSet::new(),
            playback_batch: 0,
            deferred_trails: BTreeSet::new(),
            unit_crashed: false,
            stats: CacheStats::default(),
        }
    }

    fn timeline(&self) -> &Timeline {
        &self.config.timeline
    }

    /// Runs until the shutdown token fires or every handle is dropped.
    pub(crate) async fn run(mut self) {
        info!(store = self.store.name(), "Batch cache started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                event = self.events.recv(), if !self.unit_crashed => match event {
                    Some(event) => self.on_unit_event(event).await,
                    None => self.on_unit_crashed(),
                },

                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    self.on_fetch_joined(joined).await;
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
            }
        }

        self.shut_down().await;
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::RequestChunk { chunk, reply } => self.request_chunk(chunk, reply).await,
            Command::LoadBatch { batch, reply } => {
                self.ensure_batch(batch, Waiter::Load { reply }).await
            }
            Command::Prefetch { batch } => self.prefetch(batch),
            Command::ClearBatch { batch } => {
                self.clear_batch(batch).await;
            }
            Command::EvictBefore { batch, reply } => {
                let evicted = self.evict_before(batch).await;
                let _ = reply.send(evicted);
            }
            Command::IsLoaded { batch, reply } => {
                let _ = reply.send(self.loaded.contains(&batch));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn request_chunk(&mut self, chunk: ChunkIndex, reply: ChunkReply) {
        if self.unit_crashed {
            let _ = reply.send(Err(CacheError::UnitCrashed));
            return;
        }
        if let Err(e) = self.timeline().chunk_range(chunk) {
            let _ = reply.send(Err(e.into()));
            return;
        }
        if self.is_chunk_pending(chunk) {
            let _ = reply.send(Err(CacheError::ChunkAlreadyPending(chunk)));
            return;
        }

        let batch = self.timeline().batch_of(chunk);
        debug!(chunk, batch, "Chunk requested");
        self.ensure_batch(batch, Waiter::Chunk { chunk, reply }).await;
        self.advance_playback(batch);

        if self.timeline().position_in_batch(chunk) >= self.config.prefetch_trigger() {
            if let Some(next) = batch.checked_add(1) {
                self.prefetch(next);
            }
        }

        if let Some(behind) = self.config.retain_behind {
            let oldest_kept = batch.saturating_sub(behind);
            if self.loaded.range(..oldest_kept).next().is_some() {
                self.evict_before(oldest_kept).await;
            }
        }
    }

    fn is_chunk_pending(&self, chunk: ChunkIndex) -> bool {
        if self.pending_chunks.contains_key(&chunk) {
            return true;
        }
        let batch = self.timeline().batch_of(chunk);
        self.loading.get(&batch).is_some_and(|load| {
            load.waiters
                .iter()
                .any(|w| matches!(w, Waiter::Chunk { chunk: c, .. } if *c == chunk))
        })
    }

    /// Honours a trail request only within one batch of playback.
    ///
    /// Requests further ahead wait in `deferred_trails` until playback
    /// catches up.
    fn on_trail_request(&mut self, batch: BatchId) {
        if batch > self.playback_batch.saturating_add(1) {
            debug!(
                batch,
                playback = self.playback_batch,
                "Deferring trail request ahead of playback"
            );
            self.deferred_trails.insert(batch);
            return;
        }
        debug!(batch, "Unit asked for batch");
        self.prefetch(batch);
    }

    fn advance_playback(&mut self, batch: BatchId) {
        if batch <= self.playback_batch {
            return;
        }
        self.playback_batch = batch;

        let horizon = batch.saturating_add(1);
        let later = self.deferred_trails.split_off(&horizon.saturating_add(1));
        let due = std::mem::replace(&mut self.deferred_trails, later);
        for next in due.into_iter().filter(|b| *b > batch) {
            self.prefetch(next);
        }
    }

    fn prefetch(&mut self, batch: BatchId) {
        if self.unit_crashed || self.loaded.contains(&batch) || self.loading.contains_key(&batch) {
            return;
        }
        if let Err(e) = self.timeline().batch_range(batch) {
            self.report(&e.into());
            return;
        }

        debug!(batch, "Prefetching batch");
        self.stats.prefetches_requested += 1;
        self.start_fetch(batch, Waiter::Prefetch);
    }

    async fn clear_batch(&mut self, batch: BatchId) -> bool {
        if !self.loaded.remove(&batch) {
            return false;
        }
        self.stats.batches_evicted += 1;
        debug!(batch, "Clearing batch");
        self.send_to_unit(UnitRequest::ClearBatch { batch }).await;
        true
    }

    async fn evict_before(&mut self, batch: BatchId) -> usize {
        let stale: Vec<BatchId> = self.loaded.range(..batch).copied().collect();
        let mut evicted = 0;
        for old in stale {
            if self.clear_batch(old).await {
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, before = batch, "Evicted stale batches");
        }
        evicted
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            loaded_batches: self.loaded.len(),
            loading_batches: self.loading.len(),
            pending_chunks: self.pending_chunks.len()
                + self
                    .loading
                    .values()
                    .flat_map(|load| &load.waiters)
                    .filter(|w| matches!(w, Waiter::Chunk { .. }))
                    .count(),
            ..self.stats.clone()
        }
    }

    // -------------------------------------------------------------------------
    // Batch loading
    // -------------------------------------------------------------------------

    async fn ensure_batch(&mut self, batch: BatchId, waiter: Waiter) {
        if self.unit_crashed {
            self.reject(waiter, CacheError::UnitCrashed);
            return;
        }
        if self.loaded.contains(&batch) {
            self.satisfy(waiter).await;
            return;
        }
        if let Some(load) = self.loading.get_mut(&batch) {
            debug!(batch, waiters = load.waiters.len() + 1, "Joining in-flight load");
            load.waiters.push(waiter);
            self.stats.loads_coalesced += 1;
            return;
        }
        if let Err(e) = self.timeline().batch_range(batch) {
            self.reject(waiter, e.into());
            return;
        }
        self.start_fetch(batch, waiter);
    }

    fn start_fetch(&mut self, batch: BatchId, waiter: Waiter) {
        self.loading.insert(
            batch,
            BatchLoad {
                phase: LoadPhase::Fetching,
                waiters: vec![waiter],
            },
        );
        self.stats.fetches_started += 1;
        info!(batch, "Fetching batch");

        let fetch = fetch_batch(
            Arc::clone(&self.store),
            self.config.timeline,
            self.config.retry,
            self.shutdown.clone(),
            batch,
        );
        self.fetches.spawn(async move {
            let result = AssertUnwindSafe(fetch)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(CacheError::Fetch {
                        batch,
                        attempts: 0,
                        message: "fetch task panicked".to_string(),
                    })
                });
            (batch, result)
        });
    }

    async fn on_fetch_joined(&mut self, joined: Result<FetchOutcome, JoinError>) {
        let (batch, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(error = %e, "Fetch task ended without a result");
                return;
            }
        };

        let Some(load) = self.loading.get_mut(&batch) else {
            debug!(batch, "Fetch finished for a batch no longer loading");
            return;
        };

        match result {
            Ok(trips) => {
                load.phase = LoadPhase::Processing;
                debug!(batch, trips = trips.len(), "Batch fetched, forwarding to unit");
                self.send_to_unit(UnitRequest::LoadBatch { batch, trips }).await;
            }
            Err(e) => self.fail_batch(batch, e),
        }
    }

    fn fail_batch(&mut self, batch: BatchId, error: CacheError) {
        let Some(load) = self.loading.remove(&batch) else {
            return;
        };
        self.stats.loads_failed += 1;
        warn!(batch, error = %error, "Batch load failed");

        let mut prefetched = false;
        for waiter in load.waiters {
            match waiter {
                Waiter::Prefetch => prefetched = true,
                other => self.reject(other, error.clone()),
            }
        }
        if prefetched {
            self.report(&error);
        }
    }

    fn on_batch_processed(&mut self, batch: BatchId, trip_count: usize) -> Vec<Waiter> {
        match self.loading.get(&batch) {
            Some(BatchLoad {
                phase: LoadPhase::Processing,
                ..
            }) => {}
            _ => {
                debug!(batch, "Unexpected BatchProcessed, ignoring");
                return Vec::new();
            }
        }

        let waiters = self
            .loading
            .remove(&batch)
            .map(|load| load.waiters)
            .unwrap_or_default();
        self.loaded.insert(batch);
        info!(batch, trip_count, waiters = waiters.len(), "Batch loaded");
        waiters
    }

    async fn satisfy(&mut self, waiter: Waiter) {
        match waiter {
            Waiter::Chunk { chunk, reply } => {
                self.pending_chunks.insert(chunk, reply);
                self.send_to_unit(UnitRequest::RequestChunk { chunk }).await;
            }
            Waiter::Load { reply } => {
                let _ = reply.send(Ok(()));
            }
            Waiter::Prefetch => {}
        }
    }

    fn reject(&self, waiter: Waiter, error: CacheError) {
        match waiter {
            Waiter::Chunk { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Waiter::Load { reply } => {
                let _ = reply.send(Err(error));
            }
            Waiter::Prefetch => {}
        }
    }

    // -------------------------------------------------------------------------
    // Processing unit
    // -------------------------------------------------------------------------

    async fn on_unit_event(&mut self, event: UnitEvent) {
        match event {
            UnitEvent::BatchProcessed { batch, trip_count } => {
                for waiter in self.on_batch_processed(batch, trip_count) {
                    self.satisfy(waiter).await;
                }
            }
            UnitEvent::ChunkResponse { chunk, trips } => match self.pending_chunks.remove(&chunk) {
                Some(reply) => {
                    self.stats.chunks_served += 1;
                    debug!(chunk, trips = trips.len(), "Chunk served");
                    let _ = reply.send(Ok(trips));
                }
                None => debug!(chunk, "Response for a chunk nobody is waiting on"),
            },
            UnitEvent::RequestBatch { batch } => self.on_trail_request(batch),
            UnitEvent::Error { message, context } => {
                warn!(%context, %message, "Processing unit reported an error");
                self.report(&CacheError::Processing { message, context });
            }
            UnitEvent::Ready => debug!("Ignoring repeated Ready"),
        }
    }

    /// Sends a request to the unit, switching to crash handling if it is gone.
    async fn send_to_unit(&mut self, request: UnitRequest) {
        if self.unit_crashed {
            return;
        }
        let kind = request.kind();
        if !self.unit.send(request).await {
            warn!(request = kind, "Processing unit rejected request");
            self.on_unit_crashed();
        }
    }

    fn on_unit_crashed(&mut self) {
        if self.unit_crashed {
            return;
        }
        self.unit_crashed = true;
        warn!(
            pending_chunks = self.pending_chunks.len(),
            loading = self.loading.len(),
            "Processing unit crashed"
        );

        self.fetches.abort_all();
        self.loaded.clear();

        for (_, reply) in self.pending_chunks.drain() {
            let _ = reply.send(Ok(empty_chunk()));
        }
        for (_, load) in self.loading.drain() {
            for waiter in load.waiters {
                match waiter {
                    Waiter::Chunk { reply, .. } => {
                        let _ = reply.send(Ok(empty_chunk()));
                    }
                    Waiter::Load { reply } => {
                        let _ = reply.send(Err(CacheError::UnitCrashed));
                    }
                    Waiter::Prefetch => {}
                }
            }
        }

        self.report(&CacheError::UnitCrashed);
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    fn report(&self, error: &CacheError) {
        if self.shutdown.is_cancelled() {
            debug!(error = %error, "Suppressing error after termination");
            return;
        }
        self.sink.report(error);
    }

    async fn shut_down(mut self) {
        self.fetches.abort_all();
        // Dropping resolvers makes their callers observe Terminated.
        self.pending_chunks.clear();
        self.loading.clear();
        self.commands.close();
        self.unit.stop().await;
        info!(
            fetches = self.stats.fetches_started,
            chunks = self.stats.chunks_served,
            "Batch cache stopped"
        );
    }
}

// =============================================================================
// Fetching
// =============================================================================

/// Fetches one batch from the store under the retry policy.
///
/// Batch 0 also asks for trips already running when the window opens and
/// merges them in, keeping the range copy of any duplicate.
async fn fetch_batch<S: TripStore>(
    store: Arc<S>,
    timeline: Timeline,
    retry: RetryPolicy,
    cancel: CancellationToken,
    batch: BatchId,
) -> Result<Vec<Trip>, CacheError> {
    let range = timeline.batch_range(batch)?;
    let overlap = if batch == 0 {
        Some(timeline.chunk_range(0)?)
    } else {
        None
    };
    let label = format!("fetch batch {batch}");

    let result = retry
        .run(&label, &cancel, |attempt| {
            let store = Arc::clone(&store);
            async move {
                debug!(batch, attempt, range = %range, "Querying store");
                match overlap {
                    Some(overlap) => tokio::try_join!(
                        store.trips_in_range(range),
                        store.trips_overlapping(overlap)
                    )
                    .map(|(ranged, running)| merge_by_id(ranged, running)),
                    None => store.trips_in_range(range).await,
                }
            }
        })
        .await;

    result.map_err(|e| match e {
        RetryError::Exhausted { attempts, last } => CacheError::Fetch {
            batch,
            attempts,
            message: last.to_string(),
        },
        RetryError::Cancelled { .. } => CacheError::Terminated,
    })
}
