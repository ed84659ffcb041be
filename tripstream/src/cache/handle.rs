//! Consumer-facing handle to the batch cache.

use super::actor::{CacheActor, Command};
use super::{CacheConfig, CacheError, CacheStats, ErrorSink};
use crate::store::TripStore;
use crate::trip::Trip;
use crate::unit::{spawn_unit, ChunkTrips, UnitEvent, UnitHandle, UnitRequest};
use crate::window::{BatchId, ChunkIndex, Timeline};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Windowed trip cache.
///
/// Owns the orchestrator task and, through it, the processing unit thread.
/// All methods take `&self`, so the handle can be shared behind an `Arc`
/// between the playback loop and whatever drives prefetch.
///
/// The instance is single-use: after [`terminate`](Self::terminate) every
/// operation fails with [`CacheError::Terminated`]. Dropping the handle
/// without terminating cancels the orchestrator in the background.
pub struct BatchCache {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    actor: Mutex<Option<JoinHandle<()>>>,
    timeline: Timeline,
}

impl BatchCache {
    /// Starts the processing unit and the orchestrator, loads batch 0 and
    /// resolves the first `initial_chunks` chunks.
    ///
    /// Returns the cache together with the trips of those chunks in chunk
    /// order. On failure everything started so far is torn down first.
    ///
    /// # Errors
    ///
    /// - [`CacheError::InvalidConfig`] if `config` fails validation
    /// - [`CacheError::UnitStartup`] or [`CacheError::UnitNotReady`] if the
    ///   processing unit cannot be brought up
    /// - [`CacheError::Fetch`] if batch 0 cannot be fetched after retries
    pub async fn start<S: TripStore>(
        config: CacheConfig,
        store: Arc<S>,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<(Self, Vec<Trip>), CacheError> {
        config.validate()?;

        let (mut unit, mut events) = spawn_unit(config.unit_channel_capacity)
            .map_err(|e| CacheError::UnitStartup(e.to_string()))?;

        if let Err(e) = handshake(&unit, &mut events, &config).await {
            unit.stop().await;
            return Err(e);
        }

        let initial_chunks = config.initial_chunks;
        let cache = Self::launch(config, store, sink, unit, events);

        match cache.preload(initial_chunks).await {
            Ok(trips) => {
                info!(
                    trips = trips.len(),
                    chunks = initial_chunks,
                    "Batch cache ready"
                );
                Ok((cache, trips))
            }
            Err(e) => {
                warn!(error = %e, "Initial load failed, shutting down");
                cache.terminate().await;
                Err(e)
            }
        }
    }

    /// Spawns the orchestrator around an already initialised unit.
    pub(crate) fn launch<S: TripStore>(
        config: CacheConfig,
        store: Arc<S>,
        sink: Arc<dyn ErrorSink>,
        unit: UnitHandle,
        events: mpsc::UnboundedReceiver<UnitEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(config.command_channel_capacity);
        let shutdown = CancellationToken::new();
        let timeline = config.timeline;

        let actor = CacheActor::new(
            config,
            store,
            sink,
            unit,
            events,
            command_rx,
            shutdown.clone(),
        );
        let actor = tokio::spawn(actor.run());

        Self {
            commands,
            shutdown,
            actor: Mutex::new(Some(actor)),
            timeline,
        }
    }

    async fn preload(&self, initial_chunks: u64) -> Result<Vec<Trip>, CacheError> {
        self.load_batch(0).await?;

        let chunks = try_join_all((0..initial_chunks).map(|chunk| self.request_chunk(chunk))).await?;
        Ok(chunks
            .iter()
            .flat_map(|trips| trips.iter().cloned())
            .collect())
    }

    /// Layout of the timeline served by this cache.
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Returns the trips of `chunk`, loading its batch if needed.
    ///
    /// Also prefetches the next batch once playback passes the prefetch
    /// threshold and, when configured, evicts batches far behind.
    ///
    /// # Errors
    ///
    /// Fails with the batch load error if the batch cannot be loaded, with
    /// [`CacheError::ChunkAlreadyPending`] if another request for the same
    /// chunk is outstanding, and with [`CacheError::Terminated`] after
    /// termination. If the processing unit crashes while the request is
    /// pending, the request resolves with an empty chunk.
    pub async fn request_chunk(&self, chunk: ChunkIndex) -> Result<ChunkTrips, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RequestChunk { chunk, reply }).await?;
        rx.await.map_err(|_| CacheError::Terminated)?
    }

    /// Loads `batch` without requesting a chunk.
    pub async fn load_batch(&self, batch: BatchId) -> Result<(), CacheError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::LoadBatch { batch, reply }).await?;
        rx.await.map_err(|_| CacheError::Terminated)?
    }

    /// Starts loading `batch` in the background.
    ///
    /// No-op if the batch is loaded or loading. A load that fails after
    /// retries is reported to the error sink.
    pub fn prefetch_batch(&self, batch: BatchId) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if let Err(e) = self.commands.try_send(Command::Prefetch { batch }) {
            warn!(batch, error = %e, "Prefetch dropped");
        }
    }

    /// Drops a loaded batch. No-op unless the batch is loaded.
    pub async fn clear_batch(&self, batch: BatchId) {
        let _ = self.send(Command::ClearBatch { batch }).await;
    }

    /// Clears every loaded batch with an id below `batch`.
    ///
    /// Returns the number of batches cleared.
    pub async fn evict_before(&self, batch: BatchId) -> Result<usize, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::EvictBefore { batch, reply }).await?;
        rx.await.map_err(|_| CacheError::Terminated)
    }

    /// Returns true if `batch` is loaded. False after termination.
    pub async fn is_batch_loaded(&self, batch: BatchId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::IsLoaded { batch, reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Snapshot of cache counters.
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| CacheError::Terminated)
    }

    /// Returns true once [`terminate`](Self::terminate) has been called.
    pub fn is_terminated(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops the orchestrator and the processing unit.
    ///
    /// Pending retry delays are cancelled, unresolved requests fail with
    /// [`CacheError::Terminated`] and nothing is reported afterwards.
    /// Calling this more than once is harmless.
    pub async fn terminate(&self) {
        self.shutdown.cancel();

        let actor = self.actor.lock().await.take();
        if let Some(actor) = actor {
            if let Err(e) = actor.await {
                warn!(error = %e, "Batch cache task failed");
            }
            info!("Batch cache terminated");
        }
    }

    async fn send(&self, command: Command) -> Result<(), CacheError> {
        if self.shutdown.is_cancelled() {
            return Err(CacheError::Terminated);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| CacheError::Terminated)
    }
}

impl Drop for BatchCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Sends `Init` and waits for `Ready`.
async fn handshake(
    unit: &UnitHandle,
    events: &mut mpsc::UnboundedReceiver<UnitEvent>,
    config: &CacheConfig,
) -> Result<(), CacheError> {
    let init = UnitRequest::Init {
        timeline: config.timeline,
        fade: config.fade,
    };
    if !unit.send(init).await {
        return Err(CacheError::UnitCrashed);
    }

    let ready = async {
        while let Some(event) = events.recv().await {
            match event {
                UnitEvent::Ready => return Ok(()),
                UnitEvent::Error { message, .. } => return Err(CacheError::UnitStartup(message)),
                other => debug!(event = ?other, "Ignoring event before Ready"),
            }
        }
        Err(CacheError::UnitCrashed)
    };

    tokio::time::timeout(config.unit_ready_timeout, ready)
        .await
        .map_err(|_| CacheError::UnitNotReady(config.unit_ready_timeout))?
}
