//! Integration tests for the batch cache.
//!
//! These tests drive `BatchCache` through its public API against a scripted
//! store and the real processing unit thread, covering:
//! - Initial load and batch 0 deduplication
//! - Coalescing of concurrent needs for one batch
//! - Retry, exhaustion and recovery
//! - Prefetch (explicit, threshold and trail-driven)
//! - Clearing and eviction
//! - Termination

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tripstream::cache::{BatchCache, CacheConfig, CacheError, CollectingErrorSink};
use tripstream::retry::RetryPolicy;
use tripstream::store::{MemoryTripStore, StoreError, TripStore};
use tripstream::trip::{GeoPoint, Trip};
use tripstream::window::{BatchId, TimeRange, Timeline};

// =============================================================================
// Test Helpers
// =============================================================================

fn window_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn trip(id: &str, start_secs: i64, duration_secs: i64) -> Trip {
    let started_at = window_start() + TimeDelta::seconds(start_secs);
    Trip::new(
        id,
        started_at,
        started_at + TimeDelta::seconds(duration_secs),
        GeoPoint::new(40.7580, -73.9855),
        GeoPoint::new(40.7484, -73.9857),
    )
}

fn ids(trips: &[Trip]) -> Vec<&str> {
    trips.iter().map(|t| t.id.as_str()).collect()
}

/// 30 s chunks, 300 s batches: 10 chunks per batch.
fn small_timeline() -> Timeline {
    Timeline::new(window_start(), Duration::from_secs(30), Duration::from_secs(300)).unwrap()
}

/// Config with fast retries and no threshold prefetch.
fn config(timeline: Timeline) -> CacheConfig {
    CacheConfig::new(timeline)
        .with_fade(Duration::ZERO)
        .with_retry(RetryPolicy::new(3, Duration::from_millis(10)))
        .with_prefetch_threshold(1.0)
        .with_initial_chunks(0)
}

#[derive(Default)]
struct Script {
    range_calls: HashMap<BatchId, u32>,
    overlap_calls: u32,
    fail_next: HashMap<BatchId, u32>,
    always_fail: HashSet<BatchId>,
}

/// Store wrapper that counts queries per batch, injects failures and delays.
///
/// Overlap results carry a marker route so tests can tell which copy of a
/// duplicated trip survived the batch 0 merge.
struct ScriptedStore {
    inner: MemoryTripStore,
    timeline: Timeline,
    latency: Duration,
    script: Mutex<Script>,
}

impl ScriptedStore {
    fn new(timeline: Timeline, trips: Vec<Trip>) -> Self {
        Self {
            inner: MemoryTripStore::new("scripted", trips),
            timeline,
            latency: Duration::ZERO,
            script: Mutex::new(Script::default()),
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn fail_next(&self, batch: BatchId, times: u32) {
        self.script.lock().unwrap().fail_next.insert(batch, times);
    }

    fn fail_always(&self, batch: BatchId) {
        self.script.lock().unwrap().always_fail.insert(batch);
    }

    fn heal(&self, batch: BatchId) {
        self.script.lock().unwrap().always_fail.remove(&batch);
    }

    fn range_calls(&self, batch: BatchId) -> u32 {
        self.script
            .lock()
            .unwrap()
            .range_calls
            .get(&batch)
            .copied()
            .unwrap_or(0)
    }

    fn overlap_calls(&self) -> u32 {
        self.script.lock().unwrap().overlap_calls
    }

    fn batch_of(&self, range: &TimeRange) -> BatchId {
        let offset = (range.start - self.timeline.window_start()).num_milliseconds() as u64;
        offset / self.timeline.batch_size().as_millis() as u64
    }

    /// Records a range query and decides whether it fails.
    fn record_range(&self, batch: BatchId) -> bool {
        let mut script = self.script.lock().unwrap();
        *script.range_calls.entry(batch).or_default() += 1;
        if script.always_fail.contains(&batch) {
            return true;
        }
        match script.fail_next.get_mut(&batch) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl TripStore for ScriptedStore {
    async fn trips_in_range(&self, range: TimeRange) -> Result<Vec<Trip>, StoreError> {
        let batch = self.batch_of(&range);
        let fail = self.record_range(batch);
        tokio::time::sleep(self.latency).await;
        if fail {
            return Err(StoreError::Unavailable(format!("batch {batch} offline")));
        }
        self.inner.trips_in_range(range).await
    }

    async fn trips_overlapping(&self, range: TimeRange) -> Result<Vec<Trip>, StoreError> {
        self.script.lock().unwrap().overlap_calls += 1;
        tokio::time::sleep(self.latency).await;
        let trips = self.inner.trips_overlapping(range).await?;
        Ok(trips
            .into_iter()
            .map(|t| t.with_route(vec![GeoPoint::new(0.0, 0.0)]))
            .collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

async fn start(
    store: &Arc<ScriptedStore>,
    config: CacheConfig,
) -> (BatchCache, Vec<Trip>, Arc<CollectingErrorSink>) {
    let sink = Arc::new(CollectingErrorSink::new());
    let (cache, trips) = BatchCache::start(config, Arc::clone(store), sink.clone())
        .await
        .expect("cache should start");
    (cache, trips, sink)
}

/// Polls `check` until it holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// =============================================================================
// Start and batch 0
// =============================================================================

#[tokio::test]
async fn test_start_returns_initial_chunks_in_order() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(
        timeline,
        vec![
            trip("c", 70, 10),
            trip("a", 5, 10),
            trip("late", 100, 10),
            trip("running", -60, 120),
            trip("b", 40, 10),
        ],
    ));

    let (cache, trips, sink) = start(&store, config(timeline).with_initial_chunks(3)).await;

    assert_eq!(ids(&trips), vec!["running", "a", "b", "c"]);
    assert!(cache.is_batch_loaded(0).await);
    assert_eq!(store.range_calls(0), 1);
    assert_eq!(store.overlap_calls(), 1);
    assert!(sink.is_empty());

    cache.terminate().await;
}

#[tokio::test]
async fn test_batch_zero_keeps_range_copy_of_duplicates() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(
        timeline,
        vec![trip("running", -60, 120), trip("fresh", 10, 5)],
    ));

    let (cache, _, _) = start(&store, config(timeline)).await;
    let chunk = cache.request_chunk(0).await.unwrap();

    assert_eq!(ids(&chunk), vec!["running", "fresh"]);
    let running = &chunk[0];
    assert!(running.route.is_empty(), "overlap copy must not win");

    cache.terminate().await;
}

#[tokio::test]
async fn test_start_fails_when_batch_zero_cannot_load() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(timeline, vec![trip("a", 5, 10)]));
    store.fail_always(0);

    let result = BatchCache::start(
        config(timeline),
        Arc::clone(&store),
        Arc::new(CollectingErrorSink::new()),
    )
    .await;

    match result {
        Err(CacheError::Fetch { batch, attempts, .. }) => {
            assert_eq!(batch, 0);
            assert_eq!(attempts, 3);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("start should fail"),
    }
    assert_eq!(store.range_calls(0), 3);
}

#[tokio::test]
async fn test_hourly_batches_chunk_125_loads_batch_1() {
    let timeline =
        Timeline::new(window_start(), Duration::from_secs(30), Duration::from_secs(3600)).unwrap();
    assert_eq!(timeline.chunks_per_batch(), 120);

    let store = Arc::new(ScriptedStore::new(
        timeline,
        vec![trip("in-125", 125 * 30 + 3, 10)],
    ));
    let (cache, _, _) = start(&store, config(timeline)).await;

    let chunk = cache.request_chunk(125).await.unwrap();

    assert_eq!(ids(&chunk), vec!["in-125"]);
    assert!(cache.is_batch_loaded(1).await);
    assert_eq!(store.range_calls(1), 1);

    cache.terminate().await;
}

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let timeline = small_timeline();
    let store = Arc::new(
        ScriptedStore::new(
            timeline,
            vec![trip("x", 310, 5), trip("y", 365, 5), trip("z", 455, 5)],
        )
        .with_latency(Duration::from_millis(100)),
    );
    let (cache, _, _) = start(&store, config(timeline)).await;

    let (c12, c13, c15) = tokio::join!(
        cache.request_chunk(12),
        cache.request_chunk(13),
        cache.request_chunk(15),
    );

    assert_eq!(ids(&c12.unwrap()), vec!["y"]);
    assert!(c13.unwrap().is_empty());
    assert_eq!(ids(&c15.unwrap()), vec!["z"]);
    assert_eq!(store.range_calls(1), 1);

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.loads_coalesced, 2);
    assert_eq!(stats.chunks_served, 3);

    cache.terminate().await;
}

#[tokio::test]
async fn test_prefetch_and_request_observe_one_load() {
    let timeline = small_timeline();
    let store = Arc::new(
        ScriptedStore::new(timeline, vec![trip("five", 1505, 5)])
            .with_latency(Duration::from_millis(80)),
    );
    let (cache, _, sink) = start(&store, config(timeline)).await;

    cache.prefetch_batch(5);
    cache.prefetch_batch(5);
    let chunk = cache.request_chunk(50).await.unwrap();

    assert_eq!(ids(&chunk), vec!["five"]);
    assert_eq!(store.range_calls(5), 1);
    assert!(cache.is_batch_loaded(5).await);

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.prefetches_requested, 1);
    assert_eq!(stats.loads_coalesced, 1);
    assert!(sink.is_empty());

    cache.terminate().await;
}

#[tokio::test]
async fn test_duplicate_chunk_request_is_rejected() {
    let timeline = small_timeline();
    let store = Arc::new(
        ScriptedStore::new(timeline, vec![trip("x", 365, 5)])
            .with_latency(Duration::from_millis(150)),
    );
    let (cache, _, _) = start(&store, config(timeline)).await;

    let (first, second) = tokio::join!(cache.request_chunk(12), cache.request_chunk(12));

    assert_eq!(ids(&first.unwrap()), vec!["x"]);
    assert_eq!(second.unwrap_err(), CacheError::ChunkAlreadyPending(12));

    // Once answered, the chunk can be requested again.
    assert_eq!(cache.request_chunk(12).await.unwrap().len(), 1);

    cache.terminate().await;
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test]
async fn test_two_failures_then_success_resolves_without_report() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(timeline, vec![trip("x", 310, 5)]));
    let (cache, _, sink) = start(&store, config(timeline)).await;
    store.fail_next(1, 2);

    let chunk = cache.request_chunk(10).await.unwrap();

    assert_eq!(ids(&chunk), vec!["x"]);
    assert_eq!(store.range_calls(1), 3);
    assert!(sink.is_empty());

    cache.terminate().await;
}

#[tokio::test]
async fn test_exhausted_retries_reject_and_fresh_request_retries() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(timeline, vec![trip("x", 610, 5)]));
    let (cache, _, sink) = start(&store, config(timeline)).await;
    store.fail_always(2);

    let err = cache.request_chunk(20).await.unwrap_err();
    match err {
        CacheError::Fetch {
            batch,
            attempts,
            message,
        } => {
            assert_eq!(batch, 2);
            assert_eq!(attempts, 3);
            assert!(message.contains("batch 2 offline"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(!cache.is_batch_loaded(2).await);
    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.loading_batches, 0);
    assert_eq!(stats.loads_failed, 1);
    // Request failures go to the caller, not the sink.
    assert!(sink.is_empty());

    store.heal(2);
    let chunk = cache.request_chunk(20).await.unwrap();
    assert_eq!(ids(&chunk), vec!["x"]);
    assert_eq!(store.range_calls(2), 4);

    cache.terminate().await;
}

#[tokio::test]
async fn test_failed_prefetch_is_reported_to_sink() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(timeline, Vec::new()));
    let (cache, _, sink) = start(&store, config(timeline)).await;
    store.fail_always(4);

    cache.prefetch_batch(4);

    assert!(eventually(|| async { !sink.is_empty() }).await);
    assert!(matches!(
        sink.errors()[0],
        CacheError::Fetch {
            batch: 4,
            attempts: 3,
            ..
        }
    ));
    assert!(!cache.is_batch_loaded(4).await);

    cache.terminate().await;
}

// =============================================================================
// Prefetch triggers
// =============================================================================

#[tokio::test]
async fn test_threshold_prefetches_next_batch() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(timeline, vec![trip("next", 320, 5)]));
    let (cache, _, _) = start(&store, config(timeline).with_prefetch_threshold(0.5)).await;

    cache.request_chunk(4).await.unwrap();
    assert_eq!(store.range_calls(1), 0);

    cache.request_chunk(5).await.unwrap();
    assert!(eventually(|| cache.is_batch_loaded(1)).await);
    assert_eq!(store.range_calls(1), 1);

    // Further chunks past the threshold do not refetch.
    cache.request_chunk(6).await.unwrap();
    assert_eq!(store.range_calls(1), 1);

    cache.terminate().await;
}

#[tokio::test]
async fn test_trail_past_batch_end_loads_next_batch() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(timeline, vec![trip("late", 290, 60)]));

    let (cache, _, _) = start(&store, config(timeline)).await;

    assert!(eventually(|| cache.is_batch_loaded(1)).await);
    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.prefetches_requested, 1);

    // The crossing trip stays in batch 0 only.
    assert_eq!(ids(&cache.request_chunk(9).await.unwrap()), vec!["late"]);
    assert!(cache.request_chunk(10).await.unwrap().is_empty());

    cache.terminate().await;
}

#[tokio::test]
async fn test_prefetch_dropped_when_command_channel_is_full() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(timeline, vec![trip("x", 610, 5)]));
    let (cache, _, sink) = start(&store, config(timeline).with_command_channel_capacity(1)).await;

    // The actor cannot drain the channel until this task yields.
    for batch in 1..=5 {
        cache.prefetch_batch(batch);
    }

    assert!(eventually(|| cache.is_batch_loaded(1)).await);
    for batch in 2..=5 {
        assert_eq!(store.range_calls(batch), 0);
    }
    assert_eq!(ids(&cache.request_chunk(20).await.unwrap()), vec!["x"]);
    assert!(sink.is_empty());

    cache.terminate().await;
}

#[tokio::test]
async fn test_trail_requests_stay_within_one_batch_of_playback() {
    let timeline = small_timeline();
    let trips = (0..8)
        .map(|b| trip(&format!("crossing-{b}"), b * 300 + 290, 20))
        .collect();
    let store = Arc::new(ScriptedStore::new(timeline, trips));

    let (cache, _, _) = start(&store, config(timeline)).await;

    assert!(eventually(|| cache.is_batch_loaded(1)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.loaded_batches, 2);
    assert_eq!(stats.loading_batches, 0);
    assert_eq!(store.range_calls(2), 0);

    // Reaching batch 1 releases the trail request for batch 2 only.
    cache.request_chunk(10).await.unwrap();
    assert!(eventually(|| cache.is_batch_loaded(2)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!cache.is_batch_loaded(3).await);
    assert_eq!(store.range_calls(3), 0);
    assert_eq!(cache.stats().await.unwrap().loaded_batches, 3);

    cache.terminate().await;
}

// =============================================================================
// Clearing and eviction
// =============================================================================

#[tokio::test]
async fn test_clear_batch_forces_refetch() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(timeline, vec![trip("x", 310, 5)]));
    let (cache, _, _) = start(&store, config(timeline)).await;

    cache.request_chunk(10).await.unwrap();
    assert!(cache.is_batch_loaded(1).await);

    cache.clear_batch(1).await;
    assert!(!cache.is_batch_loaded(1).await);

    // Clearing a batch that is not loaded is a no-op.
    cache.clear_batch(7).await;

    let chunk = cache.request_chunk(10).await.unwrap();
    assert_eq!(ids(&chunk), vec!["x"]);
    assert_eq!(store.range_calls(1), 2);

    cache.terminate().await;
}

#[tokio::test]
async fn test_evict_before_clears_older_batches() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(timeline, Vec::new()));
    let (cache, _, _) = start(&store, config(timeline)).await;

    cache.load_batch(1).await.unwrap();
    cache.load_batch(2).await.unwrap();

    assert_eq!(cache.evict_before(2).await.unwrap(), 2);
    assert!(!cache.is_batch_loaded(0).await);
    assert!(!cache.is_batch_loaded(1).await);
    assert!(cache.is_batch_loaded(2).await);
    assert_eq!(cache.evict_before(2).await.unwrap(), 0);

    cache.terminate().await;
}

#[tokio::test]
async fn test_retain_behind_evicts_during_playback() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(timeline, Vec::new()));
    let (cache, _, _) = start(&store, config(timeline).with_retain_behind(Some(1))).await;

    for chunk in [0, 10, 20, 30] {
        cache.request_chunk(chunk).await.unwrap();
    }

    assert!(!cache.is_batch_loaded(0).await);
    assert!(!cache.is_batch_loaded(1).await);
    assert!(cache.is_batch_loaded(2).await);
    assert!(cache.is_batch_loaded(3).await);
    assert_eq!(cache.stats().await.unwrap().batches_evicted, 2);

    cache.terminate().await;
}

// =============================================================================
// Termination
// =============================================================================

#[tokio::test]
async fn test_terminate_during_retry_delay_stops_fetching() {
    let timeline = small_timeline();
    let store = Arc::new(ScriptedStore::new(timeline, Vec::new()));
    let config = config(timeline).with_retry(RetryPolicy::new(3, Duration::from_millis(500)));
    let (cache, _, sink) = start(&store, config).await;
    store.fail_always(3);

    cache.prefetch_batch(3);
    assert!(eventually(|| async { store.range_calls(3) == 1 }).await);

    cache.terminate().await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(store.range_calls(3), 1);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_terminate_fails_pending_requests() {
    let timeline = small_timeline();
    let store = Arc::new(
        ScriptedStore::new(timeline, vec![trip("x", 610, 5)]).with_latency(Duration::from_millis(50)),
    );
    let (cache, _, sink) = start(&store, config(timeline)).await;
    let cache = Arc::new(cache);

    let pending = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.request_chunk(20).await })
    };
    assert!(eventually(|| async { store.range_calls(2) == 1 }).await);

    cache.terminate().await;

    let result = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.unwrap_err(), CacheError::Terminated);
    assert_eq!(
        cache.request_chunk(0).await.unwrap_err(),
        CacheError::Terminated
    );
    assert!(sink.is_empty());
}
