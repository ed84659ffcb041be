//! Tripstream - windowed streaming of historical trips for animation
//!
//! This library feeds an animation loop with trip records from a large
//! historical dataset. The timeline is cut into batches fetched from a backing
//! store and chunks consumed by playback; a processing unit on its own thread
//! slices batches into chunks while the cache prefetches ahead and evicts
//! behind.
//!
//! # High-Level API
//!
//! [`cache::BatchCache`] is the entry point:
//!
//! ```ignore
//! use tripstream::cache::{BatchCache, CacheConfig, TracingErrorSink};
//!
//! let (cache, first_trips) = BatchCache::start(config, store, Arc::new(TracingErrorSink)).await?;
//! let chunk = cache.request_chunk(3).await?;
//! cache.terminate().await;
//! ```

pub mod cache;
pub mod config;
pub mod logging;
pub mod retry;
pub mod store;
pub mod trip;
pub mod unit;
pub mod window;

/// Version of the tripstream library and CLI.
///
/// Synchronized across the workspace via `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
