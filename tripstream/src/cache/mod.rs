//! Windowed batch cache.
//!
//! [`BatchCache`] sits between a consumer that plays chunks in order and a
//! [`TripStore`](crate::store::TripStore) that serves whole batches. It
//! fetches batches with retries, hands them to the processing unit for
//! slicing, coalesces concurrent needs for the same batch into one fetch,
//! prefetches ahead of playback and evicts batches left behind.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use chrono::{TimeZone, Utc};
//! use tripstream::cache::{BatchCache, CacheConfig, TracingErrorSink};
//! use tripstream::store::MemoryTripStore;
//! use tripstream::window::Timeline;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
//! let timeline = Timeline::new(start, Duration::from_secs(30), Duration::from_secs(3600))?;
//! let store = Arc::new(MemoryTripStore::new("demo", Vec::new()));
//!
//! let (cache, first_trips) =
//!     BatchCache::start(CacheConfig::new(timeline), store, Arc::new(TracingErrorSink)).await?;
//! println!("{} trips ready", first_trips.len());
//!
//! let chunk = cache.request_chunk(3).await?;
//! println!("chunk 3 has {} trips", chunk.len());
//!
//! cache.terminate().await;
//! # Ok(())
//! # }
//! ```

mod actor;
mod config;
mod error;
mod handle;
mod sink;
mod stats;

pub use config::CacheConfig;
pub use error::CacheError;
pub use handle::BatchCache;
pub use sink::{CollectingErrorSink, ErrorSink, NullErrorSink, TracingErrorSink};
pub use stats::CacheStats;
