//! Backing store connector.
//!
//! The cache never talks to a database directly. It asks a [`TripStore`] for
//! two query shapes:
//!
//! - trips whose active span intersects a half-open range (every batch)
//! - trips already in progress when the window opens (batch 0 only)
//!
//! [`MemoryTripStore`] is a complete in-process implementation used by the CLI
//! and by tests.

mod memory;

pub use memory::MemoryTripStore;

use crate::trip::Trip;
use crate::window::TimeRange;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by a backing store.
///
/// Every variant is treated as transient by the retry policy.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Store could not be reached.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    /// Store was reached but the query failed.
    #[error("query failed: {0}")]
    Query(String),

    /// Trip data could not be read from a local source.
    #[error("failed to read trips from {path}: {message}")]
    Load { path: PathBuf, message: String },
}

/// Source of trip records for the cache.
pub trait TripStore: Send + Sync + 'static {
    /// Trips whose active span intersects `range`.
    fn trips_in_range(
        &self,
        range: TimeRange,
    ) -> impl Future<Output = Result<Vec<Trip>, StoreError>> + Send;

    /// Trips that started before `range.start` and are still active inside
    /// `range`. Used to recover trips in progress when the window opens.
    fn trips_overlapping(
        &self,
        range: TimeRange,
    ) -> impl Future<Output = Result<Vec<Trip>, StoreError>> + Send;

    /// Returns the store name for logging.
    fn name(&self) -> &str;
}
