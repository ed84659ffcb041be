//! Cache statistics.

use std::fmt;

/// Snapshot of orchestrator counters and state sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Batch fetches dispatched to the store.
    pub fetches_started: u64,
    /// Batch needs that joined an in-flight load instead of fetching.
    pub loads_coalesced: u64,
    /// Loads that failed after retries.
    pub loads_failed: u64,
    /// Prefetches that started a fetch.
    pub prefetches_requested: u64,
    /// Chunk results delivered to callers.
    pub chunks_served: u64,
    /// Batches cleared, explicitly or by eviction.
    pub batches_evicted: u64,
    /// Batches currently loaded.
    pub loaded_batches: usize,
    /// Batches currently loading.
    pub loading_batches: usize,
    /// Chunk requests not yet answered.
    pub pending_chunks: usize,
}

impl CacheStats {
    /// Fraction of batch needs served by an in-flight load (0.0 to 1.0).
    pub fn coalescing_ratio(&self) -> f64 {
        let total = self.fetches_started + self.loads_coalesced;
        if total == 0 {
            0.0
        } else {
            self.loads_coalesced as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fetches started:    {}", self.fetches_started)?;
        writeln!(
            f,
            "Loads coalesced:    {} ({:.1}%)",
            self.loads_coalesced,
            self.coalescing_ratio() * 100.0
        )?;
        writeln!(f, "Loads failed:       {}", self.loads_failed)?;
        writeln!(f, "Prefetches:         {}", self.prefetches_requested)?;
        writeln!(f, "Chunks served:      {}", self.chunks_served)?;
        writeln!(f, "Batches evicted:    {}", self.batches_evicted)?;
        write!(
            f,
            "Batches held:       {} loaded, {} loading",
            self.loaded_batches, self.loading_batches
        )
    }
}
