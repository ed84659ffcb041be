//! Slicing a batch of raw trips into chunks.
//!
//! Every trip lands in exactly one chunk across the whole timeline:
//!
//! - a trip starting inside the batch goes to the chunk containing its start
//! - a trip that started before the window opens goes to chunk 0, provided
//!   its trail is still visible when the window opens
//! - a trip that started before a later batch's start already belongs to an
//!   earlier batch and is discarded here
//! - a trip starting at or after the batch end is discarded

use crate::trip::{Trip, TripId};
use crate::window::{BatchId, ChunkIndex, Timeline, WindowError};
use chrono::TimeDelta;
use std::collections::BTreeMap;

/// Result of slicing one batch.
#[derive(Debug, Default)]
pub struct SlicedBatch {
    /// Non-empty chunks, each ordered by start time then id.
    pub chunks: BTreeMap<ChunkIndex, Vec<Trip>>,
    /// Trips placed into a chunk.
    pub retained: usize,
    /// Trips owned by another batch or never visible.
    pub discarded: usize,
    /// Trips that end before they start.
    pub malformed: Vec<TripId>,
    /// At least one retained trip is still visible after the batch ends.
    pub trail_exceeds_batch: bool,
}

/// Slices `trips` into the chunk range owned by `batch`.
pub fn slice_batch(
    timeline: &Timeline,
    fade: TimeDelta,
    batch: BatchId,
    trips: Vec<Trip>,
) -> Result<SlicedBatch, WindowError> {
    let range = timeline.batch_range(batch)?;
    let window_start = timeline.window_start();
    let mut sliced = SlicedBatch::default();

    for trip in trips {
        if !trip.is_well_formed() {
            sliced.malformed.push(trip.id);
            continue;
        }

        let visible_until = trip.visible_until(fade);
        let chunk = if trip.started_at < window_start {
            (batch == 0 && visible_until >= window_start).then_some(0)
        } else if range.contains(trip.started_at) {
            timeline.chunk_containing(trip.started_at)
        } else {
            None
        };

        match chunk {
            Some(chunk) => {
                if visible_until > range.end {
                    sliced.trail_exceeds_batch = true;
                }
                sliced.chunks.entry(chunk).or_default().push(trip);
                sliced.retained += 1;
            }
            None => sliced.discarded += 1,
        }
    }

    for trips in sliced.chunks.values_mut() {
        trips.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    Ok(sliced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trip::test_support::{trip, window_start};
    use std::time::Duration;

    fn timeline() -> Timeline {
        // 10 chunks of 30s per 300s batch
        Timeline::new(window_start(), Duration::from_secs(30), Duration::from_secs(300)).unwrap()
    }

    fn ids(trips: &[Trip]) -> Vec<&str> {
        trips.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_trips_land_in_start_chunk() {
        let sliced = slice_batch(
            &timeline(),
            TimeDelta::zero(),
            0,
            vec![trip("a", 5, 10), trip("b", 31, 10), trip("c", 299, 1)],
        )
        .unwrap();

        assert_eq!(ids(&sliced.chunks[&0]), vec!["a"]);
        assert_eq!(ids(&sliced.chunks[&1]), vec!["b"]);
        assert_eq!(ids(&sliced.chunks[&9]), vec!["c"]);
        assert_eq!(sliced.retained, 3);
        assert_eq!(sliced.discarded, 0);
    }

    #[test]
    fn test_chunk_indices_offset_by_batch() {
        let sliced = slice_batch(&timeline(), TimeDelta::zero(), 2, vec![trip("a", 665, 5)]).unwrap();
        assert_eq!(sliced.chunks.keys().copied().collect::<Vec<_>>(), vec![22]);
    }

    #[test]
    fn test_pre_window_trips_go_to_first_chunk() {
        let sliced = slice_batch(
            &timeline(),
            TimeDelta::seconds(30),
            0,
            vec![
                trip("running", -60, 120),
                trip("fading", -60, 40),
                trip("gone", -120, 10),
            ],
        )
        .unwrap();

        assert_eq!(ids(&sliced.chunks[&0]), vec!["fading", "running"]);
        assert_eq!(sliced.discarded, 1);
    }

    #[test]
    fn test_later_batch_discards_trips_from_earlier_batch() {
        let sliced = slice_batch(
            &timeline(),
            TimeDelta::zero(),
            1,
            vec![trip("carried", 250, 100), trip("own", 310, 10), trip("next", 600, 5)],
        )
        .unwrap();

        assert_eq!(ids(&sliced.chunks[&10]), vec!["own"]);
        assert_eq!(sliced.retained, 1);
        assert_eq!(sliced.discarded, 2);
    }

    #[test]
    fn test_chunk_order_is_by_start_then_id() {
        let sliced = slice_batch(
            &timeline(),
            TimeDelta::zero(),
            0,
            vec![trip("z", 12, 1), trip("b", 3, 1), trip("a", 12, 1)],
        )
        .unwrap();
        assert_eq!(ids(&sliced.chunks[&0]), vec!["b", "a", "z"]);
    }

    #[test]
    fn test_malformed_trips_are_reported() {
        let sliced = slice_batch(&timeline(), TimeDelta::zero(), 0, vec![trip("bad", 10, -5)]).unwrap();
        assert_eq!(sliced.malformed, vec![TripId::new("bad")]);
        assert!(sliced.chunks.is_empty());
    }

    #[test]
    fn test_trail_past_batch_end_is_flagged() {
        let short = slice_batch(&timeline(), TimeDelta::zero(), 0, vec![trip("a", 10, 20)]).unwrap();
        assert!(!short.trail_exceeds_batch);

        let long = slice_batch(&timeline(), TimeDelta::seconds(60), 0, vec![trip("a", 250, 20)]).unwrap();
        assert!(long.trail_exceeds_batch);
    }
}
