//! In-memory trip store.

use super::{StoreError, TripStore};
use crate::trip::Trip;
use crate::window::TimeRange;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Trip store holding every record in memory, sorted by start time.
///
/// Range queries bound the scan by start time, so a query only walks trips
/// that started before the range ends.
#[derive(Debug, Clone, Default)]
pub struct MemoryTripStore {
    name: String,
    trips: Vec<Trip>,
}

impl MemoryTripStore {
    /// Creates a store from an unordered set of trips.
    pub fn new(name: impl Into<String>, mut trips: Vec<Trip>) -> Self {
        trips.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        Self {
            name: name.into(),
            trips,
        }
    }

    /// Loads a JSON-lines file with one [`Trip`] object per line.
    ///
    /// Blank lines are skipped. The first malformed line aborts the load with
    /// its line number in the error message.
    pub fn from_json_lines(path: &Path) -> Result<Self, StoreError> {
        let load_error = |message: String| StoreError::Load {
            path: path.to_path_buf(),
            message,
        };

        let file = File::open(path).map_err(|e| load_error(e.to_string()))?;
        let mut trips = Vec::new();

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| load_error(e.to_string()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let trip: Trip = serde_json::from_str(line)
                .map_err(|e| load_error(format!("line {}: {}", line_no + 1, e)))?;
            trips.push(trip);
        }

        info!(path = %path.display(), trips = trips.len(), "Loaded trip file");

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "trips".to_string());
        Ok(Self::new(name, trips))
    }

    /// Number of trips held.
    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    /// Start time of the earliest trip, if any.
    pub fn earliest_start(&self) -> Option<DateTime<Utc>> {
        self.trips.first().map(|t| t.started_at)
    }

    fn started_before(&self, instant: DateTime<Utc>) -> &[Trip] {
        let end = self.trips.partition_point(|t| t.started_at < instant);
        &self.trips[..end]
    }
}

impl TripStore for MemoryTripStore {
    async fn trips_in_range(&self, range: TimeRange) -> Result<Vec<Trip>, StoreError> {
        Ok(self
            .started_before(range.end)
            .iter()
            .filter(|t| t.intersects(&range))
            .cloned()
            .collect())
    }

    async fn trips_overlapping(&self, range: TimeRange) -> Result<Vec<Trip>, StoreError> {
        Ok(self
            .started_before(range.start)
            .iter()
            .filter(|t| t.intersects(&range))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trip::test_support::{trip, window_start};
    use chrono::TimeDelta;
    use std::io::Write;

    fn range(from_secs: i64, to_secs: i64) -> TimeRange {
        TimeRange::new(
            window_start() + TimeDelta::seconds(from_secs),
            window_start() + TimeDelta::seconds(to_secs),
        )
    }

    fn ids(trips: &[Trip]) -> Vec<&str> {
        trips.iter().map(|t| t.id.as_str()).collect()
    }

    fn store() -> MemoryTripStore {
        MemoryTripStore::new(
            "test",
            vec![
                trip("late", 4000, 60),
                trip("early", -120, 60),
                trip("spanning", -60, 600),
                trip("first", 10, 60),
            ],
        )
    }

    #[tokio::test]
    async fn test_range_query_returns_intersecting_trips() {
        let trips = store().trips_in_range(range(0, 3600)).await.unwrap();
        assert_eq!(ids(&trips), vec!["spanning", "first"]);
    }

    #[tokio::test]
    async fn test_overlap_query_returns_in_progress_trips_only() {
        let trips = store().trips_overlapping(range(0, 30)).await.unwrap();
        assert_eq!(ids(&trips), vec!["spanning"]);
    }

    #[test]
    fn test_earliest_start() {
        assert_eq!(
            store().earliest_start(),
            Some(window_start() - TimeDelta::seconds(120))
        );
        assert_eq!(MemoryTripStore::default().earliest_start(), None);
    }

    #[test]
    fn test_load_json_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for t in [trip("a", 0, 60), trip("b", 30, 60)] {
            writeln!(file, "{}", serde_json::to_string(&t).unwrap()).unwrap();
        }
        writeln!(file).unwrap();

        let store = MemoryTripStore::from_json_lines(file.path()).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_load_reports_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", serde_json::to_string(&trip("a", 0, 60)).unwrap()).unwrap();
        writeln!(file, "not json").unwrap();

        let err = MemoryTripStore::from_json_lines(file.path()).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }
}
