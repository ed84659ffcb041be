//! Trip records as delivered by the backing store.

use crate::window::TimeRange;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Stable identifier of a trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(String);

impl TripId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TripId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TripId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// One historical trip.
///
/// Immutable once fetched. The optional `route` is the polyline the renderer
/// animates along; without it the renderer interpolates between `origin` and
/// `destination`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<GeoPoint>,
}

impl Trip {
    pub fn new(
        id: impl Into<TripId>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Self {
        Self {
            id: id.into(),
            started_at,
            ended_at,
            origin,
            destination,
            route: Vec::new(),
        }
    }

    pub fn with_route(mut self, route: Vec<GeoPoint>) -> Self {
        self.route = route;
        self
    }

    /// Time between pickup and drop-off.
    pub fn duration(&self) -> TimeDelta {
        self.ended_at - self.started_at
    }

    /// A trip must not end before it starts.
    pub fn is_well_formed(&self) -> bool {
        self.ended_at >= self.started_at
    }

    /// Last instant the trip is drawn, including its fading trail.
    pub fn visible_until(&self, fade: TimeDelta) -> DateTime<Utc> {
        self.ended_at
            .checked_add_signed(fade)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns true if the trip is in progress at `instant` (both ends inclusive).
    pub fn is_active_at(&self, instant: DateTime<Utc>) -> bool {
        self.started_at <= instant && instant <= self.ended_at
    }

    /// Returns true if the trip's active span intersects `range`.
    pub fn intersects(&self, range: &TimeRange) -> bool {
        self.started_at < range.end && self.ended_at >= range.start
    }
}

/// Merges two query results by trip id.
///
/// Every trip of `primary` is kept in order; trips of `secondary` are appended
/// only when their id has not been seen yet, so `primary` wins on conflicts.
pub fn merge_by_id(primary: Vec<Trip>, secondary: Vec<Trip>) -> Vec<Trip> {
    let mut seen: HashSet<TripId> = HashSet::with_capacity(primary.len() + secondary.len());
    let mut merged = Vec::with_capacity(primary.len() + secondary.len());

    for trip in primary.into_iter().chain(secondary) {
        if seen.insert(trip.id.clone()) {
            merged.push(trip);
        }
    }

    merged
}
