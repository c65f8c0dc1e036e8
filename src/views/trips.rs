//! Trip tracking: one trip joined with its vehicle and upcoming stops.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::departures::blend::{derive_status, DepartureStatus};
use crate::models::{Prediction, Route, Stop, Trip, Vehicle};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrackStop {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub stop_sequence: Option<i64>,
    pub time: Option<DateTime<Utc>>,
    pub eta_minutes: Option<i64>,
    pub status: DepartureStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TripTrack {
    pub trip: Trip,
    pub route: Option<Route>,
    pub vehicle: Option<Vehicle>,
    pub upcoming_stops: Vec<TrackStop>,
}

/// Build the track view for a trip from cached collections. Relationship-id
/// joins only; `None` when the trip is not in the cache.
pub fn trip_track(
    trip_id: &str,
    trips: &[Trip],
    routes: &[Route],
    vehicles: &[Vehicle],
    predictions: &[Prediction],
    stops: &[Stop],
    now: DateTime<Utc>,
) -> Option<TripTrack> {
    let trip = trips.iter().find(|t| t.id == trip_id)?.clone();

    let route = trip
        .route_id
        .as_deref()
        .and_then(|rid| routes.iter().find(|r| r.id == rid))
        .cloned();
    let vehicle = vehicles
        .iter()
        .find(|v| v.trip_id.as_deref() == Some(trip_id))
        .cloned();

    let mut upcoming: Vec<TrackStop> = predictions
        .iter()
        .filter(|p| p.trip_id.as_deref() == Some(trip_id))
        .filter_map(|p| {
            let time = p.best_time();
            // stops already behind the vehicle drop out of the track
            if let Some(t) = time {
                if t < now {
                    return None;
                }
            }
            let stop_id = p.stop_id.clone()?;
            let stop_name = stops
                .iter()
                .find(|s| s.id == stop_id)
                .and_then(|s| s.name.clone());
            Some(TrackStop {
                stop_id,
                stop_name,
                stop_sequence: p.stop_sequence,
                time,
                eta_minutes: time
                    .map(|t| ((t - now).num_milliseconds() as f64 / 60_000.0).round() as i64),
                status: match p.status.as_deref() {
                    Some(text) => derive_status(Some(text)),
                    None => DepartureStatus::Unknown,
                },
            })
        })
        .collect();
    upcoming.sort_by_key(|s| s.stop_sequence);

    Some(TripTrack {
        trip,
        route,
        vehicle,
        upcoming_stops: upcoming,
    })
}
