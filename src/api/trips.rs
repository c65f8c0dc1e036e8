//! Trip tracking endpoint.

use axum::extract::{Path, State};
use axum::{routing::get, Json, Router};
use chrono::Utc;
use std::sync::Arc;

use crate::api::error::{not_found, service_unavailable, ApiError, ErrorResponse};
use crate::cache::ResourceCache;
use crate::providers::UpstreamClient;
use crate::views::trips::{trip_track, TripTrack};

#[derive(Clone)]
pub struct TripsState {
    pub cache: Arc<ResourceCache>,
    pub client: Arc<UpstreamClient>,
}

/// Track one trip: its vehicle and the upcoming stops
#[utoipa::path(
    get,
    path = "/api/trips/{trip_id}/track",
    params(("trip_id" = String, Path, description = "Trip id")),
    responses(
        (status = 200, description = "Trip with vehicle position and upcoming stops", body = TripTrack),
        (status = 404, description = "Unknown trip", body = ErrorResponse),
        (status = 503, description = "Trip data not polled yet", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn get_trip_track(
    State(state): State<TripsState>,
    Path(trip_id): Path<String>,
) -> Result<Json<TripTrack>, ApiError> {
    let trips = state.cache.trips().await.ok_or_else(service_unavailable)?;
    let routes = state.cache.routes().await;
    let vehicles = state.cache.vehicles().await;
    let predictions = state.cache.predictions().await;
    let stops = state.cache.stops().await;

    // the trip cache only covers currently-polled routes; fall back to a
    // live lookup before answering 404
    let mut trip_pool = trips.data.as_ref().clone();
    if !trip_pool.iter().any(|t| t.id == trip_id) {
        match state.client.trip(&trip_id).await {
            Ok(Some(trip)) => trip_pool.push(trip),
            Ok(None) => return Err(not_found(format!("Unknown trip: {}", trip_id))),
            Err(e) => {
                tracing::warn!(trip_id = %trip_id, error = %e, "Live trip lookup failed");
                return Err(not_found(format!("Unknown trip: {}", trip_id)));
            }
        }
    }

    let track = trip_track(
        &trip_id,
        &trip_pool,
        routes.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
        vehicles.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
        predictions.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
        stops.as_ref().map(|e| e.data.stops.as_slice()).unwrap_or(&[]),
        Utc::now(),
    )
    .ok_or_else(|| not_found(format!("Unknown trip: {}", trip_id)))?;

    Ok(Json(track))
}

pub fn router(cache: Arc<ResourceCache>, client: Arc<UpstreamClient>) -> Router {
    let state = TripsState { cache, client };
    Router::new()
        .route("/{trip_id}/track", get(get_trip_track))
        .with_state(state)
}
