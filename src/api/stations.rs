//! Station listing and the per-station departure board.

use axum::extract::{Path, Query, State};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{not_found, service_unavailable, ApiError, ErrorResponse};
use crate::cache::ResourceCache;
use crate::models::Stop;
use crate::stations::aggregate::{
    distance_meters, AggregateError, AggregationService, StationBoardResponse,
};
use crate::stations::topology::{classify, StopKind};

#[derive(Clone)]
pub struct StationsState {
    pub cache: Arc<ResourceCache>,
    pub aggregator: Arc<AggregationService>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StationListResponse {
    pub stations: Vec<Stop>,
}

/// All station-level stops currently known
#[utoipa::path(
    get,
    path = "/api/stations",
    responses(
        (status = 200, description = "Station-level stops", body = StationListResponse),
        (status = 503, description = "Stop data not polled yet", body = ErrorResponse)
    ),
    tag = "stations"
)]
pub async fn list_stations(
    State(state): State<StationsState>,
) -> Result<Json<StationListResponse>, ApiError> {
    let entry = state.cache.stops().await.ok_or_else(service_unavailable)?;
    let stations: Vec<Stop> = entry
        .data
        .stops
        .iter()
        .filter(|s| classify(s) == StopKind::Station)
        .cloned()
        .collect();
    Ok(Json(StationListResponse { stations }))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct BoardQuery {
    /// Optional rider latitude, for the distance field
    pub lat: Option<f64>,
    /// Optional rider longitude, for the distance field
    pub lng: Option<f64>,
}

/// Departure board for one station (or any of its platforms/entrances)
#[utoipa::path(
    get,
    path = "/api/stations/{stop_id}/board",
    params(
        ("stop_id" = String, Path, description = "Stop id; resolved to its boardable parent"),
        BoardQuery
    ),
    responses(
        (status = 200, description = "Merged departure board for the station", body = StationBoardResponse),
        (status = 404, description = "Unknown or non-boardable stop", body = ErrorResponse),
        (status = 503, description = "Stop data not polled yet", body = ErrorResponse)
    ),
    tag = "stations"
)]
pub async fn get_station_board(
    State(state): State<StationsState>,
    Path(stop_id): Path<String>,
    Query(query): Query<BoardQuery>,
) -> Result<Json<StationBoardResponse>, ApiError> {
    let mut board = state
        .aggregator
        .station_board(&stop_id)
        .await
        .map_err(|e| match e {
            AggregateError::DataNotReady => service_unavailable(),
            AggregateError::UnknownStop(id) => not_found(format!("Unknown stop: {}", id)),
        })?;

    if let (Some(lat), Some(lng), Some(slat), Some(slng)) = (
        query.lat,
        query.lng,
        board.primary.latitude,
        board.primary.longitude,
    ) {
        board.primary.distance_m = Some(distance_meters(lat, lng, slat, slng));
    }

    Ok(Json(board))
}

pub fn router(cache: Arc<ResourceCache>, aggregator: Arc<AggregationService>) -> Router {
    let state = StationsState { cache, aggregator };
    Router::new()
        .route("/", get(list_stations))
        .route("/{stop_id}/board", get(get_station_board))
        .with_state(state)
}
