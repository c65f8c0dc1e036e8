//! The home snapshot endpoint: favorites plus nearby stations for a point.

use axum::extract::{Query, State};
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;

use crate::api::error::{bad_request, internal_error, service_unavailable, ApiError, ErrorResponse};
use crate::stations::aggregate::{AggregateError, AggregationService, HomeSnapshotResponse};

const DEFAULT_RADIUS_M: f64 = 800.0;
const DEFAULT_LIMIT: usize = 6;

#[derive(Clone)]
pub struct HomeState {
    pub aggregator: Arc<AggregationService>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HomeQuery {
    /// Query point latitude (required)
    pub lat: Option<f64>,
    /// Query point longitude (required)
    pub lng: Option<f64>,
    /// Search radius in meters (default 800)
    pub radius: Option<f64>,
    /// Maximum nearby stations (default 6, clamped)
    pub limit: Option<usize>,
    /// Comma-separated favorite stop ids
    pub favorites: Option<String>,
}

/// Rider home view: favorite stations and the nearest boardable stations
#[utoipa::path(
    get,
    path = "/api/home",
    params(HomeQuery),
    responses(
        (status = 200, description = "Favorites and nearby stations with upcoming departures", body = HomeSnapshotResponse),
        (status = 400, description = "Missing or invalid coordinates", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse),
        (status = 503, description = "Stop data not polled yet", body = ErrorResponse)
    ),
    tag = "home"
)]
pub async fn get_home(
    State(state): State<HomeState>,
    Query(query): Query<HomeQuery>,
) -> Result<Json<HomeSnapshotResponse>, ApiError> {
    let (Some(lat), Some(lng)) = (query.lat, query.lng) else {
        return Err(bad_request("lat and lng are required"));
    };
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(bad_request("lat/lng out of range"));
    }

    let radius = query.radius.unwrap_or(DEFAULT_RADIUS_M);
    if radius <= 0.0 {
        return Err(bad_request("radius must be positive"));
    }
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let favorites: Vec<String> = query
        .favorites
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let response = state
        .aggregator
        .build_home_snapshot(lat, lng, radius, limit, &favorites)
        .await
        .map_err(|e| match e {
            AggregateError::DataNotReady => service_unavailable(),
            // favorites are skipped when unknown, so this cannot surface
            // from the home path; treat it as an internal inconsistency
            AggregateError::UnknownStop(id) => {
                tracing::error!(stop_id = %id, "Unexpected unknown stop in home snapshot");
                internal_error()
            }
        })?;

    Ok(Json(response.as_ref().clone()))
}

pub fn router(aggregator: Arc<AggregationService>) -> Router {
    let state = HomeState { aggregator };
    Router::new().route("/", get(get_home)).with_state(state)
}
