//! Blended departures for a single stop.

use axum::extract::{Path, Query, State};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{bad_request, not_found, service_unavailable, ApiError, ErrorResponse};
use crate::cache::ResourceCache;
use crate::departures::blend::{fetch_blended_departures, BlendOptions, BlendedDeparture};
use crate::providers::UpstreamClient;

#[derive(Clone)]
pub struct DeparturesState {
    pub cache: Arc<ResourceCache>,
    pub client: Arc<UpstreamClient>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DeparturesQuery {
    /// Lookahead in minutes (default 30, max 180)
    pub lookahead: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopDeparturesResponse {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub departures: Vec<BlendedDeparture>,
}

/// Live blended departures for one stop
#[utoipa::path(
    get,
    path = "/api/stops/{stop_id}/departures",
    params(
        ("stop_id" = String, Path, description = "Stop id"),
        DeparturesQuery
    ),
    responses(
        (status = 200, description = "Time-ordered blended departures", body = StopDeparturesResponse),
        (status = 400, description = "Invalid lookahead", body = ErrorResponse),
        (status = 404, description = "Unknown stop", body = ErrorResponse),
        (status = 503, description = "Upstream fetch failed", body = ErrorResponse)
    ),
    tag = "departures"
)]
pub async fn get_stop_departures(
    State(state): State<DeparturesState>,
    Path(stop_id): Path<String>,
    Query(query): Query<DeparturesQuery>,
) -> Result<Json<StopDeparturesResponse>, ApiError> {
    let lookahead = query.lookahead.unwrap_or(30);
    if !(1..=180).contains(&lookahead) {
        return Err(bad_request("lookahead must be between 1 and 180 minutes"));
    }

    // resolve the stop name from the cache when possible, from upstream
    // otherwise; an unknown id is a 404 before any blending happens
    let cached_name = match state.cache.stops().await {
        Some(entry) => entry
            .data
            .stops
            .iter()
            .find(|s| s.id == stop_id)
            .map(|s| s.name.clone()),
        None => None,
    };
    let stop_name = match cached_name {
        Some(name) => name,
        None => match state.client.stop(&stop_id).await {
            Ok(Some(stop)) => stop.name,
            Ok(None) => return Err(not_found(format!("Unknown stop: {}", stop_id))),
            Err(e) => {
                tracing::warn!(stop_id = %stop_id, error = %e, "Stop lookup failed, continuing without name");
                None
            }
        },
    };

    let opts = BlendOptions {
        max_lookahead_minutes: lookahead,
        stop_name: stop_name.clone(),
        ..BlendOptions::default()
    };
    let departures = fetch_blended_departures(&state.client, &stop_id, &opts)
        .await
        .map_err(|e| {
            tracing::error!(stop_id = %stop_id, error = %e, "Blended departure fetch failed");
            service_unavailable()
        })?;

    Ok(Json(StopDeparturesResponse {
        stop_id,
        stop_name,
        departures,
    }))
}

pub fn router(cache: Arc<ResourceCache>, client: Arc<UpstreamClient>) -> Router {
    let state = DeparturesState { cache, client };
    Router::new()
        .route("/{stop_id}/departures", get(get_stop_departures))
        .with_state(state)
}
