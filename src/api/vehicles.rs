//! Vehicle snapshot endpoint.

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::error::{service_unavailable, ApiError, ErrorResponse};
use crate::cache::ResourceCache;
use crate::views::vehicles::{vehicle_snapshots, VehicleSnapshot};

#[derive(Clone)]
pub struct VehiclesState {
    pub cache: Arc<ResourceCache>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VehicleListResponse {
    pub vehicles: Vec<VehicleSnapshot>,
}

/// All live vehicles with route and headsign context
#[utoipa::path(
    get,
    path = "/api/vehicles",
    responses(
        (status = 200, description = "Live vehicle snapshots", body = VehicleListResponse),
        (status = 503, description = "Vehicle data not polled yet", body = ErrorResponse)
    ),
    tag = "vehicles"
)]
pub async fn list_vehicles(
    State(state): State<VehiclesState>,
) -> Result<Json<VehicleListResponse>, ApiError> {
    let vehicles = state.cache.vehicles().await.ok_or_else(service_unavailable)?;
    let routes = state.cache.routes().await;
    let trips = state.cache.trips().await;

    Ok(Json(VehicleListResponse {
        vehicles: vehicle_snapshots(
            &vehicles.data,
            routes.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
            trips.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
        ),
    }))
}

pub fn router(cache: Arc<ResourceCache>) -> Router {
    let state = VehiclesState { cache };
    Router::new().route("/", get(list_vehicles)).with_state(state)
}
