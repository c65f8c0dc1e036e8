//! System insights and health endpoints.

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::error::{service_unavailable, ApiError, ErrorResponse};
use crate::cache::{CacheHealth, ResourceCache};
use crate::models::LiveFacility;
use crate::providers::{TelemetrySnapshot, UpstreamClient};
use crate::views::insights::{system_insights, SystemInsights};

#[derive(Clone)]
pub struct SystemState {
    pub cache: Arc<ResourceCache>,
    pub client: Arc<UpstreamClient>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the service is running
    pub healthy: bool,
    pub cache: CacheHealth,
    pub upstream: TelemetrySnapshot,
}

/// Per-line pain scores and system-wide prediction coverage
#[utoipa::path(
    get,
    path = "/api/system/insights",
    responses(
        (status = 200, description = "System insight projection", body = SystemInsights),
        (status = 503, description = "Static data not polled yet", body = ErrorResponse)
    ),
    tag = "system"
)]
pub async fn get_insights(
    State(state): State<SystemState>,
) -> Result<Json<SystemInsights>, ApiError> {
    let lines = state.cache.lines().await.ok_or_else(service_unavailable)?;
    let routes = state.cache.routes().await.ok_or_else(service_unavailable)?;
    let vehicles = state.cache.vehicles().await;
    let alerts = state.cache.alerts().await;
    let predictions = state.cache.predictions().await;

    Ok(Json(system_insights(
        &lines.data,
        &routes.data,
        vehicles.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
        alerts.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
        predictions.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
    )))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FacilityListResponse {
    pub facilities: Vec<LiveFacility>,
}

/// Live facility state (elevators, parking), proxied from the provider
#[utoipa::path(
    get,
    path = "/api/system/facilities",
    responses(
        (status = 200, description = "Live facility readings", body = FacilityListResponse),
        (status = 503, description = "Upstream fetch failed", body = ErrorResponse)
    ),
    tag = "system"
)]
pub async fn get_live_facilities(
    State(state): State<SystemState>,
) -> Result<Json<FacilityListResponse>, ApiError> {
    let facilities = state.client.live_facilities().await.map_err(|e| {
        tracing::error!(error = %e, "Live facility fetch failed");
        service_unavailable()
    })?;
    Ok(Json(FacilityListResponse { facilities }))
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<SystemState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        cache: state.cache.health().await,
        upstream: state.client.telemetry().await,
    })
}

pub fn system_router(cache: Arc<ResourceCache>, client: Arc<UpstreamClient>) -> Router {
    let state = SystemState { cache, client };
    Router::new()
        .route("/insights", get(get_insights))
        .route("/facilities", get(get_live_facilities))
        .with_state(state)
}

pub fn health_router(cache: Arc<ResourceCache>, client: Arc<UpstreamClient>) -> Router {
    let state = SystemState { cache, client };
    Router::new().route("/", get(health_check)).with_state(state)
}
