//! Line listing, overview, and shape endpoints.

use axum::extract::{Path, State};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::error::{not_found, service_unavailable, ApiError, ErrorResponse};
use crate::cache::ResourceCache;
use crate::models::Shape;
use crate::views::lines::{
    line_overview, line_summaries, shapes_for_line, shapes_for_route, LineOverview, LineSummary,
};

#[derive(Clone)]
pub struct LinesState {
    pub cache: Arc<ResourceCache>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LineListResponse {
    pub lines: Vec<LineSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ShapeListResponse {
    pub shapes: Vec<Shape>,
}

/// Summaries for all lines with vehicle/alert counts and health
#[utoipa::path(
    get,
    path = "/api/lines",
    responses(
        (status = 200, description = "All lines with service health", body = LineListResponse),
        (status = 503, description = "Line data not polled yet", body = ErrorResponse)
    ),
    tag = "lines"
)]
pub async fn list_lines(
    State(state): State<LinesState>,
) -> Result<Json<LineListResponse>, ApiError> {
    let lines = state.cache.lines().await.ok_or_else(service_unavailable)?;
    let routes = state.cache.routes().await.ok_or_else(service_unavailable)?;
    // realtime tiers may simply not have arrived yet; they degrade to empty
    let vehicles = state.cache.vehicles().await;
    let alerts = state.cache.alerts().await;
    let predictions = state.cache.predictions().await;

    let summaries = line_summaries(
        &lines.data,
        &routes.data,
        vehicles.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
        alerts.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
        predictions.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
    );
    Ok(Json(LineListResponse { lines: summaries }))
}

/// Full overview of one line: routes, vehicles, alerts, headways
#[utoipa::path(
    get,
    path = "/api/lines/{line_id}/overview",
    params(("line_id" = String, Path, description = "Line id")),
    responses(
        (status = 200, description = "Line overview", body = LineOverview),
        (status = 404, description = "Unknown line", body = ErrorResponse),
        (status = 503, description = "Line data not polled yet", body = ErrorResponse)
    ),
    tag = "lines"
)]
pub async fn get_line_overview(
    State(state): State<LinesState>,
    Path(line_id): Path<String>,
) -> Result<Json<LineOverview>, ApiError> {
    let lines = state.cache.lines().await.ok_or_else(service_unavailable)?;
    let routes = state.cache.routes().await.ok_or_else(service_unavailable)?;
    let line = lines
        .data
        .iter()
        .find(|l| l.id == line_id)
        .ok_or_else(|| not_found(format!("Unknown line: {}", line_id)))?;

    let vehicles = state.cache.vehicles().await;
    let alerts = state.cache.alerts().await;
    let predictions = state.cache.predictions().await;

    Ok(Json(line_overview(
        line,
        &routes.data,
        vehicles.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
        alerts.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
        predictions.as_ref().map(|e| e.data.as_slice()).unwrap_or(&[]),
    )))
}

/// Shapes for every route of a line
#[utoipa::path(
    get,
    path = "/api/lines/{line_id}/shapes",
    params(("line_id" = String, Path, description = "Line id")),
    responses(
        (status = 200, description = "Route geometries of the line", body = ShapeListResponse),
        (status = 404, description = "Unknown line", body = ErrorResponse),
        (status = 503, description = "Shape data not polled yet", body = ErrorResponse)
    ),
    tag = "lines"
)]
pub async fn get_line_shapes(
    State(state): State<LinesState>,
    Path(line_id): Path<String>,
) -> Result<Json<ShapeListResponse>, ApiError> {
    let lines = state.cache.lines().await.ok_or_else(service_unavailable)?;
    if !lines.data.iter().any(|l| l.id == line_id) {
        return Err(not_found(format!("Unknown line: {}", line_id)));
    }
    let routes = state.cache.routes().await.ok_or_else(service_unavailable)?;
    let shapes = state.cache.shapes().await.ok_or_else(service_unavailable)?;
    Ok(Json(ShapeListResponse {
        shapes: shapes_for_line(&shapes.data, &routes.data, &line_id),
    }))
}

/// Shapes for one route
#[utoipa::path(
    get,
    path = "/api/routes/{route_id}/shapes",
    params(("route_id" = String, Path, description = "Route id")),
    responses(
        (status = 200, description = "Geometries of the route", body = ShapeListResponse),
        (status = 404, description = "Unknown route", body = ErrorResponse),
        (status = 503, description = "Shape data not polled yet", body = ErrorResponse)
    ),
    tag = "lines"
)]
pub async fn get_route_shapes(
    State(state): State<LinesState>,
    Path(route_id): Path<String>,
) -> Result<Json<ShapeListResponse>, ApiError> {
    let routes = state.cache.routes().await.ok_or_else(service_unavailable)?;
    if !routes.data.iter().any(|r| r.id == route_id) {
        return Err(not_found(format!("Unknown route: {}", route_id)));
    }
    let shapes = state.cache.shapes().await.ok_or_else(service_unavailable)?;
    Ok(Json(ShapeListResponse {
        shapes: shapes_for_route(&shapes.data, &route_id),
    }))
}

pub fn lines_router(cache: Arc<ResourceCache>) -> Router {
    let state = LinesState { cache };
    Router::new()
        .route("/", get(list_lines))
        .route("/{line_id}/overview", get(get_line_overview))
        .route("/{line_id}/shapes", get(get_line_shapes))
        .with_state(state)
}

pub fn routes_router(cache: Arc<ResourceCache>) -> Router {
    let state = LinesState { cache };
    Router::new()
        .route("/{route_id}/shapes", get(get_route_shapes))
        .with_state(state)
}
