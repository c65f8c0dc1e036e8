//! Line summaries and overviews: joins over the cached resource collections.
//!
//! Headway is observed as the mean gap between consecutive predicted arrivals
//! per direction and compared against a typical value per route type to
//! classify segment health.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use utoipa::ToSchema;

use crate::models::{Alert, Line, Prediction, Route, Shape, Vehicle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SegmentHealth {
    Good,
    MinorIssues,
    MajorIssues,
}

impl SegmentHealth {
    fn severity(self) -> u8 {
        match self {
            SegmentHealth::Good => 0,
            SegmentHealth::MinorIssues => 1,
            SegmentHealth::MajorIssues => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DirectionHeadway {
    pub direction_id: Option<u8>,
    pub mean_headway_minutes: Option<f64>,
    pub typical_headway_minutes: f64,
    pub health: SegmentHealth,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LineSummary {
    pub id: String,
    pub name: Option<String>,
    pub color: Option<String>,
    pub text_color: Option<String>,
    pub route_ids: Vec<String>,
    pub active_vehicles: usize,
    pub alert_count: usize,
    pub health: SegmentHealth,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LineOverview {
    pub line: Line,
    pub routes: Vec<Route>,
    pub vehicles: Vec<Vehicle>,
    pub alerts: Vec<Alert>,
    pub headways: Vec<DirectionHeadway>,
    pub health: SegmentHealth,
}

/// Typical headway in minutes by provider route type. Presentation
/// heuristics, not measurements.
pub fn typical_headway_minutes(route_type: Option<i32>) -> f64 {
    match route_type {
        Some(0) => 6.0,  // light rail
        Some(1) => 9.0,  // heavy rail
        Some(2) => 30.0, // commuter rail
        Some(4) => 60.0, // ferry
        _ => 15.0,       // bus and anything unclassified
    }
}

/// Mean gap between consecutive times, in minutes. Needs at least two times.
pub fn mean_headway_minutes(times: &[DateTime<Utc>]) -> Option<f64> {
    if times.len() < 2 {
        return None;
    }
    let mut sorted = times.to_vec();
    sorted.sort();
    let total_minutes: f64 = sorted
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64 / 60_000.0)
        .sum();
    Some(total_minutes / (sorted.len() - 1) as f64)
}

/// Good when close to typical, major when service has effectively halved,
/// minor otherwise, including when no headway could be computed at all.
pub fn classify_health(observed: Option<f64>, typical: f64) -> SegmentHealth {
    match observed {
        None => SegmentHealth::MinorIssues,
        Some(headway) if headway <= typical + 2.0 => SegmentHealth::Good,
        Some(headway) if headway > typical * 2.0 => SegmentHealth::MajorIssues,
        Some(_) => SegmentHealth::MinorIssues,
    }
}

fn routes_of_line<'a>(line_id: &str, routes: &'a [Route]) -> Vec<&'a Route> {
    routes
        .iter()
        .filter(|r| r.line_id.as_deref() == Some(line_id))
        .collect()
}

/// Per-direction headway classification over a line's prediction pool.
pub fn direction_headways(
    line_routes: &[&Route],
    predictions: &[Prediction],
) -> Vec<DirectionHeadway> {
    let route_ids: HashSet<&str> = line_routes.iter().map(|r| r.id.as_str()).collect();
    let typical = line_routes
        .iter()
        .map(|r| typical_headway_minutes(r.route_type))
        .fold(f64::INFINITY, f64::min);
    let typical = if typical.is_finite() { typical } else { 15.0 };

    [Some(0u8), Some(1u8)]
        .into_iter()
        .map(|direction_id| {
            let times: Vec<DateTime<Utc>> = predictions
                .iter()
                .filter(|p| {
                    p.direction_id == direction_id
                        && p.route_id
                            .as_deref()
                            .map(|id| route_ids.contains(id))
                            .unwrap_or(false)
                })
                .filter_map(|p| p.best_time())
                .collect();
            let observed = mean_headway_minutes(&times);
            DirectionHeadway {
                direction_id,
                mean_headway_minutes: observed,
                typical_headway_minutes: typical,
                health: classify_health(observed, typical),
            }
        })
        .collect()
}

fn overall_health(headways: &[DirectionHeadway]) -> SegmentHealth {
    headways
        .iter()
        .map(|h| h.health)
        .max_by_key(|h| h.severity())
        .unwrap_or(SegmentHealth::MinorIssues)
}

pub fn line_summaries(
    lines: &[Line],
    routes: &[Route],
    vehicles: &[Vehicle],
    alerts: &[Alert],
    predictions: &[Prediction],
) -> Vec<LineSummary> {
    lines
        .iter()
        .map(|line| {
            let line_routes = routes_of_line(&line.id, routes);
            let route_ids: HashSet<&str> = line_routes.iter().map(|r| r.id.as_str()).collect();
            let active_vehicles = vehicles
                .iter()
                .filter(|v| {
                    v.route_id
                        .as_deref()
                        .map(|id| route_ids.contains(id))
                        .unwrap_or(false)
                })
                .count();
            let alert_count = alerts
                .iter()
                .filter(|a| a.route_ids.iter().any(|id| route_ids.contains(id.as_str())))
                .count();
            let headways = direction_headways(&line_routes, predictions);
            LineSummary {
                id: line.id.clone(),
                name: line.long_name.clone().or_else(|| line.short_name.clone()),
                color: line.color.clone(),
                text_color: line.text_color.clone(),
                route_ids: line_routes.iter().map(|r| r.id.clone()).collect(),
                active_vehicles,
                alert_count,
                health: overall_health(&headways),
            }
        })
        .collect()
}

pub fn line_overview(
    line: &Line,
    routes: &[Route],
    vehicles: &[Vehicle],
    alerts: &[Alert],
    predictions: &[Prediction],
) -> LineOverview {
    let line_routes = routes_of_line(&line.id, routes);
    let route_ids: HashSet<&str> = line_routes.iter().map(|r| r.id.as_str()).collect();
    let headways = direction_headways(&line_routes, predictions);
    LineOverview {
        line: line.clone(),
        routes: line_routes.iter().map(|&r| r.clone()).collect(),
        vehicles: vehicles
            .iter()
            .filter(|v| {
                v.route_id
                    .as_deref()
                    .map(|id| route_ids.contains(id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect(),
        alerts: alerts
            .iter()
            .filter(|a| a.route_ids.iter().any(|id| route_ids.contains(id.as_str())))
            .cloned()
            .collect(),
        health: overall_health(&headways),
        headways,
    }
}

/// Shapes for one route.
pub fn shapes_for_route(shapes: &[Shape], route_id: &str) -> Vec<Shape> {
    shapes
        .iter()
        .filter(|s| s.route_id == route_id)
        .cloned()
        .collect()
}

/// Shapes for every route of a line.
pub fn shapes_for_line(shapes: &[Shape], routes: &[Route], line_id: &str) -> Vec<Shape> {
    let route_ids: HashSet<&str> = routes_of_line(line_id, routes)
        .iter()
        .map(|r| r.id.as_str())
        .collect();
    shapes
        .iter()
        .filter(|s| route_ids.contains(s.route_id.as_str()))
        .cloned()
        .collect()
}
