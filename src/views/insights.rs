//! System-wide insight projections: per-line pain scores and prediction
//! coverage.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use utoipa::ToSchema;

use crate::models::{Alert, Line, Prediction, Route, Vehicle};

/// Routes below this prediction coverage flag the system as low-coverage.
const LOW_COVERAGE_THRESHOLD_PERCENT: f64 = 40.0;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LinePain {
    pub line_id: String,
    pub name: Option<String>,
    /// 0-100; higher hurts more
    pub pain_score: u32,
    pub active_vehicles: usize,
    pub alert_count: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SystemInsights {
    pub generated_at: DateTime<Utc>,
    pub lines: Vec<LinePain>,
    /// Share of routes with at least one live prediction, 0-100
    pub prediction_coverage_percent: f64,
    pub low_coverage: bool,
    pub total_vehicles: usize,
    pub total_alerts: usize,
}

/// The pain formula is a fixed presentation heuristic; the constants are
/// load-bearing for client compatibility and must not be re-derived.
pub fn pain_score(alert_count: usize, active_vehicles: usize) -> u32 {
    let alert_part = if alert_count > 0 { 30 } else { 0 };
    let vehicle_part = 10u32.saturating_sub(active_vehicles.min(10) as u32);
    (40 + alert_part + vehicle_part).min(100)
}

pub fn system_insights(
    lines: &[Line],
    routes: &[Route],
    vehicles: &[Vehicle],
    alerts: &[Alert],
    predictions: &[Prediction],
) -> SystemInsights {
    let routes_with_predictions: HashSet<&str> = predictions
        .iter()
        .filter_map(|p| p.route_id.as_deref())
        .collect();
    let prediction_coverage_percent = if routes.is_empty() {
        0.0
    } else {
        let covered = routes
            .iter()
            .filter(|r| routes_with_predictions.contains(r.id.as_str()))
            .count();
        covered as f64 / routes.len() as f64 * 100.0
    };

    let line_pain = lines
        .iter()
        .map(|line| {
            let route_ids: HashSet<&str> = routes
                .iter()
                .filter(|r| r.line_id.as_deref() == Some(line.id.as_str()))
                .map(|r| r.id.as_str())
                .collect();
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
            LinePain {
                line_id: line.id.clone(),
                name: line.long_name.clone().or_else(|| line.short_name.clone()),
                pain_score: pain_score(alert_count, active_vehicles),
                active_vehicles,
                alert_count,
            }
        })
        .collect();

    SystemInsights {
        generated_at: Utc::now(),
        lines: line_pain,
        prediction_coverage_percent,
        low_coverage: prediction_coverage_percent < LOW_COVERAGE_THRESHOLD_PERCENT,
        total_vehicles: vehicles.len(),
        total_alerts: alerts.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pain_score_formula() {
        // quiet line, plenty of vehicles
        assert_eq!(pain_score(0, 10), 40);
        assert_eq!(pain_score(0, 20), 40);
        // alerts add a flat 30
        assert_eq!(pain_score(1, 10), 70);
        assert_eq!(pain_score(5, 10), 70);
        // a dead line with alerts saturates below the cap
        assert_eq!(pain_score(1, 0), 80);
        assert_eq!(pain_score(0, 0), 50);
        // partial vehicle presence
        assert_eq!(pain_score(0, 4), 46);
        // never exceeds 100
        assert!(pain_score(99, 0) <= 100);
    }

    #[test]
    fn test_coverage_threshold() {
        let routes: Vec<Route> = (0..5)
            .map(|i| Route {
                id: format!("R{}", i),
                short_name: None,
                long_name: None,
                route_type: Some(3),
                color: None,
                text_color: None,
                direction_names: vec![],
                direction_destinations: vec![],
                sort_order: None,
                line_id: None,
            })
            .collect();
        // one of five routes has a prediction: 20%, below the 40% bar
        let predictions = vec![Prediction {
            id: "p1".to_string(),
            stop_id: None,
            route_id: Some("R0".to_string()),
            trip_id: None,
            direction_id: None,
            stop_sequence: None,
            arrival_time: None,
            departure_time: None,
            status: None,
        }];
        let insights = system_insights(&[], &routes, &[], &[], &predictions);
        assert!((insights.prediction_coverage_percent - 20.0).abs() < f64::EPSILON);
        assert!(insights.low_coverage);

        let insights = system_insights(&[], &routes[..2], &[], &[], &predictions);
        assert!((insights.prediction_coverage_percent - 50.0).abs() < f64::EPSILON);
        assert!(!insights.low_coverage);
    }

    #[test]
    fn test_empty_route_set_reports_zero_coverage() {
        let insights = system_insights(&[], &[], &[], &[], &[]);
        assert_eq!(insights.prediction_coverage_percent, 0.0);
        assert!(insights.low_coverage);
    }
}
