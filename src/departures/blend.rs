//! Blending of scheduled and predicted departures for a single stop.
//!
//! Schedules and predictions arrive as two independent collections that only
//! loosely correlate. A schedule row and a prediction row describe the same
//! departure when they agree on the `(trip, stop, stop-sequence)` key; matched
//! pairs collapse into one blended row carrying both times, while leftovers on
//! either side surface on their own.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Prediction, ScheduledDeparture};
use crate::providers::{UpstreamClient, UpstreamError};
use std::collections::HashMap;

/// Provenance of a departure's final time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EtaSource {
    Prediction,
    Schedule,
    Blended,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DepartureStatus {
    OnTime,
    Delayed,
    Cancelled,
    Skipped,
    NoService,
    Unknown,
}

/// One reconciled departure row. Immutable once built; the interpolation pass
/// works on copies.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BlendedDeparture {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<u8>,
    pub trip_id: Option<String>,
    pub stop_sequence: Option<i64>,
    pub headsign: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub predicted_time: Option<DateTime<Utc>>,
    /// Predicted time when present, scheduled time otherwise. Rows without a
    /// final time never reach a caller.
    pub final_time: Option<DateTime<Utc>>,
    pub eta_minutes: Option<i64>,
    pub eta_source: EtaSource,
    pub status: DepartureStatus,
    /// Whole minutes between predicted and scheduled time, when both exist
    pub discrepancy_minutes: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BlendOptions {
    pub now: Option<DateTime<Utc>>,
    /// Clock-time width of the schedule fetch, wider than the lookahead
    pub window_minutes: i64,
    pub min_lookahead_minutes: i64,
    pub max_lookahead_minutes: i64,
    pub max_results: usize,
    pub stop_name: Option<String>,
}

impl Default for BlendOptions {
    fn default() -> Self {
        Self {
            now: None,
            window_minutes: 90,
            min_lookahead_minutes: -2,
            max_lookahead_minutes: 30,
            max_results: 200,
            stop_name: None,
        }
    }
}

impl BlendOptions {
    pub fn resolved_now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            now + Duration::minutes(self.min_lookahead_minutes),
            now + Duration::minutes(self.max_lookahead_minutes),
        )
    }
}

/// Whole-minute rounding of a time delta, matching display math everywhere.
fn round_minutes(delta: chrono::TimeDelta) -> i64 {
    (delta.num_milliseconds() as f64 / 60_000.0).round() as i64
}

/// Map the provider's free-text status onto a departure status.
///
/// Substring matching in a fixed priority order; this mirrors the upstream
/// wording and must not be reordered.
pub fn derive_status(status_text: Option<&str>) -> DepartureStatus {
    let Some(text) = status_text else {
        return DepartureStatus::OnTime;
    };
    let lower = text.to_lowercase();
    if lower.contains("delay") {
        DepartureStatus::Delayed
    } else if lower.contains("cancel") {
        DepartureStatus::Cancelled
    } else if lower.contains("skip") {
        DepartureStatus::Skipped
    } else if lower.contains("no service") {
        DepartureStatus::NoService
    } else if lower.contains("hold") {
        DepartureStatus::Delayed
    } else {
        DepartureStatus::OnTime
    }
}

fn build_row(
    stop_id: &str,
    stop_name: Option<&str>,
    schedule: Option<&ScheduledDeparture>,
    prediction: Option<&Prediction>,
    now: DateTime<Utc>,
) -> BlendedDeparture {
    let scheduled_time = schedule.and_then(|s| s.best_time());
    let predicted_time = prediction.and_then(|p| p.best_time());
    let final_time = predicted_time.or(scheduled_time);

    let (eta_source, status) = match (prediction, schedule) {
        (Some(p), Some(_)) => (EtaSource::Prediction, derive_status(p.status.as_deref())),
        (Some(p), None) => {
            // an unmatched prediction with no status text tells us nothing
            let status = match p.status.as_deref() {
                Some(text) => derive_status(Some(text)),
                None => DepartureStatus::Unknown,
            };
            (EtaSource::Prediction, status)
        }
        (None, Some(_)) => (EtaSource::Schedule, DepartureStatus::OnTime),
        (None, None) => (EtaSource::Unknown, DepartureStatus::Unknown),
    };

    let headsign = schedule
        .and_then(|s| s.trip_headsign.clone())
        .or_else(|| schedule.and_then(|s| s.stop_headsign.clone()));

    let discrepancy_minutes = match (predicted_time, scheduled_time) {
        (Some(p), Some(s)) => Some(round_minutes(p - s)),
        _ => None,
    };

    BlendedDeparture {
        stop_id: stop_id.to_string(),
        stop_name: stop_name.map(|s| s.to_string()),
        route_id: prediction
            .and_then(|p| p.route_id.clone())
            .or_else(|| schedule.and_then(|s| s.route_id.clone())),
        direction_id: prediction
            .and_then(|p| p.direction_id)
            .or_else(|| schedule.and_then(|s| s.direction_id)),
        trip_id: prediction
            .and_then(|p| p.trip_id.clone())
            .or_else(|| schedule.and_then(|s| s.trip_id.clone())),
        stop_sequence: prediction
            .and_then(|p| p.stop_sequence)
            .or_else(|| schedule.and_then(|s| s.stop_sequence)),
        headsign,
        scheduled_time,
        predicted_time,
        final_time,
        eta_minutes: final_time.map(|t| round_minutes(t - now)),
        eta_source,
        status,
        discrepancy_minutes,
    }
}

/// Reconcile schedule and prediction rows for one stop.
///
/// Returns every row, including time-less ones: the snapshot service needs
/// those for interpolation. Use [`finalize_rows`] to apply the lookahead
/// window and ordering before surfacing anything.
pub fn blend_rows(
    stop_id: &str,
    stop_name: Option<&str>,
    schedules: &[ScheduledDeparture],
    predictions: &[Prediction],
    now: DateTime<Utc>,
) -> Vec<BlendedDeparture> {
    // lookup of predictions by the composite match key; all three parts must
    // be known for a prediction to be matchable
    let mut by_key: HashMap<(String, String, i64), usize> = HashMap::new();
    for (idx, prediction) in predictions.iter().enumerate() {
        if let (Some(trip), Some(stop), Some(seq)) = (
            prediction.trip_id.as_ref(),
            prediction.stop_id.as_ref(),
            prediction.stop_sequence,
        ) {
            by_key.entry((trip.clone(), stop.clone(), seq)).or_insert(idx);
        }
    }

    let mut consumed = vec![false; predictions.len()];
    let mut rows = Vec::with_capacity(schedules.len() + predictions.len());

    for schedule in schedules {
        let matched = match (
            schedule.trip_id.as_ref(),
            schedule.stop_id.as_ref(),
            schedule.stop_sequence,
        ) {
            (Some(trip), Some(stop), Some(seq)) => by_key
                .remove(&(trip.clone(), stop.clone(), seq))
                .map(|idx| {
                    consumed[idx] = true;
                    &predictions[idx]
                }),
            _ => None,
        };
        rows.push(build_row(stop_id, stop_name, Some(schedule), matched, now));
    }

    // predictions with no schedule counterpart surface on their own
    for (idx, prediction) in predictions.iter().enumerate() {
        if !consumed[idx] {
            rows.push(build_row(stop_id, stop_name, None, Some(prediction), now));
        }
    }

    rows
}

/// Window-filter, order, and cap a blended row set.
///
/// Rows without a final time are dropped here; ties in `final_time` keep
/// their enumeration order (stable sort).
pub fn finalize_rows(mut rows: Vec<BlendedDeparture>, opts: &BlendOptions) -> Vec<BlendedDeparture> {
    let now = opts.resolved_now();
    let (window_start, window_end) = opts.window(now);
    rows.retain(|row| {
        row.final_time
            .map(|t| t >= window_start && t <= window_end)
            .unwrap_or(false)
    });
    rows.sort_by_key(|row| row.final_time);
    rows.truncate(opts.max_results);
    rows
}

/// Fetch and reconcile rows for a stop without window filtering.
pub async fn fetch_blend_rows(
    client: &UpstreamClient,
    stop_id: &str,
    opts: &BlendOptions,
) -> Result<Vec<BlendedDeparture>, UpstreamError> {
    let now = opts.resolved_now();
    let (schedules, predictions) = tokio::join!(
        client.schedules_for_stop(stop_id, now, opts.window_minutes),
        client.predictions_for_stop(stop_id),
    );
    // either fetch failing fails the call; fallback policy belongs to callers
    let schedules = schedules?;
    let predictions = predictions?;
    Ok(blend_rows(
        stop_id,
        opts.stop_name.as_deref(),
        &schedules,
        &predictions,
        now,
    ))
}

/// The blender's public entry point: live fetch, reconcile, window, order.
pub async fn fetch_blended_departures(
    client: &UpstreamClient,
    stop_id: &str,
    opts: &BlendOptions,
) -> Result<Vec<BlendedDeparture>, UpstreamError> {
    let rows = fetch_blend_rows(client, stop_id, opts).await?;
    Ok(finalize_rows(rows, opts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn make_schedule(trip: &str, seq: i64, departure: &str) -> ScheduledDeparture {
        ScheduledDeparture {
            id: format!("schedule-{}-{}", trip, seq),
            stop_id: Some("S1".to_string()),
            route_id: Some("Red".to_string()),
            trip_id: Some(trip.to_string()),
            direction_id: Some(0),
            stop_sequence: Some(seq),
            arrival_time: None,
            departure_time: Some(t(departure)),
            stop_headsign: None,
            trip_headsign: Some("Alewife".to_string()),
        }
    }

    fn make_prediction(trip: &str, seq: i64, departure: Option<&str>, status: Option<&str>) -> Prediction {
        Prediction {
            id: format!("prediction-{}-{}", trip, seq),
            stop_id: Some("S1".to_string()),
            route_id: Some("Red".to_string()),
            trip_id: Some(trip.to_string()),
            direction_id: Some(0),
            stop_sequence: Some(seq),
            arrival_time: None,
            departure_time: departure.map(t),
            status: status.map(|s| s.to_string()),
        }
    }

    fn opts_at(now: &str) -> BlendOptions {
        BlendOptions {
            now: Some(t(now)),
            ..BlendOptions::default()
        }
    }

    #[test]
    fn test_matched_pair_emits_single_prediction_sourced_row() {
        let now = t("2026-01-05T11:55:00Z");
        let schedules = vec![make_schedule("T1", 5, "2026-01-05T12:00:00Z")];
        let predictions = vec![make_prediction(
            "T1",
            5,
            Some("2026-01-05T12:02:00Z"),
            Some("Delayed"),
        )];

        let rows = blend_rows("S1", None, &schedules, &predictions, now);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.eta_source, EtaSource::Prediction);
        assert_eq!(row.status, DepartureStatus::Delayed);
        assert_eq!(row.final_time, Some(t("2026-01-05T12:02:00Z")));
        assert_eq!(row.discrepancy_minutes, Some(2));
        assert_eq!(row.eta_minutes, Some(7));
        assert_eq!(row.headsign.as_deref(), Some("Alewife"));
    }

    #[test]
    fn test_unmatched_prediction_emits_own_row() {
        let now = t("2026-01-05T11:55:00Z");
        let predictions = vec![make_prediction(
            "T9",
            2,
            Some("2026-01-05T12:05:00Z"),
            None,
        )];

        let rows = blend_rows("S1", None, &[], &predictions, now);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].eta_source, EtaSource::Prediction);
        // no schedule and no status text: nothing to derive from
        assert_eq!(rows[0].status, DepartureStatus::Unknown);
        assert!(rows[0].discrepancy_minutes.is_none());
    }

    #[test]
    fn test_schedule_only_row_defaults_on_time() {
        let now = t("2026-01-05T11:55:00Z");
        let schedules = vec![make_schedule("T1", 5, "2026-01-05T12:00:00Z")];

        let rows = blend_rows("S1", None, &schedules, &[], now);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].eta_source, EtaSource::Schedule);
        assert_eq!(rows[0].status, DepartureStatus::OnTime);
        assert_eq!(rows[0].final_time, Some(t("2026-01-05T12:00:00Z")));
    }

    #[test]
    fn test_prediction_without_sequence_never_matches() {
        let now = t("2026-01-05T11:55:00Z");
        let schedules = vec![make_schedule("T1", 5, "2026-01-05T12:00:00Z")];
        let mut prediction = make_prediction("T1", 5, Some("2026-01-05T12:01:00Z"), None);
        prediction.stop_sequence = None;

        let rows = blend_rows("S1", None, &schedules, &[prediction], now);
        // the schedule and the prediction each produce their own row
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].eta_source, EtaSource::Schedule);
        assert_eq!(rows[1].eta_source, EtaSource::Prediction);
    }

    #[test]
    fn test_matched_prediction_consumed_exactly_once() {
        let now = t("2026-01-05T11:55:00Z");
        // two schedule rows share the match key shape but different sequences
        let schedules = vec![
            make_schedule("T1", 5, "2026-01-05T12:00:00Z"),
            make_schedule("T1", 6, "2026-01-05T12:10:00Z"),
        ];
        let predictions = vec![make_prediction(
            "T1",
            5,
            Some("2026-01-05T12:03:00Z"),
            None,
        )];

        let rows = blend_rows("S1", None, &schedules, &predictions, now);
        assert_eq!(rows.len(), 2);
        let prediction_sourced: Vec<_> = rows
            .iter()
            .filter(|r| r.eta_source == EtaSource::Prediction)
            .collect();
        assert_eq!(prediction_sourced.len(), 1);
        assert_eq!(prediction_sourced[0].stop_sequence, Some(5));
    }

    #[test]
    fn test_finalize_orders_and_windows() {
        let opts = opts_at("2026-01-05T12:00:00Z");
        let now = t("2026-01-05T12:00:00Z");
        let schedules = vec![
            make_schedule("T3", 1, "2026-01-05T12:20:00Z"),
            make_schedule("T1", 1, "2026-01-05T12:05:00Z"),
            // behind the minimum lookahead, dropped
            make_schedule("T0", 1, "2026-01-05T11:50:00Z"),
            // beyond the maximum lookahead, dropped
            make_schedule("T4", 1, "2026-01-05T13:00:00Z"),
            make_schedule("T2", 1, "2026-01-05T12:10:00Z"),
        ];

        let rows = finalize_rows(blend_rows("S1", None, &schedules, &[], now), &opts);
        let trips: Vec<_> = rows.iter().map(|r| r.trip_id.as_deref().unwrap()).collect();
        assert_eq!(trips, vec!["T1", "T2", "T3"]);
        for pair in rows.windows(2) {
            assert!(pair[0].final_time <= pair[1].final_time);
        }
    }

    #[test]
    fn test_finalize_window_bounds_inclusive() {
        let opts = opts_at("2026-01-05T12:00:00Z");
        let now = t("2026-01-05T12:00:00Z");
        let schedules = vec![
            // exactly now + min_lookahead (-2 min)
            make_schedule("T1", 1, "2026-01-05T11:58:00Z"),
            // exactly now + max_lookahead (30 min)
            make_schedule("T2", 1, "2026-01-05T12:30:00Z"),
        ];
        let rows = finalize_rows(blend_rows("S1", None, &schedules, &[], now), &opts);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_finalize_caps_results() {
        let now = t("2026-01-05T12:00:00Z");
        let opts = BlendOptions {
            now: Some(now),
            max_results: 2,
            ..BlendOptions::default()
        };
        let schedules: Vec<_> = (0..5)
            .map(|i| {
                make_schedule(
                    &format!("T{}", i),
                    1,
                    &format!("2026-01-05T12:0{}:00Z", i + 1),
                )
            })
            .collect();
        let rows = finalize_rows(blend_rows("S1", None, &schedules, &[], now), &opts);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_derive_status_priority_order() {
        assert_eq!(derive_status(Some("Delayed 5 min")), DepartureStatus::Delayed);
        // "delay" outranks later matches even when both substrings appear
        assert_eq!(
            derive_status(Some("delayed due to cancelled connection")),
            DepartureStatus::Delayed
        );
        assert_eq!(derive_status(Some("CANCELLED")), DepartureStatus::Cancelled);
        assert_eq!(derive_status(Some("Will skip this stop")), DepartureStatus::Skipped);
        assert_eq!(derive_status(Some("No Service today")), DepartureStatus::NoService);
        assert_eq!(derive_status(Some("Holding at station")), DepartureStatus::Delayed);
        assert_eq!(derive_status(Some("On time")), DepartureStatus::OnTime);
        assert_eq!(derive_status(None), DepartureStatus::OnTime);
    }

    #[test]
    fn test_discrepancy_rounds_to_whole_minutes() {
        let now = t("2026-01-05T11:55:00Z");
        let schedules = vec![make_schedule("T1", 5, "2026-01-05T12:00:00Z")];
        let predictions = vec![make_prediction(
            "T1",
            5,
            Some("2026-01-05T12:01:40Z"),
            None,
        )];
        let rows = blend_rows("S1", None, &schedules, &predictions, now);
        // 100 seconds rounds to 2 minutes
        assert_eq!(rows[0].discrepancy_minutes, Some(2));
    }
}
