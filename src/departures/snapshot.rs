//! Stop ETA snapshots: cached-only and live access to blended departures.
//!
//! The cached path reads the process-wide prediction pool and never touches
//! the network; its `None` is a cache-miss signal, not an error. The live
//! path runs the blender and then fills gaps in partial real-time coverage by
//! interpolating along stop-sequence order, tagging estimates as `blended`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::cache::ResourceCache;
use crate::departures::blend::{
    blend_rows, fetch_blend_rows, finalize_rows, BlendOptions, BlendedDeparture, EtaSource,
};
use crate::providers::{UpstreamClient, UpstreamError};

/// How a snapshot was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotOrigin {
    /// Built from the cached prediction pool, no network call
    Cached,
    /// Built from a direct upstream fetch
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopEtaSnapshot {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub origin: SnapshotOrigin,
    pub generated_at: DateTime<Utc>,
    pub departures: Vec<BlendedDeparture>,
}

/// Snapshot from cached predictions only.
///
/// Returns `None` when no predictions entry exists yet or nothing survives
/// the lookahead window; callers fall back to a live fetch or report
/// data-not-ready.
pub async fn cached_stop_eta_snapshot(
    cache: &ResourceCache,
    stop_id: &str,
    opts: &BlendOptions,
) -> Option<StopEtaSnapshot> {
    let entry = cache.predictions().await?;
    let now = opts.resolved_now();

    let for_stop: Vec<_> = entry
        .data
        .iter()
        .filter(|p| p.stop_id.as_deref() == Some(stop_id))
        .cloned()
        .collect();

    let rows = finalize_rows(
        blend_rows(stop_id, opts.stop_name.as_deref(), &[], &for_stop, now),
        opts,
    );
    if rows.is_empty() {
        return None;
    }

    Some(StopEtaSnapshot {
        stop_id: stop_id.to_string(),
        stop_name: opts.stop_name.clone(),
        origin: SnapshotOrigin::Cached,
        generated_at: now,
        departures: rows,
    })
}

/// Live snapshot: blend a direct fetch, then interpolate missing times.
pub async fn stop_eta_snapshot(
    client: &UpstreamClient,
    stop_id: &str,
    opts: &BlendOptions,
) -> Result<StopEtaSnapshot, UpstreamError> {
    let now = opts.resolved_now();
    let rows = fetch_blend_rows(client, stop_id, opts).await?;
    let rows = interpolate_missing_times(rows, now);

    Ok(StopEtaSnapshot {
        stop_id: stop_id.to_string(),
        stop_name: opts.stop_name.clone(),
        origin: SnapshotOrigin::Live,
        generated_at: now,
        departures: finalize_rows(rows, opts),
    })
}

/// A known (stop-sequence, time) anchor within one result set.
type Anchor = (i64, DateTime<Utc>);

/// Nearest anchor strictly before `sequence`. `anchors` must be sorted by
/// sequence ascending.
pub fn preceding_bound(anchors: &[Anchor], sequence: i64) -> Option<Anchor> {
    anchors
        .iter()
        .rev()
        .find(|(seq, _)| *seq < sequence)
        .copied()
}

/// Nearest anchor strictly after `sequence`. `anchors` must be sorted by
/// sequence ascending.
pub fn following_bound(anchors: &[Anchor], sequence: i64) -> Option<Anchor> {
    anchors.iter().find(|(seq, _)| *seq > sequence).copied()
}

/// Fill in times for rows that lack one but carry a stop-sequence.
///
/// Real-time coverage is frequently partial: only some trips along a route
/// report positions. When a time-less row sits between two rows with known
/// times, the gap is bridged linearly over sequence distance and the result
/// tagged `blended`. With a bound on only one side (or none) the row falls
/// back to its own scheduled time, or stays time-less and gets dropped by
/// the window filter downstream.
pub fn interpolate_missing_times(
    rows: Vec<BlendedDeparture>,
    now: DateTime<Utc>,
) -> Vec<BlendedDeparture> {
    let mut anchors: Vec<Anchor> = rows
        .iter()
        .filter_map(|row| match (row.stop_sequence, row.final_time) {
            (Some(seq), Some(t)) => Some((seq, t)),
            _ => None,
        })
        .collect();
    anchors.sort_by_key(|(seq, _)| *seq);

    rows.into_iter()
        .map(|row| {
            if row.final_time.is_some() {
                return row;
            }
            let Some(sequence) = row.stop_sequence else {
                return row;
            };

            let mut row = row;
            match (
                preceding_bound(&anchors, sequence),
                following_bound(&anchors, sequence),
            ) {
                (Some((s0, t0)), Some((s1, t1))) => {
                    let span = (s1 - s0) as f64;
                    let fraction = (sequence - s0) as f64 / span;
                    let offset_ms = ((t1 - t0).num_milliseconds() as f64 * fraction).round() as i64;
                    let estimate = t0 + Duration::milliseconds(offset_ms);
                    row.final_time = Some(estimate);
                    row.eta_minutes =
                        Some(((estimate - now).num_milliseconds() as f64 / 60_000.0).round() as i64);
                    row.eta_source = EtaSource::Blended;
                }
                _ => {
                    if let Some(scheduled) = row.scheduled_time {
                        row.final_time = Some(scheduled);
                        row.eta_minutes = Some(
                            ((scheduled - now).num_milliseconds() as f64 / 60_000.0).round() as i64,
                        );
                    }
                }
            }
            row
        })
        .collect()
}
