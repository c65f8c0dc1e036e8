//! Station/stop aggregation: the rider-facing "home" view and station boards.
//!
//! Raw stops are platform-level; riders think in stations. This module groups
//! platform stops into canonical boardable stations (within a radius or by
//! favorite id), merges the per-platform ETA snapshots, and produces compact
//! departure groups per route and direction. Assembled home views are cached
//! for a short TTL under a quantized query key so map pans and repeat loads
//! don't refan out.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::cache::ResourceCache;
use crate::departures::blend::{BlendOptions, BlendedDeparture, DepartureStatus, EtaSource};
use crate::departures::snapshot::{cached_stop_eta_snapshot, stop_eta_snapshot};
use crate::models::Stop;
use crate::providers::{RemoteCache, UpstreamClient};
use crate::stations::topology::{canonical_station, classify, StopKind};

/// Quantization buckets for the home-view cache key: ~1.1 km in latitude
/// degrees, 250 m radius steps.
const COORD_BUCKET_DEG: f64 = 0.01;
const RADIUS_BUCKET_M: f64 = 250.0;

/// Assembled home views live this long before a rebuild.
const VIEW_CACHE_TTL: Duration = Duration::from_secs(30);

/// Bounds on the nearby-station count per request.
const LIMIT_MIN: usize = 1;
const LIMIT_MAX: usize = 12;

/// At most this many upcoming times per route/direction group.
const MAX_TIMES_PER_GROUP: usize = 3;

/// Station board: wider lookahead, bounded payload.
const BOARD_LOOKAHEAD_MINUTES: i64 = 60;
const BOARD_MAX_DETAIL_ROWS: usize = 60;
const BOARD_MAX_ROWS_PER_GROUP: usize = 6;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Error)]
pub enum AggregateError {
    /// The stop cache has not been polled yet; callers answer 503-style.
    #[error("Stop data not available yet")]
    DataNotReady,
    #[error("Unknown or non-boardable stop: {0}")]
    UnknownStop(String),
}

/// Great-circle distance between two WGS84 points, in meters.
pub fn distance_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(LIMIT_MIN, LIMIT_MAX)
}

/// Cache key for a home-view query. Nearby coordinates and radii collapse
/// into the same bucket so equivalent queries share one assembled view.
pub fn quantized_home_key(
    lat: f64,
    lng: f64,
    radius_m: f64,
    limit: usize,
    favorite_ids: &[String],
) -> String {
    let qlat = (lat / COORD_BUCKET_DEG).round() * COORD_BUCKET_DEG;
    let qlng = (lng / COORD_BUCKET_DEG).round() * COORD_BUCKET_DEG;
    let qradius = ((radius_m / RADIUS_BUCKET_M).round() as i64) * RADIUS_BUCKET_M as i64;
    format!(
        "home:{:.2}:{:.2}:{}:{}:{}",
        qlat,
        qlng,
        qradius,
        clamp_limit(limit),
        favorite_ids.join("+")
    )
}

/// One canonical station with the platform stops that roll up to it.
#[derive(Debug, Clone)]
pub struct StationGroup {
    pub station: Stop,
    pub platform_stop_ids: Vec<String>,
    pub min_distance_m: Option<f64>,
}

/// Up to three upcoming departures for one route/direction at a station.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepartureGroup {
    pub route_id: String,
    pub direction_id: Option<u8>,
    /// "Inbound", "Outbound" or "Unknown"
    pub direction: String,
    pub destination: Option<String>,
    pub upcoming: Vec<UpcomingTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpcomingTime {
    pub time: DateTime<Utc>,
    pub eta_minutes: i64,
    pub source: EtaSource,
    pub status: DepartureStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StationEntry {
    pub stop_id: String,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub distance_m: Option<f64>,
    pub platform_stop_ids: Vec<String>,
    pub groups: Vec<DepartureGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HomeSnapshotResponse {
    pub favorites: Vec<StationEntry>,
    pub nearby: Vec<StationEntry>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StationBoardResponse {
    pub primary: StationEntry,
    pub details: Vec<BlendedDeparture>,
}

struct CachedView {
    stored_at: Instant,
    value: Arc<HomeSnapshotResponse>,
}

/// Ordered accumulator for station groups keyed by canonical station id.
#[derive(Default)]
struct GroupAccumulator {
    order: Vec<String>,
    groups: HashMap<String, StationGroup>,
}

impl GroupAccumulator {
    fn merge(
        &mut self,
        canonical: &Stop,
        member_id: &str,
        siblings: &HashMap<String, Vec<String>>,
        distance: Option<f64>,
    ) {
        let group = self
            .groups
            .entry(canonical.id.clone())
            .or_insert_with(|| {
                self.order.push(canonical.id.clone());
                StationGroup {
                    station: canonical.clone(),
                    platform_stop_ids: Vec::new(),
                    min_distance_m: None,
                }
            });

        let mut push_unique = |id: &str, ids: &mut Vec<String>| {
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        };

        push_unique(&canonical.id, &mut group.platform_stop_ids);
        push_unique(member_id, &mut group.platform_stop_ids);
        if let Some(platforms) = siblings.get(&canonical.id) {
            for platform_id in platforms {
                push_unique(platform_id, &mut group.platform_stop_ids);
            }
        }

        if let Some(d) = distance {
            group.min_distance_m = Some(match group.min_distance_m {
                Some(existing) => existing.min(d),
                None => d,
            });
        }
    }

    fn into_ordered(mut self) -> Vec<StationGroup> {
        self.order
            .iter()
            .filter_map(|id| self.groups.remove(id))
            .collect()
    }
}

pub struct AggregationService {
    cache: Arc<ResourceCache>,
    client: Arc<UpstreamClient>,
    remote: Arc<RemoteCache>,
    view_cache: RwLock<HashMap<String, CachedView>>,
}

impl AggregationService {
    pub fn new(
        cache: Arc<ResourceCache>,
        client: Arc<UpstreamClient>,
        remote: Arc<RemoteCache>,
    ) -> Self {
        Self {
            cache,
            client,
            remote,
            view_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Build the rider-facing home view: favorite stations plus the nearest
    /// boardable stations around a point.
    pub async fn build_home_snapshot(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
        limit: usize,
        favorite_ids: &[String],
    ) -> Result<Arc<HomeSnapshotResponse>, AggregateError> {
        let limit = clamp_limit(limit);
        let key = quantized_home_key(lat, lng, radius_m, limit, favorite_ids);

        if let Some(hit) = self.view_cache_get(&key).await {
            return Ok(hit);
        }

        let stops_entry = self.cache.stops().await.ok_or(AggregateError::DataNotReady)?;
        let stop_index: HashMap<String, Stop> = stops_entry
            .data
            .stops
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        let siblings = sibling_platform_index(&stops_entry.data.stops);
        let routes_by_stop = &stops_entry.data.routes_by_stop;
        let has_route_data = !routes_by_stop.is_empty();

        // candidates within the radius, closest first, with headroom for
        // several platforms collapsing into one station
        let mut candidates: Vec<(&Stop, f64)> = stops_entry
            .data
            .stops
            .iter()
            .filter_map(|stop| {
                let (slat, slng) = (stop.latitude?, stop.longitude?);
                let d = distance_meters(lat, lng, slat, slng);
                if d > radius_m {
                    return None;
                }
                if has_route_data
                    && !routes_by_stop
                        .get(&stop.id)
                        .map(|routes| !routes.is_empty())
                        .unwrap_or(false)
                {
                    return None;
                }
                Some((stop, d))
            })
            .collect();
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(limit * 4);

        let mut nearby_acc = GroupAccumulator::default();
        for (stop, distance) in &candidates {
            if let Some(canonical) = canonical_station(stop, &stop_index) {
                nearby_acc.merge(canonical, &stop.id, &siblings, Some(*distance));
            }
        }
        let mut nearby_groups = nearby_acc.into_ordered();
        nearby_groups.sort_by(|a, b| {
            a.min_distance_m
                .partial_cmp(&b.min_distance_m)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        nearby_groups.truncate(limit);

        // favorites resolve independently, keeping the caller's order; they
        // are never truncated by the nearby limit
        let mut favorite_acc = GroupAccumulator::default();
        for favorite_id in favorite_ids {
            let Some(stop) = stop_index.get(favorite_id) else {
                tracing::debug!(stop_id = %favorite_id, "Unknown favorite stop id, skipping");
                continue;
            };
            if let Some(canonical) = canonical_station(stop, &stop_index) {
                favorite_acc.merge(canonical, &stop.id, &siblings, None);
            }
        }
        let favorite_groups = favorite_acc.into_ordered();

        let opts = BlendOptions::default();
        let departures_by_platform = self
            .fetch_platform_departures(favorite_groups.iter().chain(nearby_groups.iter()), &opts)
            .await;

        let response = Arc::new(HomeSnapshotResponse {
            favorites: favorite_groups
                .iter()
                .map(|g| assemble_station_entry(g, &departures_by_platform))
                .collect(),
            nearby: nearby_groups
                .iter()
                .map(|g| assemble_station_entry(g, &departures_by_platform))
                .collect(),
            generated_at: Utc::now(),
        });

        self.view_cache_put(&key, Arc::clone(&response)).await;
        self.remote
            .set_json(&key, response.as_ref(), Some(VIEW_CACHE_TTL))
            .await;

        Ok(response)
    }

    /// Detail board for one station: the requested stop's boardable parent
    /// with all sibling platforms merged, over a wider lookahead.
    pub async fn station_board(
        &self,
        stop_id: &str,
    ) -> Result<StationBoardResponse, AggregateError> {
        let stops_entry = self.cache.stops().await.ok_or(AggregateError::DataNotReady)?;
        let stop_index: HashMap<String, Stop> = stops_entry
            .data
            .stops
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        let siblings = sibling_platform_index(&stops_entry.data.stops);

        let stop = stop_index
            .get(stop_id)
            .ok_or_else(|| AggregateError::UnknownStop(stop_id.to_string()))?;
        let canonical = canonical_station(stop, &stop_index)
            .ok_or_else(|| AggregateError::UnknownStop(stop_id.to_string()))?;

        let mut acc = GroupAccumulator::default();
        acc.merge(canonical, stop_id, &siblings, None);
        let group = acc.into_ordered().remove(0);

        let opts = BlendOptions {
            max_lookahead_minutes: BOARD_LOOKAHEAD_MINUTES,
            ..BlendOptions::default()
        };
        let departures_by_platform = self
            .fetch_platform_departures(std::iter::once(&group), &opts)
            .await;

        let primary = assemble_station_entry(&group, &departures_by_platform);
        let details = assemble_board_details(&group, &departures_by_platform);

        Ok(StationBoardResponse { primary, details })
    }

    /// One ETA snapshot per platform across all groups, fetched together.
    ///
    /// Cached-first, live fetch as fallback. A failing platform contributes
    /// an empty list rather than failing the aggregate request.
    async fn fetch_platform_departures<'a>(
        &self,
        groups: impl Iterator<Item = &'a StationGroup>,
        opts: &BlendOptions,
    ) -> HashMap<String, Vec<BlendedDeparture>> {
        let mut platform_ids: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for group in groups {
            for id in &group.platform_stop_ids {
                if seen.insert(id.clone()) {
                    platform_ids.push(id.clone());
                }
            }
        }

        let fetches = platform_ids.iter().map(|platform_id| {
            let opts = opts.clone();
            async move {
                if let Some(snapshot) =
                    cached_stop_eta_snapshot(&self.cache, platform_id, &opts).await
                {
                    return (platform_id.clone(), snapshot.departures);
                }
                match stop_eta_snapshot(&self.client, platform_id, &opts).await {
                    Ok(snapshot) => (platform_id.clone(), snapshot.departures),
                    Err(e) => {
                        tracing::warn!(stop_id = %platform_id, error = %e, "ETA fetch failed, contributing no departures");
                        (platform_id.clone(), Vec::new())
                    }
                }
            }
        });

        join_all(fetches).await.into_iter().collect()
    }

    async fn view_cache_get(&self, key: &str) -> Option<Arc<HomeSnapshotResponse>> {
        let cache = self.view_cache.read().await;
        let cached = cache.get(key)?;
        if cached.stored_at.elapsed() > VIEW_CACHE_TTL {
            return None;
        }
        Some(Arc::clone(&cached.value))
    }

    async fn view_cache_put(&self, key: &str, value: Arc<HomeSnapshotResponse>) {
        let mut cache = self.view_cache.write().await;
        cache.retain(|_, cached| cached.stored_at.elapsed() <= VIEW_CACHE_TTL);
        cache.insert(
            key.to_string(),
            CachedView {
                stored_at: Instant::now(),
                value,
            },
        );
    }
}

/// Platform stops grouped under their parent station id.
fn sibling_platform_index(stops: &[Stop]) -> HashMap<String, Vec<String>> {
    let mut index: HashMap<String, Vec<String>> = HashMap::new();
    for stop in stops {
        if classify(stop) == StopKind::Platform {
            if let Some(parent) = &stop.parent_station {
                index.entry(parent.clone()).or_default().push(stop.id.clone());
            }
        }
    }
    index
}

fn direction_label(direction_id: Option<u8>) -> &'static str {
    match direction_id {
        Some(0) => "Inbound",
        Some(1) => "Outbound",
        _ => "Unknown",
    }
}

/// Merge a group's platform departures into per-route/direction rows.
fn assemble_station_entry(
    group: &StationGroup,
    departures_by_platform: &HashMap<String, Vec<BlendedDeparture>>,
) -> StationEntry {
    let mut merged: Vec<&BlendedDeparture> = group
        .platform_stop_ids
        .iter()
        .filter_map(|id| departures_by_platform.get(id))
        .flatten()
        .collect();
    merged.sort_by_key(|d| d.final_time);

    let mut order: Vec<(String, Option<u8>)> = Vec::new();
    let mut by_route_direction: HashMap<(String, Option<u8>), Vec<&BlendedDeparture>> =
        HashMap::new();
    for departure in merged {
        let key = (
            departure.route_id.clone().unwrap_or_default(),
            departure.direction_id,
        );
        if !by_route_direction.contains_key(&key) {
            order.push(key.clone());
        }
        by_route_direction.entry(key).or_default().push(departure);
    }

    let mut station_groups: Vec<DepartureGroup> = order
        .into_iter()
        .map(|key| {
            let rows = &by_route_direction[&key];
            // prefer the first row's headsign, else any sibling's in the group
            let destination = rows.iter().find_map(|d| d.headsign.clone());
            let upcoming: Vec<UpcomingTime> = rows
                .iter()
                .filter_map(|d| {
                    Some(UpcomingTime {
                        time: d.final_time?,
                        eta_minutes: d.eta_minutes?,
                        source: d.eta_source,
                        status: d.status,
                    })
                })
                .take(MAX_TIMES_PER_GROUP)
                .collect();
            DepartureGroup {
                route_id: key.0,
                direction_id: key.1,
                direction: direction_label(key.1).to_string(),
                destination,
                upcoming,
            }
        })
        .collect();
    // soonest service first; groups with nothing upcoming sink to the bottom
    station_groups.sort_by_key(|g| {
        (
            g.upcoming.is_empty(),
            g.upcoming.first().map(|u| u.time),
        )
    });

    StationEntry {
        stop_id: group.station.id.clone(),
        name: group.station.name.clone(),
        latitude: group.station.latitude,
        longitude: group.station.longitude,
        distance_m: group.min_distance_m,
        platform_stop_ids: group.platform_stop_ids.clone(),
        groups: station_groups,
    }
}

/// Flat detail rows for the station board, bounded per direction group and
/// in total.
fn assemble_board_details(
    group: &StationGroup,
    departures_by_platform: &HashMap<String, Vec<BlendedDeparture>>,
) -> Vec<BlendedDeparture> {
    let mut merged: Vec<BlendedDeparture> = group
        .platform_stop_ids
        .iter()
        .filter_map(|id| departures_by_platform.get(id))
        .flatten()
        .cloned()
        .collect();
    merged.sort_by_key(|d| d.final_time);

    let mut per_group: HashMap<(String, Option<u8>), usize> = HashMap::new();
    let mut details = Vec::new();
    for departure in merged {
        if details.len() >= BOARD_MAX_DETAIL_ROWS {
            break;
        }
        let key = (
            departure.route_id.clone().unwrap_or_default(),
            departure.direction_id,
        );
        let count = per_group.entry(key).or_insert(0);
        if *count >= BOARD_MAX_ROWS_PER_GROUP {
            continue;
        }
        *count += 1;
        details.push(departure);
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StopsData;
    use crate::config::{RateLimitConfig, RetryConfig, UpstreamConfig};
    use crate::models::Prediction;

    fn make_stop(
        id: &str,
        location_type: i32,
        parent: Option<&str>,
        lat: f64,
        lng: f64,
    ) -> Stop {
        Stop {
            id: id.to_string(),
            name: Some(format!("{} name", id)),
            latitude: Some(lat),
            longitude: Some(lng),
            location_type: Some(location_type),
            platform_name: None,
            municipality: None,
            parent_station: parent.map(|p| p.to_string()),
        }
    }

    /// Prediction departing `minutes_from_now` minutes from the wall clock,
    /// so rows land inside the live lookahead window.
    fn make_prediction(id: &str, stop: &str, minutes_from_now: i64) -> Prediction {
        Prediction {
            id: id.to_string(),
            stop_id: Some(stop.to_string()),
            route_id: Some("Red".to_string()),
            trip_id: Some(format!("trip-{}", id)),
            direction_id: Some(0),
            stop_sequence: Some(1),
            arrival_time: None,
            departure_time: Some(Utc::now() + chrono::Duration::minutes(minutes_from_now)),
            status: None,
        }
    }

    async fn make_service(
        stops: Vec<Stop>,
        routes_by_stop: HashMap<String, Vec<String>>,
    ) -> AggregationService {
        let remote = Arc::new(RemoteCache::Disabled);
        let cache = Arc::new(ResourceCache::new(Arc::clone(&remote)));
        // an unroutable local endpoint with no retries: any accidental live
        // fetch fails fast instead of hanging the test
        let client = Arc::new(
            UpstreamClient::new(UpstreamConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                api_key: None,
                rate_limit: RateLimitConfig {
                    max_requests: 1000,
                    window_secs: 60,
                    min_spacing_ms: 0,
                },
                retry: RetryConfig {
                    max_retries: 0,
                    base_backoff_ms: 1,
                    max_backoff_ms: 1,
                },
            })
            .unwrap(),
        );
        cache
            .set_stops(StopsData {
                stops,
                routes_by_stop,
            })
            .await;
        AggregationService::new(cache, client, remote)
    }

    fn two_platform_station() -> Vec<Stop> {
        vec![
            make_stop("station-1", 1, None, 42.3600, -71.0600),
            make_stop("platform-a", 0, Some("station-1"), 42.36005, -71.06000),
            make_stop("platform-b", 0, Some("station-1"), 42.35995, -71.06000),
        ]
    }

    #[test]
    fn test_haversine_known_distance() {
        // one degree of latitude is ~111.2 km
        let d = distance_meters(42.0, -71.0, 43.0, -71.0);
        assert!((d - 111_195.0).abs() < 500.0, "got {}", d);
        assert!(distance_meters(42.0, -71.0, 42.0, -71.0) < 1e-6);
    }

    #[test]
    fn test_quantized_key_buckets_nearby_queries() {
        let a = quantized_home_key(42.3601, -71.0589, 500.0, 6, &[]);
        let b = quantized_home_key(42.3630, -71.0612, 600.0, 6, &[]);
        assert_eq!(a, b);

        let far = quantized_home_key(42.4101, -71.0589, 500.0, 6, &[]);
        assert_ne!(a, far);

        let bigger_radius = quantized_home_key(42.3601, -71.0589, 900.0, 6, &[]);
        assert_ne!(a, bigger_radius);
    }

    #[test]
    fn test_quantized_key_includes_favorites_and_clamped_limit() {
        let none = quantized_home_key(42.36, -71.06, 500.0, 6, &[]);
        let with_favorite =
            quantized_home_key(42.36, -71.06, 500.0, 6, &["place-x".to_string()]);
        assert_ne!(none, with_favorite);

        let over_limit = quantized_home_key(42.36, -71.06, 500.0, 99, &[]);
        let at_max = quantized_home_key(42.36, -71.06, 500.0, LIMIT_MAX, &[]);
        assert_eq!(over_limit, at_max);
    }

    #[test]
    fn test_sibling_platforms_collapse_into_one_group() {
        let stops = two_platform_station();
        let index: HashMap<String, Stop> =
            stops.iter().map(|s| (s.id.clone(), s.clone())).collect();
        let siblings = sibling_platform_index(&stops);

        let mut acc = GroupAccumulator::default();
        for platform_id in ["platform-a", "platform-b"] {
            let stop = &index[platform_id];
            let canonical = canonical_station(stop, &index).unwrap();
            acc.merge(canonical, &stop.id, &siblings, Some(50.0));
        }
        let groups = acc.into_ordered();

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.station.id, "station-1");
        assert!(group.platform_stop_ids.contains(&"platform-a".to_string()));
        assert!(group.platform_stop_ids.contains(&"platform-b".to_string()));
        assert!(group.platform_stop_ids.contains(&"station-1".to_string()));
        assert_eq!(group.min_distance_m, Some(50.0));
    }

    #[test]
    fn test_direction_labels() {
        assert_eq!(direction_label(Some(0)), "Inbound");
        assert_eq!(direction_label(Some(1)), "Outbound");
        assert_eq!(direction_label(None), "Unknown");
        assert_eq!(direction_label(Some(7)), "Unknown");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_home_snapshot_groups_two_platforms_into_one_entry() {
        let service = make_service(two_platform_station(), HashMap::new()).await;
        let cache = Arc::clone(&service.cache);
        cache
            .set_predictions(vec![
                make_prediction("a", "platform-a", 10),
                make_prediction("b", "platform-b", 12),
            ])
            .await;

        let response = service
            .build_home_snapshot(42.3600, -71.0600, 500.0, 6, &[])
            .await
            .unwrap();

        assert_eq!(response.nearby.len(), 1, "two platforms, one station row");
        let entry = &response.nearby[0];
        assert!(entry.platform_stop_ids.contains(&"platform-a".to_string()));
        assert!(entry.platform_stop_ids.contains(&"platform-b".to_string()));
        assert!(entry.platform_stop_ids.contains(&"station-1".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_home_snapshot_second_call_hits_view_cache() {
        let service = make_service(two_platform_station(), HashMap::new()).await;
        service
            .cache
            .set_predictions(vec![make_prediction("a", "platform-a", 10)])
            .await;

        let first = service
            .build_home_snapshot(42.3601, -71.0589, 500.0, 6, &[])
            .await
            .unwrap();
        // within the same quantization bucket: < 0.005 deg and < 125 m apart
        let second = service
            .build_home_snapshot(42.3630, -71.0612, 600.0, 6, &[])
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second), "expected the cached view");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_home_snapshot_without_stop_data_is_not_ready() {
        let remote = Arc::new(RemoteCache::Disabled);
        let cache = Arc::new(ResourceCache::new(Arc::clone(&remote)));
        let client = Arc::new(
            UpstreamClient::new(UpstreamConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                ..UpstreamConfig::default()
            })
            .unwrap(),
        );
        let service = AggregationService::new(cache, client, remote);
        let result = service.build_home_snapshot(42.36, -71.06, 500.0, 6, &[]).await;
        assert!(matches!(result, Err(AggregateError::DataNotReady)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_home_snapshot_favorites_keep_caller_order() {
        let mut stops = two_platform_station();
        stops.push(make_stop("station-2", 1, None, 42.40, -71.10));
        stops.push(make_stop("platform-z", 0, Some("station-2"), 42.40, -71.10));
        let service = make_service(stops, HashMap::new()).await;
        service
            .cache
            .set_predictions(vec![make_prediction("a", "platform-a", 10)])
            .await;

        let response = service
            .build_home_snapshot(
                0.0,
                0.0,
                100.0,
                6,
                &["station-2".to_string(), "station-1".to_string()],
            )
            .await
            .unwrap();
        let ids: Vec<_> = response.favorites.iter().map(|e| e.stop_id.as_str()).collect();
        assert_eq!(ids, vec!["station-2", "station-1"]);
        assert!(response.nearby.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_route_service_prefilter_drops_unserved_stops() {
        let mut stops = two_platform_station();
        // a stray platform with no serving routes nearby
        stops.push(make_stop("platform-unserved", 0, None, 42.3601, -71.0601));
        let mut routes_by_stop = HashMap::new();
        routes_by_stop.insert("platform-a".to_string(), vec!["Red".to_string()]);
        routes_by_stop.insert("platform-b".to_string(), vec!["Red".to_string()]);
        let service = make_service(stops, routes_by_stop).await;
        service
            .cache
            .set_predictions(vec![make_prediction("a", "platform-a", 10)])
            .await;

        let response = service
            .build_home_snapshot(42.3600, -71.0600, 500.0, 6, &[])
            .await
            .unwrap();
        assert_eq!(response.nearby.len(), 1);
        assert_eq!(response.nearby[0].stop_id, "station-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_station_board_caps_and_groups() {
        let service = make_service(two_platform_station(), HashMap::new()).await;
        // ten predictions on one route/direction: details must cap at six
        let predictions: Vec<Prediction> = (0..10)
            .map(|i| {
                make_prediction(&format!("p{}", i), "platform-a", 5 + i)
            })
            .collect();
        service.cache.set_predictions(predictions).await;

        let board = service.station_board("platform-a").await.unwrap();
        // the board is anchored to the boardable parent, not the platform
        assert_eq!(board.primary.stop_id, "station-1");
        assert_eq!(board.details.len(), BOARD_MAX_ROWS_PER_GROUP);
        assert!(board.primary.groups[0].upcoming.len() <= MAX_TIMES_PER_GROUP);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_station_board_unknown_stop() {
        let service = make_service(two_platform_station(), HashMap::new()).await;
        let result = service.station_board("nowhere").await;
        assert!(matches!(result, Err(AggregateError::UnknownStop(_))));
    }
}
