//! Typed client for the upstream transit JSON:API.
//!
//! All network access to the provider goes through [`UpstreamClient`]. The
//! client enforces a sliding-window rate limit with minimum inter-request
//! spacing (callers are delayed, never rejected), retries transient failures
//! with capped exponential backoff and jitter, and keeps running telemetry
//! counters that feed the health endpoint.

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use utoipa::ToSchema;

use crate::config::UpstreamConfig;
use crate::models::{
    Alert, AlertAttributes, Line, LineAttributes, LiveFacility, LiveFacilityAttributes,
    Prediction, PredictionAttributes, Route, RouteAttributes, ScheduleAttributes,
    ScheduledDeparture, Shape, ShapeAttributes, Stop, StopAttributes, Trip, TripAttributes,
    Vehicle, VehicleAttributes,
};
use crate::providers::jsonapi::JsonApiDocument;

/// HTTP statuses worth retrying; everything else fails immediately.
const RETRYABLE_STATUSES: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

/// How much of an error body to keep in error messages.
const BODY_FRAGMENT_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Network error for {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Upstream returned {status} for {path}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },
    #[error("Failed to decode response for {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Gave up on {path} after {attempts} attempts: {last}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        last: String,
    },
}

impl UpstreamError {
    fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Transport { .. } => true,
            UpstreamError::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }
}

/// Point-in-time view of the client's counters, for health reporting.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TelemetrySnapshot {
    pub total_requests: u64,
    pub retryable_responses: u64,
    pub failures: u64,
    pub rate_limit_delays: u64,
    pub rate_limit_delay_ms_total: u64,
    pub last_success: HashMap<String, DateTime<Utc>>,
    pub last_failure: HashMap<String, DateTime<Utc>>,
}

/// Running counters. Observational only; nothing here affects control flow.
#[derive(Default)]
struct ClientTelemetry {
    total_requests: AtomicU64,
    retryable_responses: AtomicU64,
    failures: AtomicU64,
    rate_limit_delays: AtomicU64,
    rate_limit_delay_ms_total: AtomicU64,
    last_success: RwLock<HashMap<String, DateTime<Utc>>>,
    last_failure: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ClientTelemetry {
    async fn record_success(&self, path: &str) {
        let mut map = self.last_success.write().await;
        map.insert(path.to_string(), Utc::now());
    }

    async fn record_failure(&self, path: &str) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let mut map = self.last_failure.write().await;
        map.insert(path.to_string(), Utc::now());
    }

    fn record_delay(&self, delay: Duration) {
        self.rate_limit_delays.fetch_add(1, Ordering::Relaxed);
        self.rate_limit_delay_ms_total
            .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
    }

    async fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            retryable_responses: self.retryable_responses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rate_limit_delays: self.rate_limit_delays.load(Ordering::Relaxed),
            rate_limit_delay_ms_total: self.rate_limit_delay_ms_total.load(Ordering::Relaxed),
            last_success: self.last_success.read().await.clone(),
            last_failure: self.last_failure.read().await.clone(),
        }
    }
}

/// Sliding-window limiter state. Guarded by a `tokio::sync::Mutex`, whose
/// FIFO wake order is what keeps delayed callers in arrival order.
struct LimiterState {
    recent: VecDeque<Instant>,
    last_request: Option<Instant>,
}

pub struct UpstreamClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    limiter: Mutex<LimiterState>,
    config: UpstreamConfig,
    telemetry: ClientTelemetry,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| UpstreamError::Transport {
                path: "<client builder>".to_string(),
                source: e,
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            limiter: Mutex::new(LimiterState {
                recent: VecDeque::new(),
                last_request: None,
            }),
            config,
            telemetry: ClientTelemetry::default(),
        })
    }

    pub async fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot().await
    }

    /// Wait until the rate budget allows another request.
    ///
    /// The sleep happens while holding the limiter lock, so waiters drain in
    /// the order they arrived and the minimum spacing holds across all of
    /// them. Requests are only ever deferred, never dropped.
    async fn throttle(&self) {
        let window = Duration::from_secs(self.config.rate_limit.window_secs);
        let spacing = Duration::from_millis(self.config.rate_limit.min_spacing_ms);
        let max_requests = self.config.rate_limit.max_requests as usize;

        let mut state = self.limiter.lock().await;
        let now = Instant::now();
        while let Some(&front) = state.recent.front() {
            if now.duration_since(front) > window {
                state.recent.pop_front();
            } else {
                break;
            }
        }

        let mut wait = Duration::ZERO;
        if state.recent.len() >= max_requests {
            if let Some(oldest) = state.recent.front() {
                wait = wait.max(window.saturating_sub(now.duration_since(*oldest)));
            }
        }
        if let Some(last) = state.last_request {
            wait = wait.max(spacing.saturating_sub(now.duration_since(last)));
        }

        if !wait.is_zero() {
            let jitter = rand::rng().random_range(0.0..0.25);
            let wait = wait + wait.mul_f64(jitter);
            self.telemetry.record_delay(wait);
            tokio::time::sleep(wait).await;
        }

        let stamp = Instant::now();
        state.last_request = Some(stamp);
        state.recent.push_back(stamp);
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry.base_backoff_ms.max(1);
        let capped = (base.saturating_mul(1u64 << attempt.min(16)))
            .min(self.config.retry.max_backoff_ms.max(base));
        // +-30% jitter
        let factor = rand::rng().random_range(0.7..1.3);
        Duration::from_millis(capped).mul_f64(factor)
    }

    fn build_url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut url = format!("{}{}", self.base_url, path);
        let mut sep = '?';
        for (key, value) in params {
            url.push(sep);
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
            sep = '&';
        }
        if let Some(key) = &self.api_key {
            url.push(sep);
            url.push_str("api_key=");
            url.push_str(&urlencoding::encode(key));
        }
        url
    }

    /// One GET against the provider with rate limiting and retry.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<JsonApiDocument<T>, UpstreamError> {
        let url = self.build_url(path, params);
        let max_retries = self.config.retry.max_retries;
        let request_id = uuid::Uuid::new_v4();
        let mut last_error: Option<UpstreamError> = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff_delay(attempt - 1)).await;
            }
            self.throttle().await;
            self.telemetry.total_requests.fetch_add(1, Ordering::Relaxed);

            let error = match self.attempt_get::<T>(path, &url).await {
                Ok(doc) => {
                    self.telemetry.record_success(path).await;
                    return Ok(doc);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                self.telemetry.record_failure(path).await;
                return Err(error);
            }

            self.telemetry
                .retryable_responses
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%request_id, path, attempt, error = %error, "Retryable upstream failure");
            last_error = Some(error);
        }

        self.telemetry.record_failure(path).await;
        Err(UpstreamError::RetriesExhausted {
            path: path.to_string(),
            attempts: max_retries + 1,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn attempt_get<T: DeserializeOwned>(
        &self,
        path: &str,
        url: &str,
    ) -> Result<JsonApiDocument<T>, UpstreamError> {
        let response = self
            .client
            .get(url)
            .header("accept", "application/vnd.api+json")
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                path: path.to_string(),
                source: e,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| UpstreamError::Transport {
            path: path.to_string(),
            source: e,
        })?;

        if status != StatusCode::OK {
            let fragment: String = body.chars().take(BODY_FRAGMENT_LEN).collect();
            return Err(UpstreamError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body: fragment,
            });
        }

        crate::providers::jsonapi::decode_document(&body).map_err(|e| UpstreamError::Decode {
            path: path.to_string(),
            source: e,
        })
    }

    // --- typed resource methods ---

    pub async fn routes(&self) -> Result<Vec<Route>, UpstreamError> {
        let doc: JsonApiDocument<RouteAttributes> = self.get("/routes", &[]).await?;
        Ok(doc.into_resources().into_iter().map(Route::from_resource).collect())
    }

    pub async fn lines(&self) -> Result<Vec<Line>, UpstreamError> {
        let doc: JsonApiDocument<LineAttributes> = self.get("/lines", &[]).await?;
        Ok(doc.into_resources().into_iter().map(Line::from_resource).collect())
    }

    pub async fn stops_for_route(&self, route_id: &str) -> Result<Vec<Stop>, UpstreamError> {
        let doc: JsonApiDocument<StopAttributes> = self
            .get("/stops", &[("filter[route]", route_id.to_string())])
            .await?;
        Ok(doc.into_resources().into_iter().map(Stop::from_resource).collect())
    }

    pub async fn stop(&self, stop_id: &str) -> Result<Option<Stop>, UpstreamError> {
        let doc: JsonApiDocument<StopAttributes> =
            self.get(&format!("/stops/{}", stop_id), &[]).await?;
        Ok(doc.into_resources().into_iter().map(Stop::from_resource).next())
    }

    pub async fn predictions_for_stop(
        &self,
        stop_id: &str,
    ) -> Result<Vec<Prediction>, UpstreamError> {
        let doc: JsonApiDocument<PredictionAttributes> = self
            .get("/predictions", &[("filter[stop]", stop_id.to_string())])
            .await?;
        Ok(doc
            .into_resources()
            .into_iter()
            .map(Prediction::from_resource)
            .collect())
    }

    pub async fn predictions_for_route(
        &self,
        route_id: &str,
    ) -> Result<Vec<Prediction>, UpstreamError> {
        let doc: JsonApiDocument<PredictionAttributes> = self
            .get("/predictions", &[("filter[route]", route_id.to_string())])
            .await?;
        Ok(doc
            .into_resources()
            .into_iter()
            .map(Prediction::from_resource)
            .collect())
    }

    /// Scheduled departures for a stop, bounded by a clock-time window around
    /// `now`. Side-loads trips so each row carries the trip headsign.
    pub async fn schedules_for_stop(
        &self,
        stop_id: &str,
        now: DateTime<Utc>,
        window_minutes: i64,
    ) -> Result<Vec<ScheduledDeparture>, UpstreamError> {
        let min_time = now - chrono::Duration::minutes(5);
        let max_time = now + chrono::Duration::minutes(window_minutes);
        let doc: JsonApiDocument<ScheduleAttributes> = self
            .get(
                "/schedules",
                &[
                    ("filter[stop]", stop_id.to_string()),
                    ("filter[min_time]", min_time.format("%H:%M").to_string()),
                    ("filter[max_time]", max_time.format("%H:%M").to_string()),
                    ("include", "trip".to_string()),
                ],
            )
            .await?;

        let trip_headsigns: HashMap<String, String> = doc
            .included_of_kind("trip")
            .into_iter()
            .filter_map(|(id, raw)| {
                raw.attribute_str("headsign")
                    .map(|h| (id.to_string(), h.to_string()))
            })
            .collect();

        Ok(doc
            .into_resources()
            .into_iter()
            .map(|res| {
                let mut row = ScheduledDeparture::from_resource(res);
                row.trip_headsign = row
                    .trip_id
                    .as_ref()
                    .and_then(|tid| trip_headsigns.get(tid).cloned());
                row
            })
            .collect())
    }

    pub async fn vehicles(&self) -> Result<Vec<Vehicle>, UpstreamError> {
        let doc: JsonApiDocument<VehicleAttributes> = self.get("/vehicles", &[]).await?;
        Ok(doc
            .into_resources()
            .into_iter()
            .map(Vehicle::from_resource)
            .collect())
    }

    pub async fn alerts(&self) -> Result<Vec<Alert>, UpstreamError> {
        let doc: JsonApiDocument<AlertAttributes> = self.get("/alerts", &[]).await?;
        Ok(doc.into_resources().into_iter().map(Alert::from_resource).collect())
    }

    pub async fn trips_for_route(&self, route_id: &str) -> Result<Vec<Trip>, UpstreamError> {
        let doc: JsonApiDocument<TripAttributes> = self
            .get("/trips", &[("filter[route]", route_id.to_string())])
            .await?;
        Ok(doc.into_resources().into_iter().map(Trip::from_resource).collect())
    }

    pub async fn trip(&self, trip_id: &str) -> Result<Option<Trip>, UpstreamError> {
        let doc: JsonApiDocument<TripAttributes> =
            self.get(&format!("/trips/{}", trip_id), &[]).await?;
        Ok(doc.into_resources().into_iter().map(Trip::from_resource).next())
    }

    pub async fn shapes_for_route(&self, route_id: &str) -> Result<Vec<Shape>, UpstreamError> {
        let doc: JsonApiDocument<ShapeAttributes> = self
            .get("/shapes", &[("filter[route]", route_id.to_string())])
            .await?;
        Ok(doc
            .into_resources()
            .into_iter()
            .map(|res| Shape::from_resource(res, route_id))
            .collect())
    }

    pub async fn live_facilities(&self) -> Result<Vec<LiveFacility>, UpstreamError> {
        let doc: JsonApiDocument<LiveFacilityAttributes> =
            self.get("/live_facilities", &[]).await?;
        Ok(doc
            .into_resources()
            .into_iter()
            .map(LiveFacility::from_resource)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RetryConfig};

    fn make_client(rate: RateLimitConfig) -> UpstreamClient {
        UpstreamClient::new(UpstreamConfig {
            base_url: "https://transit.example".to_string(),
            api_key: None,
            rate_limit: rate,
            retry: RetryConfig::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [408u16, 409, 425, 429, 500, 502, 503, 504] {
            let err = UpstreamError::Status {
                path: "/stops".to_string(),
                status,
                body: String::new(),
            };
            assert!(err.is_retryable(), "status {} should retry", status);
        }
        let err = UpstreamError::Status {
            path: "/stops".to_string(),
            status: 404,
            body: String::new(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_decode_errors_do_not_retry() {
        let source = serde_json::from_str::<serde_json::Value>("nope").unwrap_err();
        let err = UpstreamError::Decode {
            path: "/routes".to_string(),
            source,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_build_url_appends_params_and_key() {
        let mut client = make_client(RateLimitConfig::default());
        client.api_key = Some("secret key".to_string());
        let url = client.build_url(
            "/predictions",
            &[("filter[stop]", "place-sstat".to_string())],
        );
        assert_eq!(
            url,
            "https://transit.example/predictions?filter%5Bstop%5D=place-sstat&api_key=secret%20key"
        );
    }

    #[test]
    fn test_build_url_without_params() {
        let client = make_client(RateLimitConfig::default());
        assert_eq!(client.build_url("/routes", &[]), "https://transit.example/routes");
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let client = make_client(RateLimitConfig::default());
        // jitter is +-30%, so compare against the widest bounds
        let first = client.backoff_delay(0);
        assert!(first >= Duration::from_millis(175) && first <= Duration::from_millis(325));
        let late = client.backoff_delay(12);
        let cap = Duration::from_millis(client.config.retry.max_backoff_ms);
        assert!(late <= cap.mul_f64(1.3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_enforces_min_spacing() {
        let client = make_client(RateLimitConfig {
            max_requests: 100,
            window_secs: 60,
            min_spacing_ms: 50,
        });
        let start = tokio::time::Instant::now();
        client.throttle().await;
        client.throttle().await;
        client.throttle().await;
        // two spacing gaps (jitter may stretch each by up to 25%)
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_defers_over_window_budget() {
        let client = make_client(RateLimitConfig {
            max_requests: 2,
            window_secs: 10,
            min_spacing_ms: 0,
        });
        let start = tokio::time::Instant::now();
        client.throttle().await;
        client.throttle().await;
        // third call exceeds the window budget and must wait for the oldest
        // timestamp to age out
        client.throttle().await;
        assert!(start.elapsed() >= Duration::from_secs(9));
        let snapshot = client.telemetry().await;
        assert!(snapshot.rate_limit_delays >= 1);
    }
}
