//! Process-wide store of the latest fetched resource collections.
//!
//! One slot per resource kind. Every `set_*` publishes a brand-new
//! `CacheEntry` (fresh `Arc`, fresh timestamp) instead of mutating in place,
//! so readers always observe a complete, consistent collection. The polling
//! scheduler is the only writer per resource; request handlers are the
//! readers.
//!
//! When a remote cache is configured the store hydrates from it at startup
//! and writes through on every set, both best-effort: remote failures never
//! reach a caller.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::models::{Alert, Line, Prediction, Route, Shape, Stop, Trip, Vehicle};
use crate::providers::RemoteCache;

/// Predictions older than this are reported stale by `health()`.
const PREDICTIONS_STALE_AFTER_MS: i64 = 90_000;

/// A published snapshot of one resource collection.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub data: Arc<T>,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            fetched_at: self.fetched_at,
        }
    }
}

impl<T> CacheEntry<T> {
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_milliseconds()
    }
}

/// Wire form for remote round trips.
#[derive(Serialize, Deserialize)]
struct StoredEntry<T> {
    data: T,
    fetched_at: DateTime<Utc>,
}

/// The stop collection plus the serving-route index built by the stop
/// polling job (stop id -> route ids observed serving it).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopsData {
    pub stops: Vec<Stop>,
    pub routes_by_stop: HashMap<String, Vec<String>>,
}

type Slot<T> = RwLock<Option<CacheEntry<T>>>;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CacheHealth {
    pub remote_cache_status: String,
    pub predictions_age_ms: Option<i64>,
    pub predictions_is_stale: bool,
}

pub struct ResourceCache {
    remote: Arc<RemoteCache>,
    routes: Slot<Vec<Route>>,
    lines: Slot<Vec<Line>>,
    stops: Slot<StopsData>,
    vehicles: Slot<Vec<Vehicle>>,
    predictions: Slot<Vec<Prediction>>,
    alerts: Slot<Vec<Alert>>,
    trips: Slot<Vec<Trip>>,
    shapes: Slot<Vec<Shape>>,
}

impl ResourceCache {
    pub fn new(remote: Arc<RemoteCache>) -> Self {
        Self {
            remote,
            routes: RwLock::new(None),
            lines: RwLock::new(None),
            stops: RwLock::new(None),
            vehicles: RwLock::new(None),
            predictions: RwLock::new(None),
            alerts: RwLock::new(None),
            trips: RwLock::new(None),
            shapes: RwLock::new(None),
        }
    }

    /// Best-effort hydration of every slot from the remote cache. Called
    /// once at startup, spawned so it never blocks serving.
    pub async fn hydrate_from_remote(&self) {
        if !self.remote.available() {
            return;
        }
        self.hydrate_slot(&self.routes, "resource:routes").await;
        self.hydrate_slot(&self.lines, "resource:lines").await;
        self.hydrate_slot(&self.stops, "resource:stops").await;
        self.hydrate_slot(&self.vehicles, "resource:vehicles").await;
        self.hydrate_slot(&self.predictions, "resource:predictions")
            .await;
        self.hydrate_slot(&self.alerts, "resource:alerts").await;
        self.hydrate_slot(&self.trips, "resource:trips").await;
        self.hydrate_slot(&self.shapes, "resource:shapes").await;
        tracing::info!("Finished remote cache hydration pass");
    }

    async fn hydrate_slot<T: DeserializeOwned + Send + Sync>(&self, slot: &Slot<T>, key: &str) {
        let Some(stored) = self.remote.get_json::<StoredEntry<T>>(key).await else {
            return;
        };
        let mut guard = slot.write().await;
        // a poll may already have landed fresher data
        let newer_exists = guard
            .as_ref()
            .map(|entry| entry.fetched_at >= stored.fetched_at)
            .unwrap_or(false);
        if !newer_exists {
            *guard = Some(CacheEntry {
                data: Arc::new(stored.data),
                fetched_at: stored.fetched_at,
            });
            tracing::debug!(key, "Hydrated resource from remote cache");
        }
    }

    async fn set_slot<T: Serialize + Send + Sync>(
        &self,
        slot: &Slot<T>,
        key: &str,
        ttl: Option<std::time::Duration>,
        data: T,
    ) {
        let entry = {
            let mut guard = slot.write().await;
            let mut fetched_at = Utc::now();
            if let Some(previous) = guard.as_ref() {
                // fetched_at must strictly increase across sets
                if fetched_at <= previous.fetched_at {
                    fetched_at = previous.fetched_at + Duration::milliseconds(1);
                }
            }
            let entry = CacheEntry {
                data: Arc::new(data),
                fetched_at,
            };
            *guard = Some(entry.clone());
            entry
        };

        let stored = StoredEntry {
            data: entry.data.as_ref(),
            fetched_at: entry.fetched_at,
        };
        self.remote.set_json(key, &stored, ttl).await;
    }

    async fn get_slot<T>(&self, slot: &Slot<T>) -> Option<CacheEntry<T>> {
        slot.read().await.clone()
    }

    pub async fn set_routes(&self, data: Vec<Route>) {
        self.set_slot(&self.routes, "resource:routes", None, data).await;
    }

    pub async fn routes(&self) -> Option<CacheEntry<Vec<Route>>> {
        self.get_slot(&self.routes).await
    }

    pub async fn set_lines(&self, data: Vec<Line>) {
        self.set_slot(&self.lines, "resource:lines", None, data).await;
    }

    pub async fn lines(&self) -> Option<CacheEntry<Vec<Line>>> {
        self.get_slot(&self.lines).await
    }

    pub async fn set_stops(&self, data: StopsData) {
        self.set_slot(&self.stops, "resource:stops", None, data).await;
    }

    pub async fn stops(&self) -> Option<CacheEntry<StopsData>> {
        self.get_slot(&self.stops).await
    }

    pub async fn set_vehicles(&self, data: Vec<Vehicle>) {
        self.set_slot(
            &self.vehicles,
            "resource:vehicles",
            Some(std::time::Duration::from_secs(60)),
            data,
        )
        .await;
    }

    pub async fn vehicles(&self) -> Option<CacheEntry<Vec<Vehicle>>> {
        self.get_slot(&self.vehicles).await
    }

    pub async fn set_predictions(&self, data: Vec<Prediction>) {
        self.set_slot(
            &self.predictions,
            "resource:predictions",
            Some(std::time::Duration::from_secs(60)),
            data,
        )
        .await;
    }

    pub async fn predictions(&self) -> Option<CacheEntry<Vec<Prediction>>> {
        self.get_slot(&self.predictions).await
    }

    pub async fn set_alerts(&self, data: Vec<Alert>) {
        self.set_slot(
            &self.alerts,
            "resource:alerts",
            Some(std::time::Duration::from_secs(120)),
            data,
        )
        .await;
    }

    pub async fn alerts(&self) -> Option<CacheEntry<Vec<Alert>>> {
        self.get_slot(&self.alerts).await
    }

    pub async fn set_trips(&self, data: Vec<Trip>) {
        self.set_slot(&self.trips, "resource:trips", None, data).await;
    }

    pub async fn trips(&self) -> Option<CacheEntry<Vec<Trip>>> {
        self.get_slot(&self.trips).await
    }

    pub async fn set_shapes(&self, data: Vec<Shape>) {
        self.set_slot(&self.shapes, "resource:shapes", None, data).await;
    }

    pub async fn shapes(&self) -> Option<CacheEntry<Vec<Shape>>> {
        self.get_slot(&self.shapes).await
    }

    pub async fn health(&self) -> CacheHealth {
        let now = Utc::now();
        let predictions_age_ms = self
            .predictions()
            .await
            .map(|entry| entry.age_ms(now).max(0));
        CacheHealth {
            remote_cache_status: self.remote.status().to_string(),
            predictions_age_ms,
            predictions_is_stale: predictions_age_ms
                .map(|age| age > PREDICTIONS_STALE_AFTER_MS)
                .unwrap_or(true),
        }
    }
}
