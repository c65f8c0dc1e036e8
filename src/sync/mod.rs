//! Background polling of the upstream provider into the resource cache.
//!
//! One interval loop per tier: a slow static tier (routes, lines, stops,
//! trips, shapes) and fast realtime tiers (vehicles, predictions, alerts).
//! Each loop owns exactly one resource kind's writes; a failed cycle logs and
//! waits for the next tick. Jobs are independent of one another; there is no
//! ordering requirement between, say, vehicles and predictions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::{ResourceCache, StopsData};
use crate::config::SyncConfig;
use crate::models::{Shape, Stop, Trip};
use crate::providers::{UpstreamClient, UpstreamError};

pub struct PollingScheduler {
    client: Arc<UpstreamClient>,
    cache: Arc<ResourceCache>,
    config: SyncConfig,
}

impl PollingScheduler {
    pub fn new(client: Arc<UpstreamClient>, cache: Arc<ResourceCache>, config: SyncConfig) -> Self {
        Self {
            client,
            cache,
            config,
        }
    }

    /// Start all polling loops. Runs forever.
    pub async fn start(self: Arc<Self>) {
        info!("Starting polling scheduler");

        // initial static sync before the realtime loops begin; retried with
        // a growing wait because nothing works without routes and stops
        self.refresh_static_with_retry().await;

        let static_self = self.clone();
        let static_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                static_self.config.static_interval_secs,
            ));
            // skip the first tick which fires immediately (we already synced)
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = static_self.refresh_static().await {
                    error!(error = %e, "Static resource refresh failed, will retry next tick");
                }
            }
        });

        let vehicles_self = self.clone();
        let vehicles_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                vehicles_self.config.vehicles_interval_secs,
            ));
            loop {
                interval.tick().await;
                if let Err(e) = vehicles_self.refresh_vehicles().await {
                    error!(error = %e, "Vehicle refresh failed, will retry next tick");
                }
            }
        });

        let predictions_self = self.clone();
        let predictions_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                predictions_self.config.predictions_interval_secs,
            ));
            loop {
                interval.tick().await;
                if let Err(e) = predictions_self.refresh_predictions().await {
                    error!(error = %e, "Prediction refresh failed, will retry next tick");
                }
            }
        });

        let alerts_self = self.clone();
        let alerts_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                alerts_self.config.alerts_interval_secs,
            ));
            loop {
                interval.tick().await;
                if let Err(e) = alerts_self.refresh_alerts().await {
                    error!(error = %e, "Alert refresh failed, will retry next tick");
                }
            }
        });

        let _ = tokio::join!(
            static_handle,
            vehicles_handle,
            predictions_handle,
            alerts_handle
        );
    }

    async fn refresh_static_with_retry(&self) {
        let max_retries = 5;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.refresh_static().await {
                Ok(()) => break,
                Err(e) => {
                    if attempt >= max_retries {
                        error!(error = %e, attempts = attempt, "Initial static sync failed after max retries, serving without static data");
                        break;
                    }
                    let wait_secs = 30 * attempt;
                    error!(error = %e, attempt, wait_secs, "Initial static sync failed, retrying...");
                    tokio::time::sleep(tokio::time::Duration::from_secs(wait_secs as u64)).await;
                }
            }
        }
    }

    /// Refresh the slow-moving tier: routes and lines first, then the
    /// route-by-route sub-fetches for stops, trips and shapes.
    async fn refresh_static(&self) -> Result<(), UpstreamError> {
        let routes = self.client.routes().await?;
        info!(routes = routes.len(), "Fetched routes");

        let lines = self.client.lines().await?;

        let mut stops: Vec<Stop> = Vec::new();
        let mut seen_stops: HashSet<String> = HashSet::new();
        let mut routes_by_stop: HashMap<String, Vec<String>> = HashMap::new();
        let mut trips: Vec<Trip> = Vec::new();
        let mut shapes: Vec<Shape> = Vec::new();

        for route in &routes {
            let route_stops = self.client.stops_for_route(&route.id).await?;
            for stop in route_stops {
                routes_by_stop
                    .entry(stop.id.clone())
                    .or_default()
                    .push(route.id.clone());
                if seen_stops.insert(stop.id.clone()) {
                    stops.push(stop);
                }
            }

            trips.extend(self.client.trips_for_route(&route.id).await?);
            shapes.extend(self.client.shapes_for_route(&route.id).await?);

            // spacing between per-route chunks keeps the burst inside the
            // client's rate budget
            tokio::time::sleep(tokio::time::Duration::from_millis(
                self.config.route_chunk_delay_ms,
            ))
            .await;
        }

        info!(
            stops = stops.len(),
            trips = trips.len(),
            shapes = shapes.len(),
            "Fetched static resources"
        );

        self.cache.set_routes(routes).await;
        self.cache.set_lines(lines).await;
        self.cache
            .set_stops(StopsData {
                stops,
                routes_by_stop,
            })
            .await;
        self.cache.set_trips(trips).await;
        self.cache.set_shapes(shapes).await;
        Ok(())
    }

    async fn refresh_vehicles(&self) -> Result<(), UpstreamError> {
        let vehicles = self.client.vehicles().await?;
        self.cache.set_vehicles(vehicles).await;
        Ok(())
    }

    /// Refill the prediction pool, route by route.
    async fn refresh_predictions(&self) -> Result<(), UpstreamError> {
        let Some(routes) = self.cache.routes().await else {
            warn!("No routes cached yet, skipping prediction refresh");
            return Ok(());
        };

        let mut predictions = Vec::new();
        let mut failed_routes = 0usize;
        for route in routes.data.iter() {
            // one broken route must not empty the whole pool
            match self.client.predictions_for_route(&route.id).await {
                Ok(batch) => predictions.extend(batch),
                Err(e) => {
                    failed_routes += 1;
                    warn!(route_id = %route.id, error = %e, "Prediction fetch failed for route");
                }
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(
                self.config.route_chunk_delay_ms,
            ))
            .await;
        }

        info!(
            predictions = predictions.len(),
            failed_routes, "Refreshed prediction pool"
        );
        self.cache.set_predictions(predictions).await;
        Ok(())
    }

    async fn refresh_alerts(&self) -> Result<(), UpstreamError> {
        let alerts = self.client.alerts().await?;
        self.cache.set_alerts(alerts).await;
        Ok(())
    }
}
