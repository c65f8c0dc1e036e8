//! HTTP boundary: one module per API area, nested under `/api`.

pub mod departures;
pub mod error;
pub mod home;
pub mod lines;
pub mod stations;
pub mod system;
pub mod trips;
pub mod vehicles;

pub use error::{internal_error, ErrorResponse};

use axum::Router;
use std::sync::Arc;

use crate::cache::ResourceCache;
use crate::providers::UpstreamClient;
use crate::stations::aggregate::AggregationService;

pub fn router(
    cache: Arc<ResourceCache>,
    client: Arc<UpstreamClient>,
    aggregator: Arc<AggregationService>,
) -> Router {
    Router::new()
        .nest("/home", home::router(Arc::clone(&aggregator)))
        .nest(
            "/stations",
            stations::router(Arc::clone(&cache), aggregator),
        )
        .nest("/lines", lines::lines_router(Arc::clone(&cache)))
        .nest("/routes", lines::routes_router(Arc::clone(&cache)))
        .nest(
            "/stops",
            departures::router(Arc::clone(&cache), Arc::clone(&client)),
        )
        .nest(
            "/trips",
            trips::router(Arc::clone(&cache), Arc::clone(&client)),
        )
        .nest("/vehicles", vehicles::router(Arc::clone(&cache)))
        .nest(
            "/system",
            system::system_router(Arc::clone(&cache), Arc::clone(&client)),
        )
        .nest("/health", system::health_router(cache, client))
}
