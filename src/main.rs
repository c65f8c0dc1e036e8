pub mod api;
mod cache;
mod config;
mod departures;
mod models;
mod providers;
mod stations;
mod sync;
mod views;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use cache::ResourceCache;
use config::Config;
use providers::{RemoteCache, UpstreamClient};
use stations::aggregate::AggregationService;
use sync::PollingScheduler;

#[derive(OpenApi)]
#[openapi(
    info(title = "Headway Transit API", version = "0.1.0"),
    paths(
        api::home::get_home,
        api::stations::list_stations,
        api::stations::get_station_board,
        api::departures::get_stop_departures,
        api::lines::list_lines,
        api::lines::get_line_overview,
        api::lines::get_line_shapes,
        api::lines::get_route_shapes,
        api::trips::get_trip_track,
        api::vehicles::list_vehicles,
        api::system::get_insights,
        api::system::get_live_facilities,
        api::system::health_check,
    ),
    components(schemas(
        api::ErrorResponse,
        api::departures::StopDeparturesResponse,
        api::stations::StationListResponse,
        api::system::FacilityListResponse,
        api::lines::LineListResponse,
        api::lines::ShapeListResponse,
        api::vehicles::VehicleListResponse,
        api::system::HealthResponse,
        cache::CacheHealth,
        departures::blend::BlendedDeparture,
        departures::blend::EtaSource,
        departures::blend::DepartureStatus,
        models::Alert,
        models::InformedEntity,
        models::LiveFacility,
        models::Line,
        models::Route,
        models::Shape,
        models::Stop,
        models::Trip,
        models::Vehicle,
        providers::TelemetrySnapshot,
        stations::aggregate::DepartureGroup,
        stations::aggregate::HomeSnapshotResponse,
        stations::aggregate::StationBoardResponse,
        stations::aggregate::StationEntry,
        stations::aggregate::UpcomingTime,
        views::insights::LinePain,
        views::insights::SystemInsights,
        views::lines::DirectionHeadway,
        views::lines::LineOverview,
        views::lines::LineSummary,
        views::lines::SegmentHealth,
        views::trips::TrackStop,
        views::trips::TripTrack,
        views::vehicles::VehicleSnapshot,
    )),
    tags(
        (name = "home", description = "Rider home snapshot"),
        (name = "stations", description = "Station and departure board endpoints"),
        (name = "departures", description = "Blended departures per stop"),
        (name = "lines", description = "Line and route endpoints"),
        (name = "trips", description = "Trip tracking"),
        (name = "vehicles", description = "Live vehicle positions"),
        (name = "system", description = "Insights and service health")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").unwrap_or_else(|e| {
        tracing::warn!(error = %e, "No usable config.yaml, continuing with defaults");
        Config::default()
    });
    tracing::info!(upstream = %config.upstream.base_url, "Loaded configuration");

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true' for development");
    };

    // Remote cache is optional; absence degrades to memory-only
    let remote = Arc::new(RemoteCache::from_config(config.remote_cache_url.as_deref()));
    tracing::info!(status = remote.status(), "Remote cache");

    let client = Arc::new(
        UpstreamClient::new(config.upstream.clone()).expect("Failed to build upstream client"),
    );
    let resource_cache = Arc::new(ResourceCache::new(Arc::clone(&remote)));

    // Hydrate from the remote cache in the background; serving never waits
    let hydrate_cache = Arc::clone(&resource_cache);
    tokio::spawn(async move {
        hydrate_cache.hydrate_from_remote().await;
    });

    // Start the polling scheduler in the background
    let scheduler = Arc::new(PollingScheduler::new(
        Arc::clone(&client),
        Arc::clone(&resource_cache),
        config.sync.clone(),
    ));
    tokio::spawn(async move {
        scheduler.start().await;
    });

    let aggregator = Arc::new(AggregationService::new(
        Arc::clone(&resource_cache),
        Arc::clone(&client),
        Arc::clone(&remote),
    ));

    // Build the app
    let app = Router::new()
        .route("/", get(root))
        .nest("/api", api::router(resource_cache, client, aggregator))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {}: {}", config.bind_addr, e));

    tracing::info!("Server running on http://{}", config.bind_addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

async fn root() -> &'static str {
    "Headway Transit API"
}
