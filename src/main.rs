use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aqi;
mod api;
mod config;
mod db;
mod error;
mod features;
mod forecast;
mod ingestion;
mod model;
mod persistence;
mod registry;
mod training;

use api::{AppState, SharedState};
use config::Config;
use ingestion::fire::FireDetectionAdapter;
use ingestion::gridded::GriddedWeatherAdapter;
use ingestion::ground::GroundStationAdapter;
use ingestion::pblh::{BoundingBox, PblhAdapter};
use ingestion::reanalysis::ReanalysisAdapter;
use ingestion::satellite::SatelliteAdapter;
use ingestion::{RateLimiter, SourceAdapter};
use model::SatelliteProduct;
use registry::ModelRegistry;

/// Every configured upstream, one adapter instance each. Satellite products
/// each get their own adapter since they write to distinct tables.
fn build_adapters(config: &Config, client: reqwest::Client) -> Vec<Box<dyn SourceAdapter>> {
    let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();

    adapters.push(Box::new(GroundStationAdapter::new(
        client.clone(),
        "https://api.waqi.info",
        config.waqi_api_key.clone(),
    )));

    for product in [SatelliteProduct::No2, SatelliteProduct::Hcho, SatelliteProduct::O3] {
        adapters.push(Box::new(SatelliteAdapter::new(
            client.clone(),
            "https://earthdata.nasa.gov",
            config.earthdata_token.clone(),
            product,
            2_000,
        )));
    }

    adapters.push(Box::new(ReanalysisAdapter::new(
        client.clone(),
        "https://earthdata.nasa.gov",
        config.earthdata_token.clone(),
        2_000,
    )));

    adapters.push(Box::new(PblhAdapter::new(
        client.clone(),
        "https://earthdata.nasa.gov",
        BoundingBox {
            min_lat: -90.0,
            max_lat: 90.0,
            min_lon: -180.0,
            max_lon: 180.0,
        },
    )));

    adapters.push(Box::new(FireDetectionAdapter::new(
        client.clone(),
        "https://firms.modaps.eosdis.nasa.gov",
        config.earthdata_token.clone(),
    )));

    adapters.push(Box::new(GriddedWeatherAdapter::new(
        client,
        "https://api.openweathermap.org",
        config.openweather_api_key.clone(),
        GriddedWeatherAdapter::regular_grid(-60.0, 60.0, -180.0, 180.0, 5.0),
    )));

    adapters
}

fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/ingest", post(api::ingest))
        .route("/train", post(api::train))
        .route("/forecast/:city", get(api::forecast_city))
        .route("/forecast/ensemble/:city", get(api::forecast_ensemble))
        .route("/aqi/:city", get(api::current_aqi))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([Method::GET, Method::POST])
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "airwatch_forecast=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    info!("configuration loaded");

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()?;
    info!("metrics exporter listening on {}", metrics_addr);

    let pool = db::create_pool(&config.database_url, config.max_connections).await?;
    db::run_migrations(&pool).await?;
    info!("database ready");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.fetch_timeout_secs))
        .build()?;
    let adapters = build_adapters(&config, client);
    let rate_limiter = RateLimiter::new(config.fetch_rate_limit_per_min);
    let registry = ModelRegistry::new();

    let state: SharedState = Arc::new(AppState {
        pool,
        config: config.clone(),
        registry,
        adapters,
        rate_limiter,
    });

    let app = create_router(state);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = TcpListener::bind(&addr).await?;

    info!("airwatch-forecast starting on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
