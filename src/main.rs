use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use hydroflux::assets;
use hydroflux::config::{PipelineConfig, Settings};
use hydroflux::handlers;
use hydroflux::registry::Registry;
use hydroflux::resources::Resources;
use hydroflux::scheduler::{schedule, sensor, RunStateDb, Scheduler};
use hydroflux::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("hydroflux=debug,tower_http=info")
        }))
        .init();

    let settings = Settings::from_env()?;
    let config = Arc::new(PipelineConfig::load("pipeline.toml")?);

    let registry = Arc::new(Registry::builtin());
    for api in registry.apis.values() {
        api.validate()?;
    }

    let resources = Arc::new(Resources::initialize(&settings).await?);

    let state_db = Arc::new(RunStateDb::open(&settings.state_db_path)?);
    tracing::info!("run-state db opened at {}", settings.state_db_path);

    let catalog = Arc::new(assets::build_catalog()?);
    let scheduler = Scheduler::new(
        catalog.clone(),
        state_db.clone(),
        resources,
        config.clone(),
        registry,
        assets::jobs(),
    );

    schedule::spawn_schedules(scheduler.clone(), settings.run_timezone);
    sensor::spawn_sensors(
        scheduler,
        assets::sensors::all(),
        config.scheduler.sensor_interval_secs,
    );

    let app_state = AppState { state_db, catalog };
    let app = Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .route("/api/v1/assets", get(handlers::status::list_assets))
        .route("/api/v1/assets/{name}/runs", get(handlers::status::asset_runs))
        .route("/api/v1/runs/latest", get(handlers::status::latest_runs))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.http_listen));
    tracing::info!("hydroflux listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
