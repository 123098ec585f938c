// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::active_run::{ActiveRun, RunSettings, WatchFactory};
use crate::application::fleet_api::FleetApi;
use crate::application::geo_sampler::{PositionWatch, SamplerConfig};
use crate::application::route_guidance::{DirectionsProvider, RouteGuidance};
use crate::application::telemetry_uploader::DriverIdentity;
use crate::infrastructure::config::load_tracker_config;
use crate::infrastructure::gpsd_watch::GpsdWatch;
use crate::infrastructure::http_fleet_api::HttpFleetApi;
use crate::infrastructure::mapbox_directions::{MapboxConfig, MapboxDirections};
use crate::infrastructure::osrm_directions::{OsrmConfig, OsrmDirections};
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    confirm_visit, get_run, health_check, prepare_visit, refresh, resume, run_events,
    start_tracking, stop_tracking, undo, update_status,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("collection_tracker=info,tower_http=info")),
        )
        .init();

    // Load configuration
    let config = load_tracker_config().context("Failed to load configuration")?;

    // Remote collaborators (infrastructure layer)
    let api: Arc<dyn FleetApi> = Arc::new(HttpFleetApi::new(config.api.clone())?);

    let mut providers: Vec<Arc<dyn DirectionsProvider>> = Vec::new();
    if config.directions.mapbox_token.is_some() {
        providers.push(Arc::new(MapboxDirections::new(MapboxConfig {
            base_url: config.directions.mapbox_base_url.clone(),
            access_token: config.directions.mapbox_token.clone(),
            profile: config.directions.profile.clone(),
            timeout_secs: config.directions.timeout_secs,
        })?));
    } else {
        tracing::info!("No Mapbox token configured, using OSRM only");
    }
    providers.push(Arc::new(OsrmDirections::new(OsrmConfig {
        base_url: config.directions.osrm_base_url.clone(),
        profile: config.directions.profile.clone(),
        timeout_secs: config.directions.timeout_secs,
    })?));

    let gps = config.gps.clone();
    let watch_factory: WatchFactory = Arc::new(move || {
        Box::new(GpsdWatch::new(
            gps.gpsd_addr.clone(),
            Duration::from_secs(gps.fix_timeout_secs),
        )) as Box<dyn PositionWatch>
    });

    // Active run (application layer)
    let settings = RunSettings {
        route_id: config.run.route_id.clone(),
        depot: config.run.depot,
        undo_display_window: Duration::from_secs(config.run.undo_display_secs),
        throttle: config.throttle.policy(),
        identity: DriverIdentity {
            explicit: config.session.driver_id.clone(),
            session_user_id: config.session.user_id.clone(),
            session_profile: config.session.profile_json.clone(),
        },
        sampler: SamplerConfig {
            initial_backoff: Duration::from_millis(config.gps.initial_backoff_ms),
            max_backoff: Duration::from_secs(config.gps.max_backoff_secs),
            ..Default::default()
        },
    };
    let run = ActiveRun::new(settings, api, RouteGuidance::new(providers), watch_factory);

    if let Err(e) = run.refresh().await {
        tracing::warn!(error = %e, "Initial route load failed, continuing with an empty stop list");
    }
    run.start_tracking();

    // Build router (presentation layer)
    let state = Arc::new(AppState { run: run.clone() });
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/run", get(get_run))
        .route("/run/events", get(run_events))
        .route("/tracking/start", post(start_tracking))
        .route("/tracking/stop", post(stop_tracking))
        .route("/stops/:id/visit", post(prepare_visit))
        .route("/stops/:id/visit/confirm", post(confirm_visit))
        .route("/undo", post(undo))
        .route("/status", post(update_status))
        .route("/resume", post(resume))
        .route("/refresh", post(refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    tracing::info!(%addr, route_id = %config.run.route_id, "Starting collection-tracker");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release the position watch before exiting.
    run.stop_tracking();
    tracing::info!("collection-tracker stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
