//! devpulse API server
//!
//! Accepts snapshots from devices, stores them in SQLite, and serves them
//! back for dashboards. Also queues remote commands for devices.

mod api;
pub mod error;
pub mod store;

pub use error::{ApiError, ApiResult};
pub use store::{MetricsStore, Registration, StoreError, StoreResult};

use axum::routing::{get, post};
use axum::Router;
use devpulse_core::config::ServerSettings;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
pub struct AppState {
    pub store: MetricsStore,
}

impl AppState {
    pub fn new(store: MetricsStore) -> Arc<Self> {
        Arc::new(Self { store })
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/devices", post(api::register_device))
        .route(
            "/v1/metrics",
            post(api::upload_metrics).get(api::get_metrics),
        )
        .route("/v1/snapshots", get(api::get_snapshots))
        .route(
            "/v1/devices/{device_id}/commands",
            post(api::create_command).get(api::list_commands),
        )
        .route(
            "/v1/devices/{device_id}/commands/{command_id}/ack",
            post(api::acknowledge_command),
        )
        .route("/api/health", get(api::health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on an already bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Open the database and run the server until ctrl-c
pub async fn start_server(settings: &ServerSettings) -> anyhow::Result<()> {
    let store = MetricsStore::open(&settings.database_path)?;
    let state = AppState::new(store);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("devpulse API listening on http://{}", addr);
    info!("  - Ingestion at POST /v1/metrics");
    info!("  - Health at /api/health");

    serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down API server");
    })
    .await
}
