//! HTTP intake gateway
//!
//! The telephony switch posts inbound SMS and service checks here; the cloud
//! posts subscriber, status and notification pushes.

pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let sync_routes = Router::new()
        .route("/subscribers", post(handlers::sync_subscribers))
        .route("/status", post(handlers::sync_status))
        .route("/notifications", post(handlers::sync_notifications));

    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .route("/api/v1/sms/incoming", post(handlers::incoming_sms))
        .route(
            "/api/v1/subscribers/{subscriber}/service",
            get(handlers::service_allowed),
        )
        .nest("/api/v1/sync", sync_routes)
        .with_state(state)
}

/// Start HTTP Gateway server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {} (port in use?)", addr, e))?;

    tracing::info!(%addr, "Gateway listening");
    tracing::info!("SMS intake: POST /api/v1/sms/incoming");
    tracing::info!("Cloud sync: POST /api/v1/sync/{{subscribers,status,notifications}}");

    axum::serve(listener, app).await?;
    Ok(())
}
