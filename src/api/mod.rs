//! HTTP server for the webhook service.
//!
//! Provides HTTP endpoints for:
//! - Service info and version
//! - Platform webhook challenge and event delivery

pub mod error;
pub mod routes;

use crate::config::ServerConfig;
use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tracing::info;

pub use routes::webhooks::{WebhookState, ACKNOWLEDGEMENT};

pub struct ApiServer {
    host: String,
    port: u16,
    webhooks: WebhookState,
}

impl ApiServer {
    pub fn new(config: &ServerConfig, webhooks: WebhookState) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            webhooks,
        }
    }

    pub async fn start(self) -> Result<()> {
        let platform = self.webhooks.config.platform.clone();
        let app = router(self.webhooks);

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        info!("API server listening on http://{}", addr);
        info!("Endpoints:");
        info!("  GET  /                    - Service info");
        info!("  GET  /version             - Get version info");
        info!("  GET  /webhooks/{}    - URL verification challenge", platform);
        info!("  POST /webhooks/{}    - Event delivery", platform);

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// The full application router.
pub fn router(webhooks: WebhookState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/version", get(version))
        .nest("/webhooks", routes::webhooks::router(webhooks))
        .layer(ServiceBuilder::new())
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "meetingest",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "meetingest"
    }))
}
