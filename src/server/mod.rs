//! Server module
//!
//! HTTP and WebSocket transports over one shared [`AppState`].

pub mod http;
pub mod state;
pub mod ws;

use axum::{http::HeaderValue, routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;

pub use state::{AppState, EndedPoll};

/// CORS layer for the configured origin; `*` allows any.
pub fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin.trim() == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin.trim()) {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            warn!(origin, "Unusable CORS origin, allowing none");
            layer
        }
    }
}

/// Full application router.
pub fn build_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    http::routes()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(cors_layer(&config.cors_origin))
}

/// Bind and serve until `shutdown` is cancelled, then stop every countdown.
pub async fn serve(
    state: Arc<AppState>,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, cors_origin = %config.cors_origin, "Listening");

    let app = build_router(state.clone(), config);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    state.shutdown();
    info!("Server stopped");
    result
}
