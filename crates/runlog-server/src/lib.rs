//! runlog-server: in-memory tracking server speaking the MLflow REST API.
//!
//! Used as the stand-in tracking service for tests and local development.

pub mod api;
pub mod auth;
pub mod error;
pub mod state;
pub mod store;

use std::net::SocketAddr;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;

pub use error::ApiError;
pub use state::{AuthConfig, ServerConfig};

pub const API_PREFIX: &str = "/api/2.0/mlflow";

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest(API_PREFIX, api::router())
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_auth))
        // Unauthenticated health check
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the server on the configured address.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, AppState::new(config.auth)).await
}

/// Serve on an already-bound listener.
pub async fn serve_listener(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    info!(
        "Tracking server at http://{}{}",
        listener.local_addr()?,
        API_PREFIX
    );
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
