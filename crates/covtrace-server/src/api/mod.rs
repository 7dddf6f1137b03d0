//! HTTP API of the covtrace server

pub mod error;
pub mod extract;
pub mod handlers;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub server_name: String,
    pub store: bool,
    pub broker: bool,
    pub policy_rules: usize,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadyResponse>) {
    let store = state.store.ping().await.is_ok();
    let broker = state.publisher.ping().await.is_ok();
    let ready = store && broker;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            ready,
            server_name: state.authority.config().server_name.clone(),
            store,
            broker,
            policy_rules: state.enforcer.len(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Public endpoints
        .route("/v1/ping", get(handlers::ping))
        .route("/v1/activation_code", post(handlers::activation_code))
        .route("/v1/credentials", post(handlers::credentials))
        .route("/v1/identifier", post(handlers::new_identifier))
        // Bearer endpoints
        .route("/v1/credentials/renew", post(handlers::renew_credentials))
        .route("/v1/record", post(handlers::record))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
