//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::broker::BrokerStats;

pub use routes::{create_router, AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker_accepting: bool,
    pub broker: BrokerStats,
}

/// Build the application router
///
/// Layers run outermost first: request id, tracing, then request logging on
/// the `/api/v1` routes.
pub fn build_router(state: AppState) -> Router {
    let api_routes =
        create_router().layer(axum::middleware::from_fn(middleware::logging_middleware));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        broker_accepting: state.broker.is_accepting(),
        broker: state.broker.stats(),
    })
}
