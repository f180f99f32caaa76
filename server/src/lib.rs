//! The HTTP surface: three wire-compatible dialect endpoints multiplexed
//! onto the single upstream protocol, plus the catalog and health routes.

mod auth;
mod error;
mod orchestrator;
mod routes;
mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use slipstream_pool::AccountStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::GatewayError;
pub use state::AppState;

/// Build the router over an assembled state.
pub fn router<S: AccountStore>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(routes::chat_completions::<S>))
        .route("/v1/responses", post(routes::responses::<S>))
        .route("/v1/messages", post(routes::messages::<S>))
        .route("/v1/models", get(routes::models::<S>))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
