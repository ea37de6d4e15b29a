//! HTTP/WebSocket surface — adapters over the broker, no coordination logic.

pub mod http;
pub mod poll;
pub mod ws;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::broker::Broker;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
}

/// Build the Axum router: client-facing API, worker WebSocket, and worker
/// poll endpoints. CORS is wide open for localhost development.
pub fn bridge_routes(broker: Arc<Broker>) -> Router {
    let state = AppState { broker };

    Router::new()
        .route("/health", get(http::health))
        .route(
            "/v1/models/{model}/generateContent",
            post(http::generate_content),
        )
        .route("/ws", get(ws::worker_ws_handler))
        .route("/poll", get(poll::poll))
        .route("/response", post(poll::receive_response))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
