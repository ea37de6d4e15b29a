//! Worker-facing HTTP pull transport.
//!
//! Exists because userscript CSP can block WebSockets: the worker instead
//! polls `GET /poll` for at most one pending request and posts its result to
//! `POST /response`. Each poll doubles as a heartbeat.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::broker::router::RouteOutcome;
use crate::protocol::WorkerFrame;

use super::AppState;

/// Polling endpoint: returns the oldest dispatchable request, or none.
/// The connection token is echoed back by the worker in `/response`; it is
/// null while a push-transport worker holds the connection.
pub async fn poll(State(state): State<AppState>) -> impl IntoResponse {
    let turn = state.broker.poll_next().await;
    match turn.job {
        Some(job) => Json(serde_json::json!({
            "request": {
                "requestId": job.request_id,
                "message": job.payload,
                "model": job.model,
            },
            "connectionToken": turn.token,
        })),
        None => Json(serde_json::json!({
            "request": null,
            "connectionToken": turn.token,
        })),
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkerResponseBody {
    #[serde(rename = "requestId")]
    pub request_id: Uuid,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Optional: workers that predate token echoing omit this, and the body
    /// is resolved against the active poll connection, if there is one.
    #[serde(rename = "connectionToken", default)]
    pub connection_token: Option<u64>,
}

/// Endpoint for the worker to report a result or error back.
pub async fn receive_response(
    State(state): State<AppState>,
    Json(body): Json<WorkerResponseBody>,
) -> impl IntoResponse {
    let token = match body.connection_token {
        Some(token) => token,
        None => state.broker.active_poll_token().await.unwrap_or(0),
    };

    let frame = WorkerFrame::Response {
        request_id: body.request_id,
        response: body.response,
        error: body.error,
    };

    match state.broker.on_worker_message(token, frame).await {
        RouteOutcome::Resolved => {
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
        }
        RouteOutcome::Ignored => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Unknown requestId"})),
        ),
        RouteOutcome::Stale => {
            debug!(token, "Response on superseded connection discarded");
            (StatusCode::OK, Json(serde_json::json!({"status": "stale"})))
        }
        // A response body never routes as a ping.
        RouteOutcome::Pong(_) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))),
    }
}
