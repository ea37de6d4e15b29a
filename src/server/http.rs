//! Client-facing endpoints: the Gemini-compatible generateContent route and
//! the health check.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info};

use crate::error::BrokerError;
use crate::protocol::{GenerateContentRequest, GenerateContentResponse};

use super::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.broker.health().await;
    Json(serde_json::json!({
        "status": "ok",
        "worker_ready": snapshot.worker_ready,
        "pending_requests": snapshot.pending_requests,
    }))
}

/// Gemini API compatible endpoint.
///
/// Accepts `{contents: [{parts: [{text}]}]}`, blocks until the worker
/// replies, and returns `{candidates: [{content: {parts: [{text}]}}]}`.
pub async fn generate_content(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Json(body): Json<GenerateContentRequest>,
) -> impl IntoResponse {
    let Some(message) = body.message_text() else {
        return error_response(StatusCode::BAD_REQUEST, "No message content found");
    };

    info!(model = %model, chars = message.len(), "generateContent request");

    match state.broker.submit(message.to_string(), model, None).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(serde_json::json!(GenerateContentResponse::from_text(reply))),
        ),
        Err(error) => {
            debug!(error = %error, "generateContent failed");
            error_response(status_for(&error), &error.to_string())
        }
    }
}

/// Original-style error envelope: `{error: {message, code}}`.
fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({
            "error": {
                "message": message,
                "code": status.as_u16(),
            }
        })),
    )
}

fn status_for(error: &BrokerError) -> StatusCode {
    match error {
        BrokerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        BrokerError::NoWorkerAvailable => StatusCode::SERVICE_UNAVAILABLE,
        BrokerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        BrokerError::WorkerDisconnected => StatusCode::BAD_GATEWAY,
        BrokerError::WorkerReported(_) | BrokerError::Cancelled => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
