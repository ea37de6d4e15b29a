//! Wire types — worker frames and the Gemini-compatible JSON envelope.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Worker frames ───────────────────────────────────────────────────

/// Frames the bridge sends to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Connection confirmation, sent right after attach.
    Connected { status: String },
    /// A dispatched request the worker should execute.
    Request {
        #[serde(rename = "requestId")]
        request_id: Uuid,
        message: String,
        model: String,
    },
    /// Keepalive answer; timestamp is seconds since the Unix epoch.
    Pong { timestamp: f64 },
}

impl ServerFrame {
    pub fn connected() -> Self {
        Self::Connected {
            status: "ok".to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }
}

/// Frames the worker sends to the bridge.
///
/// A `response` frame carries either a reply text or an error message;
/// when both are present the error wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    Response {
        #[serde(rename = "requestId")]
        request_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Ping,
}

// ── Gemini API envelope ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Request body of the generateContent endpoint:
/// `{contents: [{parts: [{text: "..."}]}]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    #[serde(default)]
    pub contents: Vec<Content>,
}

impl GenerateContentRequest {
    /// Extract the prompt text: first part of the first content entry.
    /// Returns `None` for a missing or empty message.
    pub fn message_text(&self) -> Option<&str> {
        let text = self.contents.first()?.parts.first()?.text.as_str();
        if text.is_empty() { None } else { Some(text) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub content: Content,
}

/// Response body of the generateContent endpoint:
/// `{candidates: [{content: {parts: [{text: "..."}]}}]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContentResponse {
    pub candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![Part { text: text.into() }],
                },
            }],
        }
    }
}
