//! Error types for the bridge.

use std::time::Duration;

/// Configuration-related errors, surfaced at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures a `submit` call can surface to its caller.
///
/// Every request terminates with exactly one of these or a success text;
/// the broker never panics past its boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Deadline elapsed before the worker replied, at any stage.
    #[error("Request timed out after {waited:?}")]
    Timeout { waited: Duration },

    /// Worker connection was lost or replaced while the request was
    /// queued or in flight.
    #[error("Worker disconnected before replying")]
    WorkerDisconnected,

    /// Deadline elapsed while queued and no worker was attached.
    #[error("No worker connected. Ensure the userscript or driver is running")]
    NoWorkerAvailable,

    /// Worker explicitly reported a failure for this request.
    #[error("Worker reported error: {0}")]
    WorkerReported(String),

    /// Malformed payload, rejected before registration.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Caller abandoned the request before it resolved.
    #[error("Request cancelled by caller")]
    Cancelled,
}
