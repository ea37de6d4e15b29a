//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Bridge configuration, built from environment variables with sane defaults.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: String,
    /// Default per-request deadline when the caller does not supply one.
    pub request_timeout: Duration,
    /// Window without any worker activity (poll, ping, reply) after which
    /// the connection is considered stale and detached.
    pub liveness_window: Duration,
    /// How often the timeout watcher sweeps deadlines and staleness.
    pub sweep_interval: Duration,
    /// Capacity of the job channel feeding a push-mode worker.
    pub job_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8765".to_string(),
            request_timeout: Duration::from_secs(60),
            liveness_window: Duration::from_secs(10),
            sweep_interval: Duration::from_millis(250),
            job_buffer: 32,
        }
    }
}

impl BridgeConfig {
    /// Build config from environment variables, falling back to defaults
    /// for anything unset. A variable that is set but unparseable is a
    /// startup error, not a silent default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr =
            std::env::var("GEMINI_BRIDGE_ADDR").unwrap_or_else(|_| defaults.bind_addr.clone());

        let request_timeout = env_u64("GEMINI_BRIDGE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let liveness_window = env_u64("GEMINI_BRIDGE_LIVENESS_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.liveness_window);

        let sweep_interval = env_u64("GEMINI_BRIDGE_SWEEP_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.sweep_interval);

        Ok(Self {
            bind_addr,
            request_timeout,
            liveness_window,
            sweep_interval,
            job_buffer: defaults.job_buffer,
        })
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(None),
        Ok(raw) => raw.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a non-negative integer, got {raw:?}"),
        }),
    }
}
