use std::sync::Arc;

use gemini_bridge::broker::Broker;
use gemini_bridge::broker::watcher::spawn_timeout_watcher;
use gemini_bridge::clock::SystemClock;
use gemini_bridge::config::BridgeConfig;
use gemini_bridge::server::bridge_routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BridgeConfig::from_env()?;

    eprintln!("Gemini Bridge v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API:    http://{}/v1/models/{{model}}/generateContent", config.bind_addr);
    eprintln!("   Worker: ws://{}/ws  (or GET /poll + POST /response)", config.bind_addr);
    eprintln!("   Health: http://{}/health", config.bind_addr);
    eprintln!(
        "   Timeout: {}s, liveness window: {}s\n",
        config.request_timeout.as_secs(),
        config.liveness_window.as_secs()
    );

    let broker = Broker::new(config.clone(), Arc::new(SystemClock));

    let _watcher = spawn_timeout_watcher(Arc::clone(&broker), config.sweep_interval);

    let app = bridge_routes(broker);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Bridge server started");
    axum::serve(listener, app).await?;

    Ok(())
}
