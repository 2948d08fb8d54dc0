//! Subscribe to a channel with callback handlers and watch the connection.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,ws_pubsub=debug cargo run --example subscribe --features tracing -- wss://example.com/socket
//! ```

use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use ws_pubsub::Client;
use ws_pubsub::subscription::SubscribeRequest;
use ws_pubsub::ws::Hooks;
use ws_pubsub::ws::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/socket".to_owned());

    let hooks = Hooks::new()
        .on_open(|| info!("connection open"))
        .on_error(|e| warn!(error = %e, "connection error"))
        .on_close(|info| info!(code = info.code, reason = %info.reason, "connection closed"));

    let config = Config::builder()
        .heartbeat_interval(Duration::from_secs(10))
        .build();
    let client = Client::with_hooks(&endpoint, config, hooks)?;

    let request = SubscribeRequest::new("prices", |envelope| {
        info!(channel = "prices", data = ?envelope.data);
        Ok(())
    })
    .data(json!({ "symbols": ["btcusdt", "ethusdt"] }))
    .on_error(|envelope| {
        error!(channel = "prices", envelope = %envelope.raw, "subscription rejected");
        Ok(())
    });
    client.subscribe(request)?;

    let mut diagnostics = client.diagnostics();
    tokio::spawn(async move {
        while let Ok(diagnostic) = diagnostics.recv().await {
            warn!(%diagnostic);
        }
    });

    tokio::time::sleep(Duration::from_secs(30)).await;

    info!(state = ?client.state(), subscriptions = client.subscription_count());
    client.close_normal()?;

    Ok(())
}
