//! Consume a channel as a stream.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example stream --features tracing -- wss://example.com/socket
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use tokio::time::timeout;
use tracing::{debug, info};
use ws_pubsub::Client;
use ws_pubsub::ws::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/socket".to_owned());
    let client = Client::new(&endpoint, Config::default())?;

    info!(stream = "trades", "Subscribing");
    let stream = client.subscribe_stream("trades", None)?;
    let mut stream = Box::pin(stream);
    let mut count = 0;

    while let Ok(Some(result)) = timeout(Duration::from_secs(10), stream.next()).await {
        match result {
            Ok(envelope) => {
                info!(stream = "trades", data = ?envelope.data);
                count += 1;
                if count >= 10 {
                    break;
                }
            }
            Err(e) => debug!(stream = "trades", error = %e),
        }
    }
    info!(stream = "trades", received = count);

    client.unsubscribe("trades");
    client.close_normal()?;

    Ok(())
}
