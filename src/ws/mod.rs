//! Connection layer.
//!
//! A single background task owns the transport and everything whose lifetime
//! is tied to it: the pending frame queue, the heartbeat, the send watchdog and
//! the reconnect schedule.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: handle to the connection task; posts requests and observes state
//! - [`Connector`]: opens transports; [`WsConnector`] is the `tokio-tungstenite` implementation
//! - [`Hooks`]: connection-level callbacks
//!
//! # Example
//!
//! ```no_run
//! use url::Url;
//! use ws_pubsub::ws::config::Config;
//! use ws_pubsub::ws::{ConnectionManager, Hooks, WsConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = Url::parse("wss://example.com/socket")?;
//! let hooks = Hooks::new().on_open(|| println!("connected"));
//! let connection =
//!     ConnectionManager::new(endpoint, Config::default(), hooks, WsConnector::default());
//!
//! connection.send_text(r#"{"channel":"prices"}"#.to_owned())?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod hooks;
#[cfg(test)]
pub(crate) mod testing;
pub(crate) mod timers;
pub mod traits;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use hooks::Hooks;
pub use traits::*;
pub use transport::WsConnector;
