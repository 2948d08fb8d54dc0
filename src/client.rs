use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use url::Url;

use crate::Result;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::subscription::{Diagnostic, SubscribeRequest, Subscription};
use crate::ws::config::Config;
use crate::ws::{CloseInfo, ConnectionManager, ConnectionState, Connector, Hooks, WsConnector, WsError};

/// Publish/subscribe client over one reconnecting WebSocket.
///
/// Clones share the same connection. The connection stays up while any clone
/// exists; dropping the last one closes it with code 1000. A hook or handler
/// that captures a clone keeps the connection alive until it is unregistered.
///
/// # Examples
///
/// ```rust, no_run
/// use futures::StreamExt as _;
/// use serde_json::json;
/// use ws_pubsub::Client;
/// use ws_pubsub::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new("wss://example.com/socket", Config::default())?;
///
///     let stream = client.subscribe_stream("prices", Some(json!({ "symbol": "btcusdt" })))?;
///     let mut stream = Box::pin(stream);
///
///     while let Some(envelope) = stream.next().await {
///         println!("{:?}", envelope?.data);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Configuration the connection was started with
    config: Config,
    /// Validated WebSocket endpoint
    endpoint: Url,
    /// Handle to the connection task
    connection: ConnectionManager,
}

impl Client {
    /// Create a client for `endpoint` and, unless `config.manual_open` is set,
    /// start connecting.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `endpoint` is not a `ws://` or `wss://` URL.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        Self::with_hooks(endpoint, config, Hooks::default())
    }

    /// Like [`Client::new`], with connection-level callbacks.
    pub fn with_hooks(endpoint: &str, config: Config, hooks: Hooks) -> Result<Self> {
        Self::with_connector(endpoint, config, hooks, WsConnector::default())
    }

    /// Like [`Client::with_hooks`], opening transports through `connector`.
    pub fn with_connector<C: Connector>(
        endpoint: &str,
        config: Config,
        hooks: Hooks,
        connector: C,
    ) -> Result<Self> {
        let endpoint = parse_endpoint(endpoint)?;
        let connection = ConnectionManager::new(endpoint.clone(), config.clone(), hooks, connector);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                endpoint,
                connection,
            }),
        })
    }

    /// Open the connection. Does nothing if it is already open or opening.
    ///
    /// Resets the reconnect counter, so this also recovers a client in the
    /// [`ConnectionState::Failed`] state.
    pub fn connect(&self) -> Result<()> {
        self.inner.connection.connect()
    }

    /// Serialize `payload` as JSON and send it, now if open, otherwise once the
    /// connection opens.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` cannot be serialized.
    pub fn send<T: Serialize>(&self, payload: &T) -> Result<()> {
        let frame = serde_json::to_string(payload)?;
        self.inner.connection.send_text(frame)
    }

    /// Send `text` verbatim, now if open, otherwise once the connection opens.
    pub fn send_text<S: Into<String>>(&self, text: S) -> Result<()> {
        self.inner.connection.send_text(text.into())
    }

    /// Send a subscription frame for the request's channel and register its
    /// handlers, replacing any handlers already registered for that channel.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the channel name is empty.
    pub fn subscribe(&self, request: SubscribeRequest) -> Result<()> {
        let SubscribeRequest {
            name,
            data,
            subscription,
        } = request;

        if name.is_empty() {
            return Err(Error::validation("channel name cannot be empty"));
        }

        let frame = self.inner.config.envelope.encode(&name, data.as_ref())?;
        self.inner.connection.subscribe(name, frame, subscription)
    }

    /// Subscribe to `name` and receive its envelopes as a stream.
    ///
    /// `error` envelopes are yielded as [`WsError::SubscriptionFailed`]. The
    /// stream ends when the channel is unsubscribed, re-subscribed, or the
    /// connection task stops.
    pub fn subscribe_stream(
        &self,
        name: &str,
        data: Option<Value>,
    ) -> Result<impl Stream<Item = Result<Envelope>> + use<>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<std::result::Result<Envelope, WsError>>();
        let error_tx = tx.clone();

        let subscription = Subscription::new(move |envelope| {
            // A dropped stream just stops listening.
            _ = tx.send(Ok(envelope.clone()));
            Ok(())
        })
        .with_on_error(move |envelope| {
            let reason = envelope
                .data
                .as_ref()
                .unwrap_or(&envelope.raw)
                .to_string();
            _ = error_tx.send(Err(WsError::SubscriptionFailed(reason)));
            Ok(())
        });

        let mut request = SubscribeRequest::with_subscription(name, subscription);
        if let Some(data) = data {
            request = request.data(data);
        }
        self.subscribe(request)?;

        Ok(try_stream! {
            while let Some(item) = rx.recv().await {
                yield item?;
            }
        })
    }

    /// Remove the local handlers for `name`. Nothing is sent to the server.
    ///
    /// Returns `true` if a subscription was removed.
    pub fn unsubscribe(&self, name: &str) -> bool {
        self.inner.connection.registry().unregister(name)
    }

    /// Close the connection. No reconnect follows until [`Client::connect`].
    ///
    /// Frames sent while closed are kept and go out after the next open.
    pub fn close(&self, code: u16, reason: Option<&str>) -> Result<()> {
        self.inner
            .connection
            .close(CloseInfo::new(code, reason.unwrap_or_default()))
    }

    /// Close the connection with code 1000.
    pub fn close_normal(&self) -> Result<()> {
        self.inner.connection.close(CloseInfo::normal())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    /// Receive message-level diagnostics reported from now on.
    #[must_use]
    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.inner.connection.registry().diagnostics()
    }

    /// Get the number of registered channels, including the heartbeat channel
    /// once the first heartbeat has gone out.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.connection.registry().len()
    }

    #[must_use]
    pub fn is_subscribed(&self, name: &str) -> bool {
        self.inner.connection.registry().contains(name)
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(Error::validation(format!(
            "unsupported scheme {scheme}, expected ws or wss"
        ))),
    }
}
