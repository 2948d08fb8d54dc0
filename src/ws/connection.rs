#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::future;
use std::sync::Arc;
use std::time::Instant;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use tokio::sync::{mpsc, watch};
use url::Url;

use super::config::{Config, TimeoutPolicy};
use super::error::WsError;
use super::hooks::Hooks;
use super::timers::{Deadline, Heartbeat, Watchdog};
use super::traits::{CloseInfo, Connector, Transport, TransportEvent};
use crate::Result;
use crate::queue::PendingQueue;
use crate::subscription::{Subscription, SubscriptionRegistry};

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, and not trying to
    Closed,
    /// A transport is being opened, or a reconnect is scheduled
    Connecting {
        /// Consecutive reconnect attempts so far; 0 for a user-initiated connect
        attempt: u32,
    },
    /// Successfully connected
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// Reconnect attempts were exhausted
    Failed,
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }

    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting { .. })
    }
}

/// Requests from the public handle to the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Send(String),
    Close(CloseInfo),
}

/// Manages the connection lifecycle, reconnection, heartbeat and dispatch.
///
/// All connection state lives in a background task that handles one event at
/// a time: a request from this handle, a transport signal, or a timer. The
/// handle only posts requests and observes state, so none of its methods
/// block.
///
/// The task runs until every clone of the handle is dropped, then closes the
/// transport with code 1000.
#[derive(Clone)]
pub struct ConnectionManager {
    /// Sender for requests to the connection task
    command_tx: mpsc::UnboundedSender<Command>,
    /// Watch channel receiver for state changes
    state_rx: watch::Receiver<ConnectionState>,
    /// Channel registry shared with the connection task
    registry: Arc<SubscriptionRegistry>,
}

impl ConnectionManager {
    /// Create a connection manager and start its task.
    ///
    /// Connects immediately unless `config.manual_open` is set. Must be
    /// called from within a tokio runtime.
    pub fn new<C: Connector>(endpoint: Url, config: Config, hooks: Hooks, connector: C) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let registry = Arc::new(SubscriptionRegistry::new());

        let task = ConnectionTask {
            endpoint,
            heartbeat: Heartbeat::new(config.heartbeat_interval),
            watchdog: Watchdog::new(config.timeout),
            backoff: config.reconnect.clone().into(),
            config,
            connector,
            hooks,
            registry: Arc::clone(&registry),
            commands: command_rx,
            state: ConnectionState::Closed,
            state_tx,
            transport: None,
            queue: PendingQueue::new(),
            reconnect_delay: Deadline::default(),
            attempts: 0,
        };

        tokio::spawn(task.run());

        Self {
            command_tx,
            state_rx,
            registry,
        }
    }

    /// Open the connection if it is not already open or opening.
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Send a text frame now if open, otherwise once the connection opens.
    pub fn send_text(&self, frame: String) -> Result<()> {
        self.command(Command::Send(frame))
    }

    /// Register `subscription` for `channel`, then send its subscription frame.
    ///
    /// The handlers are in place when this returns, so an `unregister` issued
    /// right after is not undone.
    pub fn subscribe(&self, channel: String, frame: String, subscription: Subscription) -> Result<()> {
        self.registry.register(channel, subscription);
        self.command(Command::Send(frame))
    }

    /// Close the connection. No reconnect follows; queued frames are kept.
    pub fn close(&self, info: CloseInfo) -> Result<()> {
        self.command(Command::Close(info))
    }

    fn command(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }
}

/// State owned by the background task.
struct ConnectionTask<C> {
    endpoint: Url,
    config: Config,
    connector: C,
    hooks: Hooks,
    registry: Arc<SubscriptionRegistry>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    /// The only live transport; replacing it drops the previous one
    transport: Option<Transport>,
    /// Frames issued while not open
    queue: PendingQueue<String>,
    heartbeat: Heartbeat,
    watchdog: Watchdog,
    reconnect_delay: Deadline,
    /// Consecutive reconnect attempts since the last inbound message
    attempts: u32,
    backoff: ExponentialBackoff,
}

impl<C: Connector> ConnectionTask<C> {
    async fn run(mut self) {
        if !self.config.manual_open {
            self.connect();
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every handle is gone
                    None => break,
                },
                event = next_event(self.transport.as_mut()) => self.handle_event(event),
                () = self.heartbeat.tick() => self.beat(),
                () = self.watchdog.expired() => self.timed_out(),
                () = self.reconnect_delay.elapsed() => self.open_transport(),
            }
        }

        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Send(frame) => self.send_or_enqueue(frame),
            Command::Close(info) => self.close(info),
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.opened(),
            TransportEvent::Message(text) => self.received(&text),
            TransportEvent::Error(e) => self.failed(WsError::Connection(e)),
            TransportEvent::Close(info) => self.closed_by_peer(&info),
        }
    }

    /// User-initiated connect. Starts a fresh retry budget.
    fn connect(&mut self) {
        if self.state.is_open() || self.state.is_connecting() {
            #[cfg(feature = "tracing")]
            tracing::debug!(state = ?self.state, "connect ignored, already open or opening");
            return;
        }

        self.attempts = 0;
        self.backoff.reset();
        self.open_transport();
    }

    fn open_transport(&mut self) {
        self.reconnect_delay.clear();
        // Drop the previous transport before its replacement exists.
        self.transport = None;

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, attempt = self.attempts, "opening transport");

        self.transport = Some(self.connector.connect(&self.endpoint));
        self.set_state(ConnectionState::Connecting {
            attempt: self.attempts,
        });
    }

    fn opened(&mut self) {
        self.set_state(ConnectionState::Open {
            since: Instant::now(),
        });
        self.hooks.opened();

        if !self.heartbeat.start() {
            #[cfg(feature = "tracing")]
            tracing::debug!("heartbeat already running");
        }

        self.flush();
    }

    fn received(&mut self, text: &str) {
        self.attempts = 0;
        self.backoff.reset();
        self.watchdog.cancel();

        match self.config.envelope.decode(text) {
            Ok(envelope) => {
                self.hooks.message(&envelope.raw, text);
                let _outcome = self.registry.dispatch(&envelope);

                #[cfg(feature = "tracing")]
                tracing::trace!(outcome = ?_outcome, "dispatched inbound envelope");
            }
            Err(e) => self.report(&e),
        }

        self.flush();
    }

    fn failed(&mut self, error: WsError) {
        self.drop_transport();
        self.reconnect();
        self.report(&error);
    }

    fn closed_by_peer(&mut self, info: &CloseInfo) {
        #[cfg(feature = "tracing")]
        tracing::debug!(code = info.code, reason = %info.reason, "connection closed by peer");

        self.drop_transport();
        self.set_state(ConnectionState::Closed);
        self.hooks.closed(info);
    }

    /// Schedule another attempt, or give up once the ceiling is reached.
    fn reconnect(&mut self) {
        let max = self.config.reconnect.max_attempts;
        if self.attempts >= max {
            self.set_state(ConnectionState::Failed);
            self.report(&WsError::MaxRetriesExceeded { max });
            return;
        }

        self.attempts = self.attempts.saturating_add(1);
        let delay = self
            .backoff
            .next_backoff()
            .unwrap_or(self.config.reconnect.max_backoff);

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt = self.attempts, ?delay, "scheduling reconnect");

        self.set_state(ConnectionState::Connecting {
            attempt: self.attempts,
        });
        self.reconnect_delay.set(delay);
    }

    /// Explicit close. `on_close` runs unless the connection was already closed.
    fn close(&mut self, info: CloseInfo) {
        let was_closed = self.state == ConnectionState::Closed;

        self.reconnect_delay.clear();
        self.heartbeat.stop();
        self.watchdog.cancel();
        if let Some(transport) = self.transport.take() {
            transport.close(info.clone());
        }
        self.set_state(ConnectionState::Closed);

        if was_closed {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(code = info.code, reason = %info.reason, "closing connection");

        self.hooks.closed(&info);
    }

    fn beat(&mut self) {
        let channel = self.config.heartbeat_channel.clone();
        match self.config.envelope.encode(&channel, None) {
            Ok(frame) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(%channel, "heartbeat");

                self.send_or_enqueue(frame);
                self.registry.register(channel, Subscription::noop());
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "unable to encode heartbeat");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    fn timed_out(&mut self) {
        self.report(&WsError::SendTimeout {
            after: self.watchdog.timeout(),
        });

        if self.config.timeout_policy == TimeoutPolicy::Reconnect && self.transport.is_some() {
            self.drop_transport();
            self.reconnect();
        }
    }

    fn send_or_enqueue(&mut self, frame: String) {
        let frame = match self.transport.as_ref() {
            Some(transport) if self.state.is_open() => {
                match transmit(transport, &mut self.watchdog, frame) {
                    Ok(()) => return,
                    Err(frame) => frame,
                }
            }
            _ => frame,
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(pending = self.queue.len() + 1, "connection not open, queueing frame");

        self.queue.enqueue(frame);
    }

    fn flush(&mut self) {
        if !self.state.is_open() || self.queue.is_empty() {
            return;
        }
        let Some(transport) = self.transport.as_ref() else {
            return;
        };

        let watchdog = &mut self.watchdog;
        let _sent = self
            .queue
            .flush(|_, frame| transmit(transport, watchdog, frame));

        #[cfg(feature = "tracing")]
        tracing::debug!(sent = _sent, remaining = self.queue.len(), "flushed pending frames");
    }

    fn drop_transport(&mut self) {
        self.transport = None;
        self.heartbeat.stop();
        self.watchdog.cancel();
    }

    fn shutdown(&mut self) {
        self.reconnect_delay.clear();
        self.heartbeat.stop();
        if let Some(transport) = self.transport.take() {
            transport.close(CloseInfo::normal());
        }
        self.set_state(ConnectionState::Closed);

        #[cfg(feature = "tracing")]
        tracing::debug!(pending = self.queue.len(), "connection task stopped");
    }

    fn report(&self, error: &WsError) {
        #[cfg(feature = "tracing")]
        if error.is_fatal() {
            tracing::error!(%error, "connection failed");
        } else {
            tracing::warn!(%error, "connection error");
        }

        self.hooks.error(error);
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

fn transmit(
    transport: &Transport,
    watchdog: &mut Watchdog,
    frame: String,
) -> std::result::Result<(), String> {
    transport.send(frame)?;
    watchdog.arm();
    Ok(())
}

async fn next_event(transport: Option<&mut Transport>) -> TransportEvent {
    match transport {
        Some(transport) => transport.next_event().await,
        None => future::pending().await,
    }
}
