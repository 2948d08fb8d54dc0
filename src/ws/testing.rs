//! In-memory [`Connector`] for driving the connection task in tests.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use url::Url;

use super::error::WsError;
use super::hooks::Hooks;
use super::traits::{CloseInfo, Connector, Transport, TransportCommand, TransportEvent, TransportPeer};

/// Hands every transport's peer end to the test.
#[derive(Clone)]
pub(crate) struct MockConnector {
    peers: mpsc::UnboundedSender<TransportPeer>,
}

impl MockConnector {
    pub(crate) fn new() -> (Self, Peers) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, Peers { rx })
    }
}

impl Connector for MockConnector {
    fn connect(&self, _url: &Url) -> Transport {
        let (transport, peer) = Transport::channel();
        _ = self.peers.send(peer);
        transport
    }
}

pub(crate) struct Peers {
    rx: mpsc::UnboundedReceiver<TransportPeer>,
}

impl Peers {
    /// Wait for the next connection attempt.
    pub(crate) async fn next(&mut self) -> MockPeer {
        let peer = timeout(Duration::from_secs(600), self.rx.recv())
            .await
            .expect("no connection attempt")
            .expect("connector dropped");
        MockPeer { peer }
    }

    /// Whether another attempt happens within `within`.
    pub(crate) async fn attempted_within(&mut self, within: Duration) -> bool {
        timeout(within, self.rx.recv()).await.is_ok_and(|peer| peer.is_some())
    }
}

pub(crate) struct MockPeer {
    peer: TransportPeer,
}

impl MockPeer {
    pub(crate) fn open(&self) {
        self.emit(TransportEvent::Open);
    }

    pub(crate) fn message(&self, text: &str) {
        self.emit(TransportEvent::Message(text.to_owned()));
    }

    pub(crate) fn fail(&self) {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        self.emit(TransportEvent::Error(io.into()));
    }

    pub(crate) fn close(&self, code: u16, reason: &str) {
        self.emit(TransportEvent::Close(CloseInfo::new(code, reason)));
    }

    fn emit(&self, event: TransportEvent) {
        self.peer.events.send(event).expect("manager dropped transport");
    }

    /// Everything the manager has asked of this transport so far.
    pub(crate) fn commands(&mut self) -> Vec<TransportCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.peer.commands.try_recv() {
            commands.push(command);
        }
        commands
    }

    /// Text frames sent so far.
    pub(crate) fn frames(&mut self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|command| match command {
                TransportCommand::Send(text) => Some(text),
                TransportCommand::Close(_) => None,
            })
            .collect()
    }

    /// Whether the manager has dropped this transport.
    pub(crate) fn is_dropped(&self) -> bool {
        self.peer.events.is_closed()
    }
}

/// Let the connection task process everything already posted to it.
pub(crate) async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

/// Hooks that record what they see.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub(crate) fn hooks(&self) -> Hooks {
        let open = self.clone();
        let message = self.clone();
        let error = self.clone();
        let close = self.clone();

        Hooks::new()
            .on_open(move || open.push("open".to_owned()))
            .on_message(move |_, raw| message.push(format!("message {raw}")))
            .on_error(move |e: &WsError| error.push(format!("error {}", kind(e))))
            .on_close(move |info| close.push(format!("close {} {}", info.code, info.reason)))
    }

    fn push(&self, event: String) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub(crate) fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

fn kind(error: &WsError) -> &'static str {
    match error {
        WsError::Connection(_) => "connection",
        WsError::MalformedEnvelope { .. } => "malformed",
        WsError::MaxRetriesExceeded { .. } => "max-retries",
        WsError::SendTimeout { .. } => "timeout",
        WsError::ConnectionClosed => "closed",
        WsError::SubscriptionFailed(_) => "subscription",
    }
}
