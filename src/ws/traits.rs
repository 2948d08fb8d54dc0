//! The seam between the connection manager and the underlying socket.
//!
//! A [`Connector`] opens one [`Transport`] per connection attempt. The
//! transport is a pair of channels: the manager pushes [`TransportCommand`]s
//! in and receives [`TransportEvent`]s out. The implementor owns the other
//! ends, the [`TransportPeer`].

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use url::Url;

const NORMAL_CLOSURE: u16 = 1000;
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code and reason of a closed connection.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    #[must_use]
    pub fn new<S: Into<String>>(code: u16, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Code 1000, no reason.
    #[must_use]
    pub fn normal() -> Self {
        Self::new(NORMAL_CLOSURE, String::new())
    }

    /// Code 1006: the connection went away without a close frame.
    #[must_use]
    pub fn abnormal() -> Self {
        Self::new(ABNORMAL_CLOSURE, String::new())
    }
}

/// Lifecycle signal emitted by a transport.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established and ready for sends
    Open,
    /// An inbound text frame
    Message(String),
    /// The connection failed; no further events follow
    Error(tungstenite::Error),
    /// The connection was closed; no further events follow
    Close(CloseInfo),
}

/// Operation requested of a transport.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Send(String),
    Close(CloseInfo),
}

/// The manager's handle on one live transport.
///
/// Dropping it drops the command sender, which tells the implementor to shut
/// the connection down.
#[derive(Debug)]
pub struct Transport {
    commands: mpsc::UnboundedSender<TransportCommand>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// The implementor's ends of a [`Transport`].
#[non_exhaustive]
#[derive(Debug)]
pub struct TransportPeer {
    /// Commands issued by the manager
    pub commands: mpsc::UnboundedReceiver<TransportCommand>,
    /// Signals reported to the manager
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl Transport {
    /// Create a transport together with the peer that drives it.
    #[must_use]
    pub fn channel() -> (Self, TransportPeer) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                commands: command_tx,
                events: event_rx,
            },
            TransportPeer {
                commands: command_rx,
                events: event_tx,
            },
        )
    }

    /// Hand a text frame to the transport, giving it back if the peer is gone.
    pub(crate) fn send(&self, text: String) -> Result<(), String> {
        self.commands
            .send(TransportCommand::Send(text))
            .map_err(|e| match e.0 {
                TransportCommand::Send(text) => text,
                TransportCommand::Close(_) => String::new(),
            })
    }

    pub(crate) fn close(self, info: CloseInfo) {
        // A peer that already went away needs no close.
        _ = self.commands.send(TransportCommand::Close(info));
    }

    /// Next signal. A peer that disappears without a word reads as an abnormal close.
    pub(crate) async fn next_event(&mut self) -> TransportEvent {
        self.events
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Close(CloseInfo::abnormal()))
    }
}

/// Opens transports.
///
/// Implementations must not block: the attempt runs in the background and its
/// outcome is reported through the transport's events, [`TransportEvent::Open`]
/// on success or [`TransportEvent::Error`] on failure.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &Url) -> Transport;
}
