#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Connection-level error variants.
///
/// These describe the state of the connection itself and are reported through
/// the `on_error` hook. Problems that only concern a single inbound message are
/// reported as [`crate::subscription::Diagnostic`]s instead.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Inbound text could not be parsed as JSON
    MalformedEnvelope {
        /// The text frame as received
        raw: String,
        /// The underlying parse failure
        source: serde_json::Error,
    },
    /// Reconnect attempts reached the configured ceiling; the connection is failed
    MaxRetriesExceeded {
        /// The configured ceiling
        max: u32,
    },
    /// No inbound traffic arrived within the deadline after a send
    SendTimeout {
        /// The configured deadline
        after: Duration,
    },
    /// WebSocket connection was closed
    ConnectionClosed,
    /// The server answered a subscription with an `error` status
    SubscriptionFailed(String),
}

impl WsError {
    /// Whether this error leaves the connection in the terminal `Failed` state.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::MaxRetriesExceeded { .. })
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MalformedEnvelope { raw, source } => {
                write!(f, "Failed to parse inbound envelope {raw:?}: {source}")
            }
            Self::MaxRetriesExceeded { max } => {
                write!(f, "Maximum reconnect attempts of {max} exceeded")
            }
            Self::SendTimeout { after } => {
                write!(f, "No WebSocket message received within {after:?} of a send")
            }
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::SubscriptionFailed(reason) => write!(f, "Subscription failed: {reason}"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MalformedEnvelope { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Kind};

    #[test]
    fn only_retry_exhaustion_is_fatal() {
        assert!(WsError::MaxRetriesExceeded { max: 3 }.is_fatal(), "exhaustion is terminal");
        assert!(
            !WsError::SendTimeout {
                after: Duration::from_secs(1)
            }
            .is_fatal(),
            "timeouts are reported, not terminal"
        );
        assert!(!WsError::ConnectionClosed.is_fatal(), "close is not terminal");
    }

    #[test]
    fn malformed_envelope_keeps_parse_source() {
        let source = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error: Error = WsError::MalformedEnvelope {
            raw: "not json".to_owned(),
            source,
        }
        .into();

        assert_eq!(error.kind(), Kind::WebSocket);
        let ws = error.downcast_ref::<WsError>().unwrap();
        assert!(ws.source().is_some(), "parse error should be chained");
        assert!(ws.to_string().contains("not json"), "raw text in message");
    }
}
