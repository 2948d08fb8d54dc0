//! [`Connector`] over `tokio-tungstenite`.

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::traits::{CloseInfo, Connector, Transport, TransportCommand, TransportEvent, TransportPeer};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections, each driven by its own task.
///
/// Must be used from within a tokio runtime.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &Url) -> Transport {
        let (transport, peer) = Transport::channel();
        let endpoint = url.as_str().to_owned();

        tokio::spawn(async move {
            Self::run(endpoint, peer).await;
        });

        transport
    }
}

impl WsConnector {
    async fn run(endpoint: String, peer: TransportPeer) {
        #[cfg(feature = "tracing")]
        tracing::debug!(%endpoint, "opening WebSocket");

        match connect_async(endpoint.as_str()).await {
            Ok((ws_stream, _)) => {
                if peer.events.send(TransportEvent::Open).is_ok() {
                    Self::pump(ws_stream, peer).await;
                }
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%endpoint, error = %e, "Unable to connect");
                _ = peer.events.send(TransportEvent::Error(e));
            }
        }
    }

    /// Shuttle frames until either side closes.
    async fn pump(ws_stream: WsStream, mut peer: TransportPeer) {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    let event = match msg {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(text = %text.as_str(), "Received WebSocket text message");
                            TransportEvent::Message(text.as_str().to_owned())
                        }
                        Some(Ok(Message::Close(frame))) => TransportEvent::Close(
                            frame.map_or_else(CloseInfo::abnormal, |frame| {
                                CloseInfo::new(u16::from(frame.code), frame.reason.as_str())
                            }),
                        ),
                        Some(Err(e)) => TransportEvent::Error(e),
                        None => TransportEvent::Close(CloseInfo::abnormal()),
                        Some(Ok(_)) => {
                            // Binary frames are not part of the protocol; PING/PONG
                            // is answered by tungstenite.
                            continue;
                        }
                    };

                    let terminal = matches!(event, TransportEvent::Close(_) | TransportEvent::Error(_));
                    if peer.events.send(event).is_err() || terminal {
                        break;
                    }
                }

                command = peer.commands.recv() => match command {
                    Some(TransportCommand::Send(text)) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%text, "Sending WebSocket text message");
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            _ = peer.events.send(TransportEvent::Error(e));
                            break;
                        }
                    }
                    Some(TransportCommand::Close(info)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(info.code),
                            reason: info.reason.into(),
                        };
                        _ = write.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    None => {
                        // The manager dropped this transport.
                        _ = write.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
    }
}
