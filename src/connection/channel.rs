//! Physical channel seam
//!
//! The state machine never touches a socket directly. A [`Connector`] opens a
//! channel and hands back a [`ChannelHandle`]: a pair of queues bridged to the
//! socket by a pump task. Dropping the handle closes the socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::endpoint::redact;
use crate::error::{Error, Result};
use crate::protocol::CLOSE_ABNORMAL;

/// Close code reported when the server sent a close frame without a status
const CLOSE_NO_STATUS: u16 = 1005;

/// Frames written by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Events read from the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Remote close or end of stream; always the last event
    Closed { code: u16, reason: String },
    /// Transport failure; always the last event
    Error(String),
}

/// Client side of an open channel
#[derive(Debug)]
pub struct ChannelHandle {
    pub outbound: mpsc::Sender<Outbound>,
    pub inbound: mpsc::Receiver<Inbound>,
}

/// Far side of a [`ChannelHandle`], held by whatever drives the socket
#[derive(Debug)]
pub struct ChannelPeer {
    pub outbound: mpsc::Receiver<Outbound>,
    pub inbound: mpsc::Sender<Inbound>,
}

impl ChannelHandle {
    /// Create a connected handle/peer pair
    pub fn pair(buffer: usize) -> (ChannelHandle, ChannelPeer) {
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (in_tx, in_rx) = mpsc::channel(buffer);
        (
            ChannelHandle {
                outbound: out_tx,
                inbound: in_rx,
            },
            ChannelPeer {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }
}

/// Opens physical channels
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<ChannelHandle>;
}

// ─────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────

/// Opens WebSocket channels with tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    buffer: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self { buffer: 256 }
    }
}

impl WsConnector {
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &Url) -> Result<ChannelHandle> {
        let shown = redact(url);
        debug!(url = %shown, "Opening WebSocket");

        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| handshake_error(&shown, e))?;

        info!(url = %shown, "WebSocket connection established");

        let (handle, peer) = ChannelHandle::pair(self.buffer);
        tokio::spawn(pump(ws_stream, peer));
        Ok(handle)
    }
}

fn handshake_error(url: &str, e: WsError) -> Error {
    match e {
        WsError::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                Error::AuthRejected {
                    message: format!("handshake rejected with {}", status),
                }
            } else {
                Error::connection_failed(url, format!("handshake returned {}", status))
            }
        }
        other => Error::connection_failed(url, other.to_string()),
    }
}

/// Bridge a WebSocket stream to a channel peer until either side goes away
async fn pump(ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>, mut peer: ChannelPeer) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                let event = match msg {
                    Some(Ok(WsMessage::Text(text))) => Inbound::Text(text),
                    Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => Inbound::Text(text),
                        Err(_) => {
                            warn!("Dropping non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = write.send(WsMessage::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((CLOSE_NO_STATUS, String::new()));
                        info!(code, reason = %reason, "Received close frame");
                        let _ = peer.inbound.send(Inbound::Closed { code, reason }).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        let _ = peer.inbound.send(Inbound::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = peer
                            .inbound
                            .send(Inbound::Closed {
                                code: CLOSE_ABNORMAL,
                                reason: "stream ended".to_string(),
                            })
                            .await;
                        break;
                    }
                };
                if peer.inbound.send(event).await.is_err() {
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                }
            }

            out = peer.outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(WsMessage::Text(text)).await {
                        warn!(error = %e, "Failed to write frame");
                        let _ = peer.inbound.send(Inbound::Error(e.to_string())).await;
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    debug!(code, "Closing WebSocket");
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = write.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    }

    let _ = write.close().await;
    debug!("WebSocket pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_connected() {
        let (mut handle, mut peer) = ChannelHandle::pair(4);

        handle.outbound.send(Outbound::Text("up".into())).await.unwrap();
        assert_eq!(peer.outbound.recv().await, Some(Outbound::Text("up".into())));

        peer.inbound.send(Inbound::Text("down".into())).await.unwrap();
        assert_eq!(handle.inbound.recv().await, Some(Inbound::Text("down".into())));
    }

    #[test]
    fn test_handshake_status_mapping() {
        let response = tokio_tungstenite::tungstenite::http::Response::builder()
            .status(401)
            .body(None)
            .unwrap();
        assert!(matches!(
            handshake_error("ws://h", WsError::Http(response)),
            Error::AuthRejected { .. }
        ));

        let response = tokio_tungstenite::tungstenite::http::Response::builder()
            .status(503)
            .body(None)
            .unwrap();
        assert!(matches!(
            handshake_error("ws://h", WsError::Http(response)),
            Error::ConnectionFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_fails() {
        let url = Url::parse("ws://127.0.0.1:1/ws").unwrap();
        let err = WsConnector::default().open(&url).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
    }
}
