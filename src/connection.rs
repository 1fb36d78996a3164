//! Connection wrapper (C3): one duplex WebSocket, read and write sides
//! split so a single owning task can read while any number of callers
//! write through a shared, serialized sink.
//!
//! Panels arrive over axum's `WebSocket`; SDKs are dialed as a
//! `tokio-tungstenite` client. Both are unified behind the same
//! `Connection`/`PeerReader` pair so the hub's dedup/broadcast logic is
//! written once.

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_protocol::Envelope;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::ConnectionError;

pub type SdkStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Writer {
    Panel(SplitSink<WebSocket, AxumMessage>),
    Sdk(SplitSink<SdkStream, TungsteniteMessage>),
}

enum Reader {
    Panel(SplitStream<WebSocket>),
    Sdk(SplitStream<SdkStream>),
}

/// The write half of one peer socket, serialized by an internal lock so
/// concurrent callers never interleave frame bytes (§4.2, invariant in
/// §3).
pub struct Connection {
    writer: Mutex<Option<Writer>>,
}

/// The read half of one peer socket. Owned by exactly one read loop;
/// reads are never shared.
pub struct PeerReader {
    reader: Reader,
}

impl Connection {
    pub fn from_panel(socket: WebSocket) -> (Self, PeerReader) {
        let (sink, stream) = socket.split();
        (
            Self {
                writer: Mutex::new(Some(Writer::Panel(sink))),
            },
            PeerReader {
                reader: Reader::Panel(stream),
            },
        )
    }

    pub fn from_sdk(stream: SdkStream) -> (Self, PeerReader) {
        let (sink, stream) = stream.split();
        (
            Self {
                writer: Mutex::new(Some(Writer::Sdk(sink))),
            },
            PeerReader {
                reader: Reader::Sdk(stream),
            },
        )
    }

    /// Serializes `value` to a JSON text frame and writes it. Concurrent
    /// callers queue on the internal lock rather than interleaving.
    pub async fn write_json(&self, value: &Envelope) -> Result<(), ConnectionError> {
        let text = serde_json::to_string(value)?;
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(ConnectionError::Closed);
        };
        let result = match writer {
            Writer::Panel(sink) => sink
                .send(AxumMessage::Text(text.into()))
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string())),
            Writer::Sdk(sink) => sink
                .send(TungsteniteMessage::Text(text.into()))
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string())),
        };
        result
    }

    /// Idempotent: closes the underlying sink on first call, a no-op on
    /// subsequent ones.
    pub async fn close(&self) {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.take() else {
            return;
        };
        match writer {
            Writer::Panel(mut sink) => {
                let _ = sink.close().await;
            }
            Writer::Sdk(mut sink) => {
                let _ = sink.close().await;
            }
        }
    }
}

impl PeerReader {
    /// Blocking read of one JSON text frame. Any non-text frame is
    /// skipped (matching axum/tungstenite ping/pong handling); a parse
    /// error, a close frame, or a transport error all tear the
    /// connection down (§4.2).
    pub async fn read_json(&mut self) -> Result<Envelope, ConnectionError> {
        loop {
            let text = match &mut self.reader {
                Reader::Panel(stream) => match stream.next().await {
                    Some(Ok(AxumMessage::Text(text))) => text.to_string(),
                    Some(Ok(AxumMessage::Ping(_) | AxumMessage::Pong(_))) => continue,
                    Some(Ok(AxumMessage::Close(_))) | None => {
                        return Err(ConnectionError::Closed)
                    }
                    Some(Ok(AxumMessage::Binary(_))) => continue,
                    Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
                },
                Reader::Sdk(stream) => match stream.next().await {
                    Some(Ok(TungsteniteMessage::Text(text))) => text.to_string(),
                    Some(Ok(
                        TungsteniteMessage::Ping(_)
                        | TungsteniteMessage::Pong(_)
                        | TungsteniteMessage::Frame(_),
                    )) => continue,
                    Some(Ok(TungsteniteMessage::Close(_))) | None => {
                        return Err(ConnectionError::Closed)
                    }
                    Some(Ok(TungsteniteMessage::Binary(_))) => continue,
                    Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
                },
            };
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdk_stream_type_alias_matches_tokio_tungstenite_client_shape() {
        fn assert_send<T: Send>() {}
        assert_send::<SdkStream>();
    }
}
