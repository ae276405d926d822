//! WebSocket connector implementation using `tokio-tungstenite`.
//!
//! The socket is dialed with a plain `TcpStream` to the relay host, so no
//! system or environment proxy is ever consulted.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector as TlsConnector, MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Connector, TransportError, relaxed_client_config};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials relay endpoints over `ws://` or `wss://`.
#[derive(Clone)]
pub struct WebSocketConnector {
    tls: Arc<rustls::ClientConfig>,
}

impl WebSocketConnector {
    /// Creates a connector using the relaxed relay certificate policy.
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            tls: Arc::new(relaxed_client_config()?),
        })
    }

    /// Creates a connector with a caller-supplied TLS configuration.
    pub fn with_tls(tls: Arc<rustls::ClientConfig>) -> Self {
        Self { tls }
    }
}

impl Connector for WebSocketConnector {
    type Connection = WebSocketConnection;

    async fn connect(&self, url: &str) -> Result<Self::Connection, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async_tls_with_config(
            url,
            None,
            true,
            Some(TlsConnector::Rustls(Arc::clone(&self.tls))),
        )
        .await
        .map_err(|e| TransportError::ConnectFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let id = ConnectionId::next();
        tracing::debug!(%id, url, "relay socket open");

        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

/// A single WebSocket connection to a relay.
///
/// The socket is split so a reader task can wait on `recv` while the
/// writer keeps sending.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let msg = self.stream.lock().await.next().await;
            match msg {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
