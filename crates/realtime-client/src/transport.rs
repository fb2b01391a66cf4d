//! Transport abstraction and the WebSocket implementation behind it.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use url::Url;

use crate::Error;

/// A single duplex text channel.
///
/// Only the connection manager holds a transport; nothing else reads from or
/// writes to it.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), Error>;

    /// Next inbound text frame. `None` means the peer closed the channel; an
    /// error means the channel is broken. Must be cancel-safe.
    async fn recv(&mut self) -> Option<Result<String, Error>>;

    /// Close the channel gracefully.
    async fn close(&mut self) -> Result<(), Error>;
}

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn Transport>, Error>;
}

// ---------------------------------------------------------------------------
// WebSocket (tokio-tungstenite)
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

type WsRead = futures_util::stream::SplitStream<WsStream>;
type WsWrite = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;

/// Default connector: plain or TLS WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn Transport>, Error> {
        let (ws, resp) = tokio_tungstenite::connect_async(endpoint.as_str()).await?;
        tracing::debug!(status = %resp.status(), "WebSocket handshake complete");
        let (write, read) = ws.split();
        Ok(Box::new(WebSocketTransport { write, read }))
    }
}

struct WebSocketTransport {
    write: WsWrite,
    read: WsRead,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<(), Error> {
        self.write
            .send(tungstenite::Message::Text(text.into()))
            .await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, Error>> {
        loop {
            match self.read.next().await? {
                Ok(tungstenite::Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(tungstenite::Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => {
                        tracing::warn!("Dropping non-UTF-8 binary frame: {e}");
                    }
                },
                Ok(tungstenite::Message::Close(frame)) => {
                    tracing::info!(?frame, "Server sent close frame");
                    return None;
                }
                Ok(_) => {
                    // Ping/pong are answered by tungstenite itself
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.write.close().await?;
        Ok(())
    }
}
