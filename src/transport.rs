//! Transport seam between the session and the speech backend.
//!
//! The session only ever sees the trait objects below, which keeps the
//! state machine testable against an in-memory transport. The production
//! implementation wraps a tokio-tungstenite WebSocket split into its sink
//! and stream halves.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::debug;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// An inbound transport message, reduced to what the session handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// The peer closed the connection.
    Closed,
}

#[async_trait]
pub trait TransportSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait TransportStream: Send {
    /// Next inbound message, `None` once the stream is exhausted.
    async fn next_message(&mut self) -> Option<Result<Incoming, TransportError>>;
}

/// Dials the backend and hands back the two halves of a fresh connection.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WebSocketSink {
    sink: SplitSink<WsStream, Message>,
}

struct WebSocketInbound {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        self.sink
            .send(Message::Binary(data.into()))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError(e.to_string()))
    }
}

#[async_trait]
impl TransportStream for WebSocketInbound {
    async fn next_message(&mut self) -> Option<Result<Incoming, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Incoming::Text(text.to_string()))),
                Ok(Message::Close(frame)) => {
                    debug!("websocket closed by peer: {:?}", frame);
                    return Some(Ok(Incoming::Closed));
                }
                // Pings are answered by tungstenite itself; binary frames
                // from the backend carry nothing we act on.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError(e.to_string()))),
            }
        }
    }
}

/// Production connector speaking WebSocket over TLS.
pub struct WebSocketConnector;

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        debug!("websocket connected: {}", url);

        let (sink, stream) = ws.split();
        Ok((
            Box::new(WebSocketSink { sink }),
            Box::new(WebSocketInbound { stream }),
        ))
    }
}
