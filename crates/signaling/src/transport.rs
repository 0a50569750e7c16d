//! Bidirectional signaling channel.
//!
//! [`SignalingTransport`] is the socket seam; [`WsTransport`] implements
//! it over `tokio-tungstenite`. Frames that fail to parse are logged and
//! skipped rather than tearing down the channel.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::messages::{encode_message, parse_message, SignalMessage};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Errors from the signaling channel.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The relay task is gone or the socket was closed.
    #[error("Signaling channel closed")]
    Closed,
}

#[async_trait]
pub trait SignalingTransport: Send {
    async fn send(&mut self, message: &SignalMessage) -> Result<(), SignalingError>;

    /// Next envelope from the relay. `Ok(None)` means the remote closed
    /// the channel.
    async fn recv(&mut self) -> Result<Option<SignalMessage>, SignalingError>;

    /// Drop the current channel (if any) and open a new one.
    async fn reconnect(&mut self) -> Result<(), SignalingError>;

    async fn close(&mut self);
}

/// WebSocket implementation of [`SignalingTransport`].
pub struct WsTransport {
    url: String,
    stream: Option<WsStream>,
}

impl WsTransport {
    /// Connect to the relay at `url` (e.g. `wss://host/signaling`).
    pub async fn connect(url: impl Into<String>) -> Result<Self, SignalingError> {
        let url = url.into();
        let stream = Self::open(&url).await?;
        Ok(Self {
            url,
            stream: Some(stream),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn open(url: &str) -> Result<WsStream, SignalingError> {
        let (stream, _response) = connect_async(url).await.map_err(|e| {
            SignalingError::Connection(format!("Failed to connect to relay at {url}: {e}"))
        })?;
        tracing::info!(url = %url, "Connected to signaling relay");
        Ok(stream)
    }
}

#[async_trait]
impl SignalingTransport for WsTransport {
    async fn send(&mut self, message: &SignalMessage) -> Result<(), SignalingError> {
        let stream = self.stream.as_mut().ok_or(SignalingError::Closed)?;
        let json = encode_message(message).map_err(|e| SignalingError::Protocol(e.to_string()))?;
        tracing::debug!(kind = message.kind(), room_id = message.room_id(), "Sending signal");
        stream
            .send(Message::Text(json))
            .await
            .map_err(|e| SignalingError::Protocol(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<SignalMessage>, SignalingError> {
        let stream = self.stream.as_mut().ok_or(SignalingError::Closed)?;

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match parse_message(&text) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => {
                        tracing::warn!(error = %e, raw_message = %text, "Failed to parse signal");
                    }
                },
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Signaling relay closed the connection");
                    self.stream = None;
                    return Ok(None);
                }
                Ok(Message::Binary(_) | Message::Frame(_)) => {}
                Err(e) => {
                    self.stream = None;
                    return Err(SignalingError::Protocol(e.to_string()));
                }
            }
        }

        self.stream = None;
        Ok(None)
    }

    async fn reconnect(&mut self) -> Result<(), SignalingError> {
        self.close().await;
        self.stream = Some(Self::open(&self.url).await?);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                tracing::debug!(error = %e, "Error while closing signaling socket");
            }
        }
    }
}
