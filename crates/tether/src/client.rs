//! Controller side of a session.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value as Json;
use std::time::Duration;
use tether_protocol::{CommandEnvelope, Reply};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("frame is not JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
}

pub struct Client {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (stream, _response) = connect_async(url).await?;
        log::debug!("connected to {url}");
        Ok(Self { stream })
    }

    pub async fn send(&mut self, envelope: &CommandEnvelope) -> Result<(), ClientError> {
        self.send_json(&envelope.to_json()).await
    }

    pub async fn send_json(&mut self, message: &Json) -> Result<(), ClientError> {
        self.send_text(message.to_string()).await
    }

    /// Send a text frame as is, JSON or not.
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), ClientError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn send_binary(&mut self, bytes: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        self.stream.send(Message::Binary(bytes.into())).await?;
        Ok(())
    }

    /// Next JSON frame, replies and pushes alike.
    pub async fn recv(&mut self) -> Result<Json, ClientError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Binary(bytes))) => return Ok(serde_json::from_slice(&bytes)?),
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    /// Send `envelope` and wait up to `wait` for the reply that echoes it.
    /// Frames that are not that reply are skipped. `Ok(None)` means nothing
    /// came back in time, which is what a dropped envelope looks like.
    pub async fn request(&mut self, envelope: &Json, wait: Duration) -> Result<Option<Reply>, ClientError> {
        self.send_json(envelope).await?;
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.recv()).await {
                Ok(frame) => frame?,
                Err(_elapsed) => return Ok(None),
            };
            match Reply::from_json(&frame) {
                Some(reply) if reply.evt() == envelope => return Ok(Some(reply)),
                _ => log::debug!("skipping frame while waiting for a reply: {frame}"),
            }
        }
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}
