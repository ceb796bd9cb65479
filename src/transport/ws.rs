//! Default WebSocket adapter
//!
//! Opens connections through tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};

use super::{WsConnection, WsFrame, WsTransport};
use crate::error::ActionError;

/// WebSocket transport backed by tokio-tungstenite
#[derive(Clone, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WsTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn WsConnection>, ActionError> {
        info!("Connecting to WebSocket at {}", url);

        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ActionError::Ws(format!("connect to {url} failed: {e}")))?;

        Ok(Box::new(TungsteniteConnection { stream }))
    }
}

struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl WsConnection for TungsteniteConnection {
    async fn send(&mut self, frame: WsFrame) -> Result<(), ActionError> {
        let message = match frame {
            WsFrame::Text(text) => Message::Text(text),
            WsFrame::Binary(bytes) => Message::Binary(bytes),
        };

        self.stream
            .send(message)
            .await
            .map_err(|e| ActionError::Ws(format!("send failed: {e}")))
    }

    async fn recv(&mut self) -> Result<WsFrame, ActionError> {
        // Control frames are answered by tungstenite; skip to the next data frame.
        loop {
            let message = self
                .stream
                .next()
                .await
                .ok_or_else(|| ActionError::Ws("connection closed".to_string()))?
                .map_err(|e| ActionError::Ws(format!("receive failed: {e}")))?;

            match message {
                Message::Text(text) => return Ok(WsFrame::Text(text)),
                Message::Binary(bytes) => return Ok(WsFrame::Binary(bytes)),
                Message::Close(_) => {
                    return Err(ActionError::Ws("connection closed".to_string()))
                }
                other => debug!("Ignoring WebSocket control frame: {:?}", other),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
