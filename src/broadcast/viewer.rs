//! Websocket viewer transports

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as RelayMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};

use super::ViewerChannel;
use crate::errors::HarborError;

/// Dashboard connected to our websocket endpoint.
///
/// The server cannot dial a browser back, so `reconnect` probes whether the
/// socket is still usable and fails once the viewer has gone.
pub struct WsViewer {
    socket: WebSocket,
    closed: bool,
}

impl WsViewer {
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            closed: false,
        }
    }
}

#[async_trait]
impl ViewerChannel for WsViewer {
    async fn send(&mut self, frame: String) -> Result<(), HarborError> {
        self.socket
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| HarborError::Transport(e.to_string()))
    }

    async fn receive_failure(&mut self) -> HarborError {
        if self.closed {
            return std::future::pending().await;
        }

        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Close(_))) | None => {
                    self.closed = true;
                    return HarborError::Transport("viewer closed the connection".to_string());
                }
                Some(Err(e)) => {
                    self.closed = true;
                    return HarborError::Transport(e.to_string());
                }
                // Dashboards do not talk back, anything else is ignored
                Some(Ok(_)) => {}
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), HarborError> {
        if self.closed {
            return Err(HarborError::Transport("viewer is gone".to_string()));
        }
        self.socket
            .send(Message::Ping(Default::default()))
            .await
            .map_err(|e| HarborError::Transport(e.to_string()))
    }
}

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound connection to a dashboard relay
pub struct RelayViewer {
    url: String,
    stream: Option<RelayStream>,
}

impl RelayViewer {
    pub async fn connect(url: &str) -> Result<Self, HarborError> {
        let stream = dial(url).await?;
        Ok(Self {
            url: url.to_string(),
            stream: Some(stream),
        })
    }
}

async fn dial(url: &str) -> Result<RelayStream, HarborError> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| HarborError::Transport(format!("failed to connect to relay {url}: {e}")))?;
    info!("Connected to relay {}", url);
    Ok(stream)
}

#[async_trait]
impl ViewerChannel for RelayViewer {
    async fn send(&mut self, frame: String) -> Result<(), HarborError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| HarborError::Transport("relay not connected".to_string()))?;
        stream
            .send(RelayMessage::Text(frame.into()))
            .await
            .map_err(|e| HarborError::Transport(e.to_string()))
    }

    async fn receive_failure(&mut self) -> HarborError {
        let Some(stream) = self.stream.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            match stream.next().await {
                Some(Ok(RelayMessage::Close(_))) | None => {
                    return HarborError::Transport("relay closed the connection".to_string());
                }
                Some(Err(e)) => return HarborError::Transport(e.to_string()),
                Some(Ok(_)) => {}
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), HarborError> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!("Closing relay connection: {}", e);
            }
        }
        self.stream = Some(dial(&self.url).await?);
        Ok(())
    }
}
