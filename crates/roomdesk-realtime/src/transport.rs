//! Duplex transport seam and the WebSocket implementation.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use roomdesk_core::{Result, SyncError};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

/// One open duplex channel carrying text frames.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Next inbound text frame; `None` once the peer has closed.
    ///
    /// Must be cancel-safe: the connection loop polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the channel.
    async fn close(&mut self);
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel authenticated with `credential`.
    ///
    /// Credential rejection is reported as [`SyncError::Auth`].
    async fn connect(&self, credential: &str) -> Result<Box<dyn Transport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects over WebSocket with the credential as a bearer header.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Connector for the endpoint at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    #[tracing::instrument(skip_all, fields(url = %self.url))]
    async fn connect(&self, credential: &str) -> Result<Box<dyn Transport>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SyncError::Transport(format!("invalid url: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|e| SyncError::Auth(format!("credential is not a valid header: {e}")))?;
        let _ = request.headers_mut().insert(header::AUTHORIZATION, bearer);

        let (stream, _) = connect_async(request).await.map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Http(resp)
                if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
            {
                SyncError::Auth(format!("upgrade rejected with {}", resp.status()))
            }
            other => SyncError::Transport(other.to_string()),
        })?;
        debug!("websocket open");
        Ok(Box::new(WebSocketTransport { stream }))
    }
}

struct WebSocketTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                // tungstenite answers pings itself
                Ok(_) => {}
                Err(e) => return Some(Err(SyncError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
