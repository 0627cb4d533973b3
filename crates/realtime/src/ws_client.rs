//! WebSocket client for the realtime endpoint.
//!
//! Presents the access token on the upgrade request, then runs read,
//! write and ping pumps until the connection ends.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use worldbest_protocol::constants::{
    WS_CONNECT_TIMEOUT, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT,
};
use worldbest_protocol::envelope::WebSocketMessage;

use crate::handlers::HandlerRegistry;
use crate::types::DisconnectReason;

/// Outbound frames buffered before `send` starts failing.
const WRITE_QUEUE_SIZE: usize = 256;

/// Errors from the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server rejected credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("access token is not a valid header value")]
    InvalidToken,

    #[error("connect timed out")]
    Timeout,

    #[error("send queue full")]
    QueueFull,

    #[error("connection closed")]
    Closed,
}

impl WsError {
    /// Returns `true` if retrying with the same credential is pointless.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::InvalidToken)
    }
}

/// A live WebSocket connection.
///
/// Dropping the client stops its pumps and sends a close frame.
pub struct WsClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
}

impl WsClient {
    /// Opens a connection, authenticating with `token`.
    ///
    /// Inbound messages go to `handlers`. The returned receiver resolves
    /// once with the reason the connection ended.
    pub(crate) async fn connect(
        url: &str,
        token: &str,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<(Self, oneshot::Receiver<DisconnectReason>), WsError> {
        let mut request = url.into_client_request()?;
        let bearer =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| WsError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

        let connect = tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false);
        let (ws_stream, _) = match tokio::time::timeout(WS_CONNECT_TIMEOUT, connect).await {
            Err(_) => return Err(WsError::Timeout),
            Ok(Err(tungstenite::Error::Http(resp)))
                if matches!(resp.status().as_u16(), 401 | 403) =>
            {
                return Err(WsError::Unauthorized(resp.status().as_u16()));
            }
            Ok(result) => result?,
        };
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(WRITE_QUEUE_SIZE);
        let (closed_tx, closed_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel.clone()));

        {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let reason =
                    crate::pumps::read::read_pump(read, handlers, write_tx, WS_PONG_WAIT, cancel)
                        .await;
                let _ = closed_tx.send(reason);
            });
        }

        tokio::spawn(crate::pumps::ping::ping_pump(
            write_tx.clone(),
            WS_PING_PERIOD,
            cancel.clone(),
        ));

        Ok((Self { write_tx, cancel }, closed_rx))
    }

    /// Queues a message without waiting for the socket.
    pub fn send(&self, msg: &WebSocketMessage) -> Result<(), WsError> {
        let json = serde_json::to_string(msg)?;
        self.write_tx
            .try_send(tungstenite::Message::Text(json.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(msg_type = %msg.msg_type, "send queue full, dropping message");
                    WsError::QueueFull
                }
                mpsc::error::TrySendError::Closed(_) => WsError::Closed,
            })
    }

    /// Gracefully closes the connection.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
