//! WebSocket read pump: dispatches incoming messages.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use worldbest_protocol::constants::{WS_CLOSE_SESSION_TERMINATED, WS_MAX_MESSAGE_SIZE};
use worldbest_protocol::envelope::{MessageType, WebSocketMessage};

use crate::handlers::HandlerRegistry;
use crate::types::DisconnectReason;

/// Reads frames until the connection ends and reports why it ended.
///
/// Any inbound frame resets the read deadline. If nothing arrives within
/// `read_timeout` (pings are sent well inside it) the connection is
/// considered dead.
pub(crate) async fn read_pump<S>(
    mut read: S,
    handlers: Arc<HandlerRegistry>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    read_timeout: Duration,
    cancel: CancellationToken,
) -> DisconnectReason
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(read_timeout);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break DisconnectReason::Local,

            () = &mut deadline => {
                warn!("read deadline expired, connection dead");
                break DisconnectReason::Dropped("read timeout".into());
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + read_timeout);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                if let Some(reason) = handle_text_message(&text, &handlers) {
                                    break reason;
                                }
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(frame) => {
                                break classify_close(frame);
                            }
                            _ => {} // Binary: not part of the protocol.
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break DisconnectReason::Dropped(e.to_string());
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break DisconnectReason::Dropped("stream ended".into());
                    }
                }
            }
        }
    };

    // Stop the write and ping pumps with us.
    cancel.cancel();
    reason
}

/// Parses and dispatches one text frame. Returns a reason when the frame
/// ends the connection.
fn handle_text_message(text: &str, handlers: &HandlerRegistry) -> Option<DisconnectReason> {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return None;
    }

    let msg: WebSocketMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse message: {e}");
            return None;
        }
    };

    trace!(msg_type = %msg.msg_type, sequence = ?msg.sequence, "received message");
    handlers.dispatch(&msg);

    if msg.msg_type == MessageType::AuthFailure {
        warn!("server rejected credentials");
        return Some(DisconnectReason::AuthRejected);
    }
    None
}

/// Close codes that mean "try again", as opposed to the server ending the
/// session on purpose.
fn is_transient(code: CloseCode) -> bool {
    matches!(
        code,
        CloseCode::Away | CloseCode::Restart | CloseCode::Again | CloseCode::Abnormal
    )
}

fn classify_close(frame: Option<CloseFrame>) -> DisconnectReason {
    let Some(frame) = frame else {
        debug!("received close frame without status");
        return DisconnectReason::ServerClosed {
            code: None,
            reason: String::new(),
        };
    };

    let code = u16::from(frame.code);
    let reason = frame.reason.to_string();
    if is_transient(frame.code) {
        debug!(code, %reason, "server closed connection, will retry");
        return DisconnectReason::Dropped(format!("closed with code {code}"));
    }
    if code == WS_CLOSE_SESSION_TERMINATED {
        info!(%reason, "server terminated the session");
    } else {
        debug!(code, %reason, "server closed connection");
    }
    DisconnectReason::ServerClosed {
        code: Some(code),
        reason,
    }
}
