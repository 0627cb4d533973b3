//! WebSocket write pump: the only task that touches the sink.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Forwards queued frames to the socket.
///
/// On cancellation, frames already queued are flushed before a normal
/// close frame goes out, so an `emit` issued just before a logout still
/// reaches the server.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut frames: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let healthy = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break flush(&mut sink, &mut frames).await,
            next = frames.recv() => next,
        };
        let Some(frame) = next else { break true };
        if let Err(e) = sink.send(frame).await {
            error!("WebSocket write error: {e}");
            break false;
        }
    };

    if healthy {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client closing".into(),
        };
        if let Err(e) = sink.send(tungstenite::Message::Close(Some(frame))).await {
            debug!("close frame not sent: {e}");
        }
    }
}

/// Writes whatever is still queued. Returns `false` if the sink failed.
async fn flush<S>(sink: &mut S, frames: &mut mpsc::Receiver<tungstenite::Message>) -> bool
where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    while let Ok(frame) = frames.try_recv() {
        if matches!(frame, tungstenite::Message::Ping(_)) {
            continue;
        }
        if sink.send(frame).await.is_err() {
            return false;
        }
    }
    true
}
