//! In-process WebSocket server for exercising the client and manager.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use worldbest_protocol::envelope::WebSocketMessage;

/// What the server saw on one upgrade request.
#[derive(Debug, Clone)]
pub(crate) struct Handshake {
    pub(crate) authorization: Option<String>,
}

pub(crate) enum Upgrade {
    Accept,
    Reject(u16),
}

type Decide = Arc<dyn Fn(&Handshake) -> Upgrade + Send + Sync>;

pub(crate) struct TestServer {
    pub(crate) url: String,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
    conns_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerConn>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub(crate) async fn start<F>(decide: F) -> Self
    where
        F: Fn(&Handshake) -> Upgrade + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handshakes = Arc::new(Mutex::new(Vec::new()));
        let (conns_tx, conns_rx) = mpsc::unbounded_channel();
        let decide: Decide = Arc::new(decide);

        let seen = handshakes.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let decide = decide.clone();
                let seen = seen.clone();
                let conns_tx = conns_tx.clone();
                tokio::spawn(async move {
                    if let Some(conn) = upgrade(stream, decide, seen).await {
                        let _ = conns_tx.send(conn);
                    }
                });
            }
        });

        Self {
            url: format!("ws://127.0.0.1:{port}/ws"),
            handshakes,
            conns_rx: tokio::sync::Mutex::new(conns_rx),
            handle,
        }
    }

    /// Every upgrade request received so far, accepted or not.
    pub(crate) fn handshakes(&self) -> Vec<Handshake> {
        self.handshakes.lock().unwrap().clone()
    }

    /// Waits for the next accepted connection.
    pub(crate) async fn next_connection(&self) -> ServerConn {
        let mut rx = self.conns_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("no connection within timeout")
            .expect("server stopped")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn upgrade(
    stream: TcpStream,
    decide: Decide,
    seen: Arc<Mutex<Vec<Handshake>>>,
) -> Option<ServerConn> {
    let captured: Arc<Mutex<Option<Handshake>>> = Arc::new(Mutex::new(None));
    let slot = captured.clone();

    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let handshake = Handshake {
            authorization: req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        };
        let verdict = decide(&handshake);
        seen.lock().unwrap().push(handshake.clone());
        *slot.lock().unwrap() = Some(handshake);
        match verdict {
            Upgrade::Accept => Ok(resp),
            Upgrade::Reject(status) => Err(tungstenite::http::Response::builder()
                .status(status)
                .body(Some("rejected".to_string()))
                .unwrap()),
        }
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.ok()?;
    let handshake = captured.lock().unwrap().take()?;
    Some(ServerConn {
        authorization: handshake.authorization,
        ws,
    })
}

/// Server side of one accepted connection.
pub(crate) struct ServerConn {
    pub(crate) authorization: Option<String>,
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    /// Next envelope sent by the client, skipping control frames.
    pub(crate) async fn recv(&mut self) -> Option<WebSocketMessage> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(30), self.ws.next())
                .await
                .ok()??
                .ok()?;
            match frame {
                tungstenite::Message::Text(text) => return serde_json::from_str(&text).ok(),
                tungstenite::Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    pub(crate) async fn send(&mut self, msg: &WebSocketMessage) {
        let json = serde_json::to_string(msg).unwrap();
        self.ws
            .send(tungstenite::Message::Text(json.into()))
            .await
            .unwrap();
    }

    /// Sends a close frame with the given code.
    pub(crate) async fn close(mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = self.ws.close(Some(frame)).await;
    }

    /// Drops the TCP connection without a close handshake.
    pub(crate) fn abort(self) {
        drop(self.ws);
    }

    /// Waits until the client closes or the stream ends.
    pub(crate) async fn closed_by_client(mut self) -> bool {
        loop {
            match tokio::time::timeout(Duration::from_secs(30), self.ws.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(tungstenite::Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }
}
