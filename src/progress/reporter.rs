//! Progress reporter embedded in the worker build.
//!
//! Active only in [`WorkerContext::Worker`]; a standalone build never opens
//! a socket. When active it reads the sentinel file, opens one connection,
//! sends the running completed-unit count after every unit and closes the
//! connection when the build ends. Reporting is best-effort: every
//! connection or send failure is logged at debug level and swallowed.

use futures_util::SinkExt;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest, http::HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::protocol::{SUBPROTOCOL, Sentinel, WireMessage, WorkerContext};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Longest wait for the endpoint before the build runs unreported.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

struct ActiveReporter {
    node_id: String,
    socket: Option<Socket>,
}

pub struct ProgressReporter {
    active: Option<ActiveReporter>,
    completed: u64,
}

impl ProgressReporter {
    /// A reporter that only counts.
    pub fn disabled() -> Self {
        Self {
            active: None,
            completed: 0,
        }
    }

    /// Start reporting for a build rooted at `root`.
    pub async fn start(context: WorkerContext, root: &Path) -> Self {
        Self::start_with_timeout(context, root, CONNECT_TIMEOUT).await
    }

    async fn start_with_timeout(context: WorkerContext, root: &Path, limit: Duration) -> Self {
        if !context.is_worker() {
            return Self::disabled();
        }
        let sentinel = match Sentinel::read(root) {
            Ok(sentinel) => sentinel,
            Err(e) => {
                tracing::debug!(error = %e, "no usable sentinel; progress reporting disabled");
                return Self::disabled();
            }
        };
        let socket = match tokio::time::timeout(limit, connect(&sentinel)).await {
            Ok(Ok(socket)) => Some(socket),
            Ok(Err(e)) => {
                tracing::debug!(url = %sentinel.url(), error = %e, "progress endpoint unreachable");
                None
            }
            Err(_) => {
                tracing::debug!(url = %sentinel.url(), "progress endpoint connect timed out");
                None
            }
        };
        Self {
            active: Some(ActiveReporter {
                node_id: sentinel.node_id,
                socket,
            }),
            completed: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.socket.is_some())
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Count one finished unit and report the new total.
    pub async fn unit_completed(&mut self) {
        self.completed += 1;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(socket) = active.socket.as_mut() else {
            return;
        };
        let frame = WireMessage::module_complete(&active.node_id, self.completed);
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(error = %e, "failed to encode progress frame");
                return;
            }
        };
        if let Err(e) = socket.send(Message::text(text)).await {
            tracing::debug!(error = %e, "progress send failed; reporting stopped");
            active.socket = None;
        }
    }

    /// Close the connection, if any.
    pub async fn finish(mut self) {
        if let Some(mut socket) = self.active.take().and_then(|a| a.socket) {
            let _ = socket.close(None).await;
        }
    }
}

async fn connect(sentinel: &Sentinel) -> Result<Socket, tokio_tungstenite::tungstenite::Error> {
    let mut request = sentinel.url().into_client_request()?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
    let (socket, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(socket)
}
