//! Aggregation endpoint for worker progress.
//!
//! The endpoint listens for the duration of one run and accepts one
//! persistent WebSocket per node. Every accepted `moduleComplete` frame is
//! forwarded to the orchestrator's event channel as a [`RunEvent::Progress`].
//! A closed connection changes nothing: a node's progress is whatever it
//! last reported.
//!
//! ## Lifecycle
//!
//! ```no_run
//! use fleetpack::progress::ProgressServer;
//!
//! # async fn example() -> Result<(), fleetpack::errors::RunError> {
//! let (tx, _rx) = tokio::sync::mpsc::channel(64);
//! let server = ProgressServer::start(
//!     "0.0.0.0:8411".parse().unwrap(),
//!     vec!["node-0-1a2b3c4d".to_string()],
//!     tx,
//! )
//! .await?;
//!
//! // Nodes connect to ws://<advertise-host>:8411/ ...
//!
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::protocol::{ProgressEvent, SUBPROTOCOL, WireMessage};
use crate::errors::RunError;
use crate::events::RunEvent;

/// How long a graceful stop may wait on half-open HTTP connections.
const SERVE_STOP_GRACE: Duration = Duration::from_secs(2);

/// Last accepted count per known node.
///
/// Counts are monotonically non-decreasing per node: a report lower than the
/// last accepted one is stale and ignored, as is any report for a node ID
/// that is not part of the run.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    counts: HashMap<String, u64>,
}

impl ProgressTracker {
    pub fn new<I>(node_ids: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            counts: node_ids.into_iter().map(|id| (id, 0)).collect(),
        }
    }

    /// Record a report; returns `true` if it was accepted.
    pub fn record(&mut self, event: &ProgressEvent) -> bool {
        match self.counts.get_mut(&event.node_id) {
            None => {
                tracing::warn!(node_id = %event.node_id, "progress from unknown node discarded");
                false
            }
            Some(last) if event.count < *last => {
                tracing::debug!(
                    node_id = %event.node_id,
                    count = event.count,
                    last = *last,
                    "stale progress discarded"
                );
                false
            }
            Some(last) => {
                *last = event.count;
                true
            }
        }
    }

    pub fn completed(&self, node_id: &str) -> Option<u64> {
        self.counts.get(node_id).copied()
    }
}

/// State shared by the endpoint's handlers.
struct EndpointState {
    tracker: Mutex<ProgressTracker>,
    events: mpsc::Sender<RunEvent>,
    /// Cancelled on teardown; every connection loop exits on it.
    shutdown: CancellationToken,
    /// The set of open connections, owned by this endpoint.
    connections: TaskTracker,
}

impl EndpointState {
    async fn accept(&self, text: &str) {
        let Some(event) = WireMessage::parse_progress(text) else {
            return;
        };
        let accepted = self.tracker.lock().await.record(&event);
        if accepted {
            // The UI may already be gone during teardown.
            let _ = self.events.send(event.into()).await;
        }
    }
}

/// Aggregation endpoint for one run.
pub struct ProgressServer {
    addr: SocketAddr,
    state: Arc<EndpointState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_task: Option<JoinHandle<()>>,
}

impl ProgressServer {
    /// Bind `bind` and start accepting reporter connections.
    ///
    /// Reports are accepted only for `node_ids`. Accepted reports are sent on `events`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Endpoint`] if the address cannot be bound.
    pub async fn start(
        bind: SocketAddr,
        node_ids: Vec<String>,
        events: mpsc::Sender<RunEvent>,
    ) -> Result<Self, RunError> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|source| RunError::Endpoint {
                addr: bind.to_string(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| RunError::Endpoint {
            addr: bind.to_string(),
            source,
        })?;

        let state = Arc::new(EndpointState {
            tracker: Mutex::new(ProgressTracker::new(node_ids)),
            events,
            shutdown: CancellationToken::new(),
            connections: TaskTracker::new(),
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = build_router(state.clone());

        let serve_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!(error = %e, "progress endpoint error");
            }
        });

        tracing::info!(%addr, "progress endpoint listening");
        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            serve_task: Some(serve_task),
        })
    }

    /// The bound address (the actual port when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Last accepted count for a node.
    pub async fn completed(&self, node_id: &str) -> Option<u64> {
        self.state.tracker.lock().await.completed(node_id)
    }

    /// Number of reporter connections currently open.
    pub fn connection_count(&self) -> usize {
        self.state.connections.len()
    }

    /// Close every open connection, stop listening and release the port.
    ///
    /// Connections that never completed an HTTP request would hold a
    /// graceful stop open forever, so the listener is aborted once
    /// `SERVE_STOP_GRACE` has passed.
    pub async fn shutdown(mut self) {
        self.state.shutdown.cancel();
        self.state.connections.close();
        self.state.connections.wait().await;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.serve_task.take() {
            if tokio::time::timeout(SERVE_STOP_GRACE, &mut task).await.is_err() {
                tracing::debug!(addr = %self.addr, "aborting progress endpoint with stalled connections");
                task.abort();
                let _ = task.await;
            }
        }
        tracing::info!(addr = %self.addr, "progress endpoint closed");
    }
}

impl Drop for ProgressServer {
    fn drop(&mut self) {
        self.state.shutdown.cancel();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn build_router(state: Arc<EndpointState>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<EndpointState>>,
) -> impl IntoResponse {
    ws.protocols([SUBPROTOCOL]).on_upgrade(move |socket| {
        let connections = state.connections.clone();
        connections.track_future(handle_socket(socket, state))
    })
}

/// Read frames until the reporter closes or the endpoint shuts down.
async fn handle_socket(mut socket: WebSocket, state: Arc<EndpointState>) {
    tracing::debug!("reporter connected");
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => state.accept(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "reporter connection error");
                    break;
                }
            }
        }
    }
    tracing::debug!("reporter disconnected");
}
