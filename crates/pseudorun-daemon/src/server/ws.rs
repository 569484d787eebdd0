//! WebSocket connection handling.
//!
//! ```text
//! Client ──── "print 1\nread x" / {"type":"run",...} ──► SessionRelay::start
//!        ──── {"type":"input","value":"42"} ───────────► SessionRelay::submit_input
//!        ◄─── {"type":"output"|"input"|"exit",...} ───── RelayEvent
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use pseudorun_core::protocol::{ClientRequest, ServerMessage};

use crate::relay::{ERROR_MARKER, RelayEvent, SessionRelay};

use super::GatewayState;

/// Events buffered between the relay and a slow client.
const EVENT_BUFFER: usize = 256;
/// How long queued events may take to flush after the client stops sending.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks active WebSocket connections.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    count: AtomicU64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Count a connection until the returned guard is dropped.
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.count.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            tracker: Arc::clone(self),
        }
    }
}

/// Decrements the connection count on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Handle an upgraded WebSocket connection.
///
/// A sender task forwards relay events to the client while this task reads
/// client frames. When the client goes away the relay is shut down, which
/// terminates any running compiler process.
pub async fn handle_connection(socket: WebSocket, state: GatewayState) {
    let session_id = Uuid::new_v4().to_string();
    let span = info_span!("session", session_id = %session_id);
    run_connection(socket, state, session_id).instrument(span).await;
}

async fn run_connection(socket: WebSocket, state: GatewayState, session_id: String) {
    let _guard = state.connections.track();
    info!(
        active_connections = state.connections.connection_count(),
        "Client connected"
    );

    let (mut ws_sink, mut ws_stream) = socket.split();
    if let Err(e) = ws_sink
        .send(Message::Text(state.greeting.to_string().into()))
        .await
    {
        debug!(error = %e, "Failed to send greeting");
        return;
    }

    let (event_tx, mut event_rx) = mpsc::channel::<RelayEvent>(EVENT_BUFFER);
    let notice_tx = event_tx.clone();
    let relay = SessionRelay::new(
        session_id,
        Arc::clone(&state.relay_config),
        Arc::clone(&state.launcher),
        Arc::clone(&state.input),
        event_tx,
    );

    // Sender task: relay events → client frames.
    let mut sender = tokio::spawn(
        async move {
            while let Some(event) = event_rx.recv().await {
                let json = match ServerMessage::from(event).to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize server message");
                        continue;
                    }
                };
                if ws_sink.send(Message::Text(json.into())).await.is_err() {
                    debug!("Client stopped accepting frames");
                    break;
                }
            }
        }
        .in_current_span(),
    );

    // Receiver loop: client frames → relay calls.
    while let Some(frame) = ws_stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(_)) => break,
            // Ping/pong are answered by the protocol layer.
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "WebSocket read failed");
                break;
            }
        };
        handle_client_text(&relay, &notice_tx, &text).await;
    }

    relay.shutdown().await;
    drop(relay);
    drop(notice_tx);
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut sender).await.is_err() {
        sender.abort();
    }
    info!("Client disconnected");
}

async fn handle_client_text(
    relay: &SessionRelay,
    notice_tx: &mpsc::Sender<RelayEvent>,
    text: &str,
) {
    match ClientRequest::parse(text) {
        ClientRequest::Run { code } => {
            debug!(len = code.len(), "Run requested");
            if let Err(e) = relay.start(&code).await {
                // Already reported to the client as a `Failed` event.
                debug!(error = %e, "Run did not start");
            }
        }
        ClientRequest::SubmitInput { value } => {
            if let Err(e) = relay.submit_input(&value).await {
                warn!(error = %e, "Input rejected");
                let _ = notice_tx
                    .send(RelayEvent::output(format!("{ERROR_MARKER}{e}")))
                    .await;
            }
        }
    }
}
