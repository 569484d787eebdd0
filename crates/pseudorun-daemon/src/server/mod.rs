//! WebSocket gateway.
//!
//! One WebSocket connection maps to one [`SessionRelay`](crate::relay::SessionRelay);
//! the relay, and with it the compiler process, lives exactly as long as the
//! connection.

mod health;
mod ws;

use std::sync::Arc;

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::info;

use pseudorun_core::Config;

use crate::input::{FileInputChannel, InputChannel};
use crate::relay::RelayConfig;
use crate::subprocess::ProcessLauncher;

pub use health::HealthReport;
pub use ws::{ConnectionGuard, ConnectionTracker, handle_connection};

/// Shared gateway state.
#[derive(Clone)]
pub struct GatewayState {
    pub relay_config: Arc<RelayConfig>,
    pub launcher: Arc<ProcessLauncher>,
    pub input: Arc<dyn InputChannel>,
    /// Plain text frame sent when a client connects.
    pub greeting: Arc<str>,
    pub max_message_bytes: usize,
    pub connections: Arc<ConnectionTracker>,
}

impl GatewayState {
    pub fn new(
        relay_config: RelayConfig,
        launcher: ProcessLauncher,
        input: Arc<dyn InputChannel>,
    ) -> Self {
        Self {
            relay_config: Arc::new(relay_config),
            launcher: Arc::new(launcher),
            input,
            greeting: Arc::from("Connected to Compiler Server"),
            max_message_bytes: 1024 * 1024,
            connections: Arc::new(ConnectionTracker::new()),
        }
    }

    /// Build the state from resolved configuration, using the on-disk input slot.
    pub fn from_config(config: &Config) -> Self {
        let relay_config = RelayConfig::from_compiler_config(&config.compiler);
        let input: Arc<dyn InputChannel> =
            Arc::new(FileInputChannel::new(config.compiler.input_path()));
        Self::new(
            relay_config,
            ProcessLauncher::new(config.compiler.max_processes),
            input,
        )
        .with_greeting(config.server.greeting.as_str())
        .with_max_message_bytes(config.server.max_message_bytes)
    }

    #[must_use]
    pub fn with_greeting(mut self, greeting: &str) -> Self {
        self.greeting = Arc::from(greeting);
        self
    }

    #[must_use]
    pub const fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }
}

/// Build the gateway router.
///
/// The WebSocket endpoint is served at `/` (where browser clients connect) and
/// at `/ws`.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health::health))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_connection(socket, state))
}

/// Serve the gateway on an already bound listener until the future is dropped.
pub async fn serve(listener: TcpListener, state: GatewayState) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    info!(%addr, "WebSocket gateway listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Errors from running the gateway.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
