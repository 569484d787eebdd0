//! Health endpoint.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use super::GatewayState;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `serving`, or `busy` when every process slot is taken.
    pub status: String,
    pub version: String,
    pub active_processes: usize,
    pub max_processes: usize,
    pub connections: u64,
}

pub(super) async fn health(State(state): State<GatewayState>) -> Json<HealthReport> {
    let active = state.launcher.active_count();
    let capacity = state.launcher.capacity();
    let status = if active < capacity { "serving" } else { "busy" };

    Json(HealthReport {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_processes: active,
        max_processes: capacity,
        connections: state.connections.connection_count(),
    })
}
