//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use order_store::OrderStore;
use serde::Serialize;

use super::orders::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok` when the broker is connected, `degraded` otherwise.
    pub status: &'static str,
    pub broker_connected: bool,
    pub circuit_open: bool,
}

/// GET /health: reports liveness plus broker and circuit breaker state.
///
/// Always answers 200 so the process is not restarted while it reconnects.
pub async fn check<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let broker_connected = state.machine.connection().is_connected();
    let circuit_open = state.machine.publisher().circuit_state().is_open;

    Json(HealthResponse {
        status: if broker_connected { "ok" } else { "degraded" },
        broker_connected,
        circuit_open,
    })
}
