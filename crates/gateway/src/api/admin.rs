//! Operator endpoints — liveness and graceful shutdown.

use axum::extract::State;
use axum::response::Json;

use crate::state::AppState;

/// `GET /health` — liveness plus capacity counters (public).
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let admission = state.manager.admission();
    let pool = state.manager.pool().stats();
    Json(serde_json::json!({
        "ok": true,
        "active": admission.in_use(),
        "capacity": admission.capacity(),
        "pool": { "session": pool.session, "generic": pool.generic },
    }))
}

/// `POST /shutdown` — begin graceful shutdown. New `/execute` requests
/// are refused from here on; the server process winds down running
/// tasks and exits.
pub async fn shutdown(State(state): State<AppState>) -> Json<serde_json::Value> {
    tracing::info!("operator-initiated shutdown");
    state.manager.begin_shutdown();
    state.shutdown.notify_waiters();
    Json(serde_json::json!({ "shutting_down": true }))
}
