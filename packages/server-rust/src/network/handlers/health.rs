//! Health, liveness and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;
use crate::network::HealthState;

/// Detailed health as JSON. Always 200; the `state` field carries the verdict.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let rpc = state.rpc.as_ref().map_or(Value::Null, |monitor| {
        json!({
            "running": monitor.is_running(),
            "generation": monitor.generation(),
            "restarts": monitor.restart_count(),
            "connections": monitor.connection_count(),
        })
    });

    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "modules": state.registry.module_count(),
        "in_flight": state.shutdown.in_flight_count(),
        "rpc": rpc,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe: the process answers, nothing else is checked.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 only while the listener is `Ready`.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
