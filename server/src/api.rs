//! # REST API Endpoints
//!
//! HTTP endpoints for querying backend state without opening a socket.

use axum::{extract::State, Json};
use identicore_protocol::DiagnosticResponse;

use crate::state::AppState;

/// `GET /api/diagnostic`: the same counters a DIAGNOSTIC frame returns.
pub async fn diagnostic(State(state): State<AppState>) -> Json<DiagnosticResponse> {
    Json(snapshot(&state))
}

pub fn snapshot(state: &AppState) -> DiagnosticResponse {
    DiagnosticResponse {
        alive: true,
        queue_len: state.jobs.len() as u64,
        ws_clients: state.client_count() as u64,
    }
}
