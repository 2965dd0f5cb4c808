//! `GET /api/health` — a plain liveness probe, unauthenticated.

use axum::extract::State;
use axum::http::StatusCode;

use crate::app::AppState;

pub async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.store.ping().await {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "KO")
    }
}
