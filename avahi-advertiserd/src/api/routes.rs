use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tokio::sync::watch;
use shared::protocol::API_PREFIX;
use crate::status::{ClaimView, StatusSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub status_rx: watch::Receiver<StatusSnapshot>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(get_health))
        .route(&format!("{}/status", API_PREFIX), get(get_status))
        .route(&format!("{}/claims", API_PREFIX), get(get_claims))
        .route(&format!("{}/claims/hash", API_PREFIX), get(get_claims_hash))
        .with_state(state)
}

/// Unhealthy while the watch is backing off or resubscribing
async fn get_health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.status_rx.borrow().watch_state {
        "backoff" | "resubscribing" => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
        _ => (StatusCode::OK, "ok"),
    }
}

async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status_rx.borrow().clone())
}

async fn get_claims(State(state): State<AppState>) -> Json<Vec<ClaimView>> {
    Json(state.status_rx.borrow().claims.clone())
}

async fn get_claims_hash(State(state): State<AppState>) -> String {
    state.status_rx.borrow().claims_hash.clone()
}
