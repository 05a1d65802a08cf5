use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::AppState;

/// Liveness plus store reachability. Degraded store turns the body red but
/// keeps the endpoint answering.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_orgs() {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "realtime_clients": state.broker.client_count(),
            })),
        ),
        Err(e) => {
            tracing::error!("health check store error: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "degraded", "store": "unreachable" })),
            )
        }
    }
}
