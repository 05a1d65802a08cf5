use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::auth::AdminKey;
use crate::error::ApiError;
use crate::fusion::run_fusion;
use crate::models::query::RunFusionRequest;

/// Synchronous admin trigger for a fusion pass over the trailing window.
pub async fn run_fusion_now(
    State(state): State<AppState>,
    _admin: AdminKey,
    Json(req): Json<RunFusionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !(1..=24 * 30).contains(&req.hours_back) {
        return Err(ApiError::Validation(
            "hours_back must be in 1..=720".to_string(),
        ));
    }
    let store = state.store.clone();
    let threshold = state.tuning.fusion.similarity_threshold;
    let hours_back = req.hours_back;
    // The pass is CPU+store bound; keep it off the request executor.
    let result = tokio::task::spawn_blocking(move || run_fusion(&store, hours_back, threshold))
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;
    let summary = result.map_err(|e| {
        if e.to_string().contains("in progress") {
            ApiError::Validation("fusion already in progress".to_string())
        } else {
            ApiError::Internal(e)
        }
    })?;
    Ok(Json(summary))
}
