use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};

use crate::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::handlers::audit_read;
use crate::models::event::{Category, Sentiment};
use crate::models::query::{EventFilters, Page};

fn validate_filters(filters: &EventFilters) -> Result<(), ApiError> {
    if let Some(ref c) = filters.category
        && Category::parse(c).is_none()
    {
        return Err(ApiError::Validation(format!("unknown category: {c}")));
    }
    if let Some(ref s) = filters.sentiment
        && Sentiment::parse(s).is_none()
    {
        return Err(ApiError::Validation(format!("unknown sentiment: {s}")));
    }
    if let Some(min) = filters.min_relevance
        && !(0.0..=1.0).contains(&min)
    {
        return Err(ApiError::Validation(
            "min_relevance must be in [0,1]".to_string(),
        ));
    }
    Ok(())
}

/// Global filtered event listing, ordered `(timestamp DESC, event_id DESC)`.
pub async fn list_events(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(filters): Query<EventFilters>,
) -> Result<impl IntoResponse, ApiError> {
    validate_filters(&filters)?;
    let (rows, total) = state.store.list_events(&filters)?;
    audit_read(&state, &ctx, "event", None);
    Ok(Json(Page {
        rows,
        total,
        page: filters.page,
        page_size: filters.effective_page_size(),
    }))
}

/// Single event with its cluster summary when it belongs to one.
pub async fn get_event(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let event = state.store.get_event(&event_id)?.ok_or(ApiError::NotFound)?;
    let cluster = match event.cluster_id.as_deref() {
        Some(cluster_id) => state.store.get_cluster(cluster_id)?,
        None => None,
    };
    audit_read(&state, &ctx, "event", Some(event_id.as_str()));
    Ok(Json(serde_json::json!({ "event": event, "cluster": cluster })))
}

/// Merged cluster record plus member ids (queried, never stored).
pub async fn get_cluster(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(cluster_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let cluster = state
        .store
        .get_cluster(&cluster_id)?
        .ok_or(ApiError::NotFound)?;
    let member_event_ids: Vec<String> = state
        .store
        .events_by_cluster(&cluster_id)?
        .into_iter()
        .map(|e| e.event_id)
        .collect();
    audit_read(&state, &ctx, "cluster", Some(cluster_id.as_str()));
    Ok(Json(crate::models::cluster::ClusterWithMembers {
        cluster,
        member_event_ids,
    }))
}
