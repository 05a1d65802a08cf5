use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::auth::AdminKey;
use crate::error::ApiError;
use crate::models::source::{CreateSourceRequest, UpdateSourceRequest};

fn validate_url(url: &str) -> Result<(), ApiError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ApiError::Validation("url must be http(s)".to_string()));
    }
    Ok(())
}

fn validate_trust(trust: f64) -> Result<(), ApiError> {
    if !(0.0..=1.0).contains(&trust) {
        return Err(ApiError::Validation("trust must be in [0,1]".to_string()));
    }
    Ok(())
}

pub async fn list_sources(
    State(state): State<AppState>,
    _admin: AdminKey,
) -> Result<impl IntoResponse, ApiError> {
    let sources = state.store.list_sources()?;
    Ok(Json(serde_json::json!({ "sources": sources })))
}

pub async fn create_source(
    State(state): State<AppState>,
    _admin: AdminKey,
    Json(req): Json<CreateSourceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_url(&req.url)?;
    validate_trust(req.trust)?;
    let id = uuid::Uuid::new_v4().to_string();
    state.store.create_source(
        &id,
        &req.url,
        &req.name,
        req.source_type,
        req.is_active,
        req.trust,
        req.fetch_interval_mins.max(1),
    )?;
    let created = state.store.get_source(&id)?.ok_or(ApiError::NotFound)?;
    tracing::info!("source '{}' created ({})", created.name, created.url);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_source(
    State(state): State<AppState>,
    _admin: AdminKey,
    Path(id): Path<String>,
    Json(req): Json<UpdateSourceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_url(&req.url)?;
    validate_trust(req.trust)?;
    let updated = state.store.update_source(
        &id,
        &req.url,
        &req.name,
        req.source_type,
        req.is_active,
        req.trust,
        req.fetch_interval_mins.max(1),
    )?;
    if !updated {
        return Err(ApiError::NotFound);
    }
    let source = state.store.get_source(&id)?.ok_or(ApiError::NotFound)?;
    Ok(Json(source))
}

pub async fn delete_source(
    State(state): State<AppState>,
    _admin: AdminKey,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.delete_source(&id)? {
        return Err(ApiError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}
