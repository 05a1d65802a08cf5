use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::auth::AdminKey;
use crate::error::ApiError;
use crate::models::org::{AddMemberRequest, CreateOrgRequest, CreateUserRequest};

/// Operator bootstrap endpoints. Token issuance stays external; these only
/// manage the org/user/membership rows the JWTs refer to.
pub async fn create_org(
    State(state): State<AppState>,
    _admin: AdminKey,
    Json(req): Json<CreateOrgRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }
    let id = uuid::Uuid::new_v4().to_string();
    state.store.create_org(&id, &req.name, &req.description)?;
    let org = state.store.get_org(&id)?.ok_or(ApiError::NotFound)?;
    Ok((StatusCode::CREATED, Json(org)))
}

pub async fn list_orgs(
    State(state): State<AppState>,
    _admin: AdminKey,
) -> Result<impl IntoResponse, ApiError> {
    let orgs = state.store.list_orgs()?;
    Ok(Json(serde_json::json!({ "organizations": orgs })))
}

pub async fn create_user(
    State(state): State<AppState>,
    _admin: AdminKey,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !req.email.contains('@') {
        return Err(ApiError::Validation("invalid email".to_string()));
    }
    let id = uuid::Uuid::new_v4().to_string();
    state
        .store
        .create_user(&id, &req.email, &req.password_hash)?;
    let user = state.store.get_user(&id)?.ok_or(ApiError::NotFound)?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Deleting a user anonymizes their audit rows; the rows themselves remain.
pub async fn delete_user(
    State(state): State<AppState>,
    _admin: AdminKey,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.delete_user(&id)? {
        return Err(ApiError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_member(
    State(state): State<AppState>,
    _admin: AdminKey,
    Path(org_id): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.store.get_org(&org_id)?.is_none() {
        return Err(ApiError::NotFound);
    }
    if state.store.get_user(&req.user_id)?.is_none() {
        return Err(ApiError::Validation("unknown user".to_string()));
    }
    state
        .store
        .add_membership(&req.user_id, &org_id, req.role)?;
    Ok(StatusCode::NO_CONTENT)
}
