use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::handlers::audit_read;
use crate::models::audit::AuditAction;
use crate::models::dossier::{CreateWatchlistRequest, UpdateWatchlistRequest, Watchlist};

fn resolve(state: &AppState, ctx: &AuthContext, id: &str) -> Result<Watchlist, ApiError> {
    if let Some(watchlist) = state.store.get_watchlist(&ctx.org_id, id)? {
        return Ok(watchlist);
    }
    if state.store.watchlist_org(id)?.is_some() {
        state
            .audit
            .access_denied(&state.store, ctx, "watchlist", Some(id));
    }
    Err(ApiError::NotFound)
}

pub async fn list_watchlists(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<impl IntoResponse, ApiError> {
    let watchlists = state.store.list_watchlists(&ctx.org_id)?;
    audit_read(&state, &ctx, "watchlist", None);
    Ok(Json(serde_json::json!({ "watchlists": watchlists })))
}

pub async fn get_watchlist(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let watchlist = resolve(&state, &ctx, &id)?;
    audit_read(&state, &ctx, "watchlist", Some(id.as_str()));
    Ok(Json(watchlist))
}

pub async fn create_watchlist(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(req): Json<CreateWatchlistRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }
    let id = uuid::Uuid::new_v4().to_string();
    state.store.create_watchlist(
        &id,
        &ctx.org_id,
        Some(ctx.user_id.as_str()),
        &req.name,
        req.priority,
        &req.dossier_ids,
    )?;
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::Create,
        "watchlist",
        Some(id.as_str()),
        &format!("created watchlist '{}'", req.name),
    );
    let created = state
        .store
        .get_watchlist(&ctx.org_id, &id)?
        .ok_or(ApiError::NotFound)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_watchlist(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<UpdateWatchlistRequest>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, &ctx, &id)?;
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }
    state
        .store
        .update_watchlist(&ctx.org_id, &id, &req.name, req.priority, &req.dossier_ids)?;
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::Update,
        "watchlist",
        Some(id.as_str()),
        &format!("updated watchlist '{}'", req.name),
    );
    let updated = state
        .store
        .get_watchlist(&ctx.org_id, &id)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(updated))
}

pub async fn delete_watchlist(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = resolve(&state, &ctx, &id)?;
    state.store.delete_watchlist(&ctx.org_id, &id)?;
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::Delete,
        "watchlist",
        Some(id.as_str()),
        &format!("deleted watchlist '{}'", existing.name),
    );
    Ok(StatusCode::NO_CONTENT)
}
