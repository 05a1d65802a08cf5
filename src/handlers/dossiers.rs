use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use std::collections::HashMap;

use crate::AppState;
use crate::auth::AuthContext;
use crate::enrich::gazetteer::is_public_official;
use crate::error::ApiError;
use crate::handlers::audit_read;
use crate::models::audit::AuditAction;
use crate::models::dossier::{CreateDossierRequest, Dossier, DossierType, UpdateDossierRequest};

/// Resolves a dossier in the caller's org, logging a tenancy probe when the
/// id exists under a different org. Both cases surface as 404.
fn resolve(state: &AppState, ctx: &AuthContext, id: &str) -> Result<Dossier, ApiError> {
    if let Some(dossier) = state.store.get_dossier(&ctx.org_id, id)? {
        return Ok(dossier);
    }
    if state.store.dossier_org(id)?.is_some() {
        state.audit.access_denied(&state.store, ctx, "dossier", Some(id));
    }
    Err(ApiError::NotFound)
}

fn validate(name: &str, dossier_type: DossierType) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }
    // Policy, not schema: person dossiers are restricted to public officials.
    if dossier_type == DossierType::Person && !is_public_official(name) {
        return Err(ApiError::Validation(
            "person dossiers are restricted to designated public officials".to_string(),
        ));
    }
    Ok(())
}

pub async fn list_dossiers(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<impl IntoResponse, ApiError> {
    let dossiers = state.store.list_dossiers(&ctx.org_id)?;
    audit_read(&state, &ctx, "dossier", None);
    Ok(Json(serde_json::json!({ "dossiers": dossiers })))
}

pub async fn get_dossier(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let dossier = resolve(&state, &ctx, &id)?;
    audit_read(&state, &ctx, "dossier", Some(id.as_str()));
    Ok(Json(dossier))
}

pub async fn create_dossier(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(req): Json<CreateDossierRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate(&req.name, req.dossier_type)?;
    let dossier = Dossier {
        id: uuid::Uuid::new_v4().to_string(),
        org_id: ctx.org_id.clone(),
        name: req.name,
        dossier_type: req.dossier_type,
        description: req.description,
        aliases: req.aliases,
        tags: req.tags,
        notes: req.notes,
        known_lat: req.known_lat,
        known_lon: req.known_lon,
        event_count: 0,
        last_event_at: None,
        count_7d: 0,
        count_30d: 0,
        category_breakdown: HashMap::new(),
        sentiment_breakdown: HashMap::new(),
        created_at: String::new(),
        updated_at: String::new(),
    };
    state.store.create_dossier(&dossier)?;
    // Statistics catch up on the next refresh tick.
    state.store.mark_dossiers_dirty(&[dossier.id.clone()])?;
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::Create,
        "dossier",
        Some(dossier.id.as_str()),
        &format!("created dossier '{}'", dossier.name),
    );
    Ok((StatusCode::CREATED, Json(dossier)))
}

pub async fn update_dossier(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<UpdateDossierRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = resolve(&state, &ctx, &id)?;
    validate(&req.name, existing.dossier_type)?;
    state.store.update_dossier(
        &ctx.org_id,
        &id,
        &req.name,
        &req.description,
        &req.aliases,
        &req.tags,
        &req.notes,
        req.known_lat,
        req.known_lon,
    )?;
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::Update,
        "dossier",
        Some(id.as_str()),
        &format!("updated dossier '{}'", req.name),
    );
    let updated = state.store.get_dossier(&ctx.org_id, &id)?.ok_or(ApiError::NotFound)?;
    Ok(Json(updated))
}

pub async fn delete_dossier(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = resolve(&state, &ctx, &id)?;
    state.store.delete_dossier(&ctx.org_id, &id)?;
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::Delete,
        "dossier",
        Some(id.as_str()),
        &format!("deleted dossier '{}'", existing.name),
    );
    Ok(StatusCode::NO_CONTENT)
}
