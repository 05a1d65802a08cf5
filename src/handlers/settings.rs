use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;

use crate::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::models::audit::AuditAction;
use crate::models::org::Role;
use crate::models::settings::{OrgSettings, OrgSettingsPatch};
use crate::store::fmt_ts;

fn require_admin(ctx: &AuthContext) -> Result<(), ApiError> {
    if ctx.role != Role::Admin {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// GET auto-creates the defaults row so the org always reads something.
pub async fn get_settings(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<impl IntoResponse, ApiError> {
    let settings = match state.store.get_org_settings(&ctx.org_id)? {
        Some(settings) => settings,
        None => {
            let mut defaults = OrgSettings::defaults(&ctx.org_id);
            defaults.updated_at = fmt_ts(Utc::now());
            state.store.put_org_settings(&defaults)?;
            defaults
        }
    };
    // Settings views are sensitive reads: always audited.
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::View,
        "org_settings",
        Some(ctx.org_id.as_str()),
        "read settings",
    );
    Ok(Json(settings))
}

/// PUT is a partial merge over the provided fields.
pub async fn update_settings(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(patch): Json<OrgSettingsPatch>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&ctx)?;
    let mut settings = state
        .store
        .get_org_settings(&ctx.org_id)?
        .unwrap_or_else(|| OrgSettings::defaults(&ctx.org_id));
    settings.apply(patch);
    state.store.put_org_settings(&settings)?;
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::Update,
        "org_settings",
        Some(ctx.org_id.as_str()),
        "updated settings",
    );
    let saved = state
        .store
        .get_org_settings(&ctx.org_id)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(saved))
}

/// RESET: drop the row; the next GET recreates the defaults.
pub async fn reset_settings(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&ctx)?;
    state.store.delete_org_settings(&ctx.org_id)?;
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::Delete,
        "org_settings",
        Some(ctx.org_id.as_str()),
        "reset settings to defaults",
    );
    Ok(StatusCode::NO_CONTENT)
}
