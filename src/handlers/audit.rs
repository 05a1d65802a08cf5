use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};

use crate::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::models::audit::{AuditAction, AuditQuery};
use crate::models::org::Role;
use crate::models::query::Page;

/// Append-only audit view. Org admins only; the read is itself audited.
pub async fn list_audit(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if ctx.role != Role::Admin {
        state.audit.access_denied(&state.store, &ctx, "audit", None);
        return Err(ApiError::Forbidden);
    }
    if let Some(ref action) = query.action
        && AuditAction::parse(action).is_none()
    {
        return Err(ApiError::Validation(format!("unknown action: {action}")));
    }
    let (rows, total) = state.store.list_audit(&ctx.org_id, &query)?;
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::View,
        "audit",
        None,
        "listed audit log",
    );
    Ok(Json(Page {
        rows,
        total,
        page: query.page,
        page_size: query.page_size.clamp(1, 1000),
    }))
}
