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
use crate::models::event::Category;
use crate::models::feedback::{EventFeedback, SubmitFeedbackRequest};
use crate::models::org::Role;
use crate::models::settings::OrgSettings;

fn valid_rating(rating: Option<i64>) -> bool {
    rating.is_none_or(|r| (1..=5).contains(&r))
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(event_id): Path<String>,
    Json(req): Json<SubmitFeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state
        .store
        .get_org_settings(&ctx.org_id)?
        .unwrap_or_else(|| OrgSettings::defaults(&ctx.org_id));
    if !settings.feedback {
        return Err(ApiError::Validation(
            "feedback is disabled for this organization".to_string(),
        ));
    }
    if !valid_rating(req.accuracy_rating) || !valid_rating(req.relevance_rating) {
        return Err(ApiError::Validation("ratings must be 1-5".to_string()));
    }
    if let Some(ref suggested) = req.suggested_category
        && Category::parse(suggested).is_none()
    {
        return Err(ApiError::Validation(format!(
            "unknown suggested_category: {suggested}"
        )));
    }
    // Deleted events reject with a validation error, unknown ids with 404.
    match state.store.event_deleted_state(&event_id)? {
        Some(false) => {}
        Some(true) => {
            return Err(ApiError::Validation(
                "cannot submit feedback for a deleted event".to_string(),
            ));
        }
        None => return Err(ApiError::NotFound),
    }

    let feedback = EventFeedback {
        id: uuid::Uuid::new_v4().to_string(),
        event_id: event_id.clone(),
        user_id: ctx.user_id.clone(),
        org_id: ctx.org_id.clone(),
        feedback_type: req.feedback_type,
        accuracy_rating: req.accuracy_rating,
        relevance_rating: req.relevance_rating,
        is_false_positive: req.is_false_positive,
        suggested_category: req.suggested_category,
        comment: req.comment,
        created_at: String::new(),
    };
    state.store.create_feedback(&feedback)?;
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::Create,
        "feedback",
        Some(feedback.id.as_str()),
        &format!("feedback '{}' on event {event_id}", feedback.feedback_type.as_str()),
    );
    Ok((StatusCode::CREATED, Json(feedback)))
}

pub async fn feedback_stats(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.store.feedback_stats(&ctx.org_id)?;
    audit_read(&state, &ctx, "feedback", None);
    Ok(Json(stats))
}

/// Feedback is deleted by the owning user or an org admin.
pub async fn delete_feedback(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let feedback = state
        .store
        .get_feedback(&ctx.org_id, &id)?
        .ok_or(ApiError::NotFound)?;
    if feedback.user_id != ctx.user_id && ctx.role != Role::Admin {
        state
            .audit
            .access_denied(&state.store, &ctx, "feedback", Some(id.as_str()));
        return Err(ApiError::Forbidden);
    }
    state.store.delete_feedback(&ctx.org_id, &id)?;
    state.audit.record(
        &state.store,
        &ctx,
        AuditAction::Delete,
        "feedback",
        Some(id.as_str()),
        "deleted feedback",
    );
    Ok(StatusCode::NO_CONTENT)
}
