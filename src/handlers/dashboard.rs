use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::handlers::audit_read;
use crate::models::query::TrendsQuery;
use crate::models::settings::OrgSettings;
use crate::store::DistributionColumn;

#[derive(Debug, Serialize)]
pub struct DashboardSummary {
    pub events_today: i64,
    pub events_7d: i64,
    pub events_30d: i64,
    pub high_priority_today: i64,
    pub top_locations: Vec<LocationCount>,
    pub category_distribution: HashMap<String, i64>,
    pub sentiment_distribution: HashMap<String, i64>,
    pub active_dossiers: i64,
    pub total_dossiers: i64,
}

#[derive(Debug, Serialize)]
pub struct LocationCount {
    pub name: String,
    pub count: i64,
}

pub async fn summary(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let today = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);
    let week_ago = now - Duration::days(7);
    let month_ago = now - Duration::days(30);

    let settings = state
        .store
        .get_org_settings(&ctx.org_id)?
        .unwrap_or_else(|| OrgSettings::defaults(&ctx.org_id));

    let (total_dossiers, active_dossiers) = state.store.dossier_counts(&ctx.org_id)?;
    let top_locations = state
        .store
        .top_locations_since(week_ago, 10)?
        .into_iter()
        .map(|(name, count)| LocationCount { name, count })
        .collect();

    audit_read(&state, &ctx, "dashboard", None);
    Ok(Json(DashboardSummary {
        events_today: state.store.count_events_since(today)?,
        events_7d: state.store.count_events_since(week_ago)?,
        events_30d: state.store.count_events_since(month_ago)?,
        high_priority_today: state
            .store
            .count_high_priority_since(today, settings.high_priority_threshold)?,
        top_locations,
        category_distribution: state
            .store
            .distribution_since(DistributionColumn::Category, week_ago)?,
        sentiment_distribution: state
            .store
            .distribution_since(DistributionColumn::Sentiment, week_ago)?,
        active_dossiers,
        total_dossiers,
    }))
}

#[derive(Debug, Serialize)]
pub struct TrendDay {
    pub date: String,
    pub total: i64,
    pub categories: HashMap<String, i64>,
}

/// Daily event counts and per-category counts over the trailing window.
pub async fn trends(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(query): Query<TrendsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !(1..=90).contains(&query.days) {
        return Err(ApiError::Validation("days must be in 1..=90".to_string()));
    }
    let since = Utc::now() - Duration::days(query.days);
    let rows = state.store.daily_trends(since)?;

    let mut days: Vec<TrendDay> = Vec::new();
    for (date, category, count) in rows {
        match days.last_mut() {
            Some(day) if day.date == date => {
                day.total += count;
                *day.categories.entry(category).or_default() += count;
            }
            _ => {
                let mut categories = HashMap::new();
                categories.insert(category, count);
                days.push(TrendDay {
                    date,
                    total: count,
                    categories,
                });
            }
        }
    }
    audit_read(&state, &ctx, "dashboard", None);
    Ok(Json(serde_json::json!({ "days": days })))
}
