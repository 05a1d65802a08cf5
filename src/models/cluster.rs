use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::event::EntityBag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityTrend {
    Improving,
    Stable,
    Worsening,
    Unknown,
}

impl StabilityTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StabilityTrend::Improving => "improving",
            StabilityTrend::Stable => "stable",
            StabilityTrend::Worsening => "worsening",
            StabilityTrend::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<StabilityTrend> {
        match s {
            "improving" => Some(StabilityTrend::Improving),
            "stable" => Some(StabilityTrend::Stable),
            "worsening" => Some(StabilityTrend::Worsening),
            "unknown" => Some(StabilityTrend::Unknown),
            _ => None,
        }
    }
}

/// A merged record derived from >= 2 member events. Owned by the fusion
/// engine; membership lives on the event rows (`cluster_id`), never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: String,
    pub canonical_event_id: String,
    pub member_count: i64,
    pub merged_summary: String,
    pub merged_entities: EntityBag,
    pub earliest_timestamp: DateTime<Utc>,
    pub latest_timestamp: DateTime<Utc>,
    pub avg_confidence: f64,
    pub avg_relevance: f64,
    pub avg_priority: f64,
    pub stability_trend: StabilityTrend,
    pub updated_at: DateTime<Utc>,
}

/// Cluster plus member ids, as served by the query API.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterWithMembers {
    #[serde(flatten)]
    pub cluster: Cluster,
    pub member_event_ids: Vec<String>,
}

/// Summary returned by the admin fusion trigger.
#[derive(Debug, Clone, Serialize)]
pub struct FusionSummary {
    pub window_hours: i64,
    pub candidates: usize,
    pub clusters_created: usize,
    pub clusters_updated: usize,
    pub clusters_dissolved: usize,
    pub events_clustered: usize,
}
