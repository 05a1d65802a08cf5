use serde::{Deserialize, Serialize};

/// Filters for the event list endpoint. All optional; results are ordered
/// `(timestamp DESC, event_id DESC)` for deterministic pagination.
#[derive(Debug, Clone, Deserialize)]
pub struct EventFilters {
    pub category: Option<String>,
    pub sentiment: Option<String>,
    /// Substring match on `location_name`.
    pub location_name: Option<String>,
    pub min_relevance: Option<f64>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

impl EventFilters {
    /// Page size capped at 1000.
    pub fn effective_page_size(&self) -> u64 {
        self.page_size.clamp(1, 1000)
    }
}

impl Default for EventFilters {
    fn default() -> Self {
        Self {
            category: None,
            sentiment: None,
            location_name: None,
            min_relevance: None,
            since: None,
            until: None,
            cluster_id: None,
            page: 0,
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> u64 {
    50
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    #[serde(default = "default_trend_days")]
    pub days: i64,
}

fn default_trend_days() -> i64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct RunFusionRequest {
    #[serde(default = "default_hours_back")]
    pub hours_back: i64,
}

fn default_hours_back() -> i64 {
    24
}
