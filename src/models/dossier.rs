use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DossierType {
    Location,
    Organization,
    Group,
    Topic,
    Person,
}

impl DossierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DossierType::Location => "location",
            DossierType::Organization => "organization",
            DossierType::Group => "group",
            DossierType::Topic => "topic",
            DossierType::Person => "person",
        }
    }

    pub fn parse(s: &str) -> Option<DossierType> {
        match s {
            "location" => Some(DossierType::Location),
            "organization" => Some(DossierType::Organization),
            "group" => Some(DossierType::Group),
            "topic" => Some(DossierType::Topic),
            "person" => Some(DossierType::Person),
            _ => None,
        }
    }
}

/// An org-private tracked subject. Statistics are derived from the global
/// event stream by the matcher and are never hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dossier {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub dossier_type: DossierType,
    pub description: String,
    pub aliases: Vec<String>,
    pub tags: Vec<String>,
    pub notes: String,
    /// Optional anchor coordinate for location dossiers (25 km match radius).
    pub known_lat: Option<f64>,
    pub known_lon: Option<f64>,
    pub event_count: i64,
    pub last_event_at: Option<String>,
    pub count_7d: i64,
    pub count_30d: i64,
    pub category_breakdown: HashMap<String, i64>,
    pub sentiment_breakdown: HashMap<String, i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateDossierRequest {
    pub name: String,
    pub dossier_type: DossierType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
    pub known_lat: Option<f64>,
    pub known_lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDossierRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
    pub known_lat: Option<f64>,
    pub known_lon: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchlistPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl WatchlistPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchlistPriority::Low => "low",
            WatchlistPriority::Medium => "medium",
            WatchlistPriority::High => "high",
            WatchlistPriority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<WatchlistPriority> {
        match s {
            "low" => Some(WatchlistPriority::Low),
            "medium" => Some(WatchlistPriority::Medium),
            "high" => Some(WatchlistPriority::High),
            "critical" => Some(WatchlistPriority::Critical),
            _ => None,
        }
    }
}

/// An org-private named collection of dossiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watchlist {
    pub id: String,
    pub org_id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub priority: WatchlistPriority,
    pub dossier_ids: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateWatchlistRequest {
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: WatchlistPriority,
    #[serde(default)]
    pub dossier_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWatchlistRequest {
    pub name: String,
    pub priority: WatchlistPriority,
    #[serde(default)]
    pub dossier_ids: Vec<String>,
}

fn default_priority() -> WatchlistPriority {
    WatchlistPriority::Medium
}
