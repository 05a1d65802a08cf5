use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Rss,
    NewsApi,
    GovFeed,
    CrisisFeed,
    NgoFeed,
    SocialPublic,
}

impl SourceType {
    pub const ALL: [SourceType; 6] = [
        SourceType::Rss,
        SourceType::NewsApi,
        SourceType::GovFeed,
        SourceType::CrisisFeed,
        SourceType::NgoFeed,
        SourceType::SocialPublic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Rss => "rss",
            SourceType::NewsApi => "news_api",
            SourceType::GovFeed => "gov_feed",
            SourceType::CrisisFeed => "crisis_feed",
            SourceType::NgoFeed => "ngo_feed",
            SourceType::SocialPublic => "social_public",
        }
    }

    pub fn parse(s: &str) -> Option<SourceType> {
        SourceType::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

/// A global ingest source. Created by operators, owned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub url: String,
    pub name: String,
    pub source_type: SourceType,
    pub is_active: bool,
    /// Operator-assigned trust in [0,1]; feeds the confidence score.
    pub trust: f64,
    pub fetch_interval_mins: i64,
    pub last_fetched_at: Option<String>,
    pub last_error: Option<String>,
    /// URLs of entries that exhausted store-write retries.
    pub dead_letter: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSourceRequest {
    pub url: String,
    pub name: String,
    pub source_type: SourceType,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_trust")]
    pub trust: f64,
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_mins: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSourceRequest {
    pub url: String,
    pub name: String,
    pub source_type: SourceType,
    pub is_active: bool,
    #[serde(default = "default_trust")]
    pub trust: f64,
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_mins: i64,
}

fn default_true() -> bool {
    true
}

fn default_trust() -> f64 {
    0.5
}

fn default_fetch_interval() -> i64 {
    30
}
