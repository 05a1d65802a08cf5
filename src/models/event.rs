use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event category. `other` is the terminal fallback of the categorizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Protest,
    Crime,
    ReligiousFreedom,
    CulturalTension,
    Political,
    Infrastructure,
    Health,
    Migration,
    Economic,
    Weather,
    CommunityEvent,
    Other,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::Protest,
        Category::Crime,
        Category::ReligiousFreedom,
        Category::CulturalTension,
        Category::Political,
        Category::Infrastructure,
        Category::Health,
        Category::Migration,
        Category::Economic,
        Category::Weather,
        Category::CommunityEvent,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Protest => "protest",
            Category::Crime => "crime",
            Category::ReligiousFreedom => "religious_freedom",
            Category::CulturalTension => "cultural_tension",
            Category::Political => "political",
            Category::Infrastructure => "infrastructure",
            Category::Health => "health",
            Category::Migration => "migration",
            Category::Economic => "economic",
            Category::Weather => "weather",
            Category::CommunityEvent => "community_event",
            Category::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        Category::ALL.iter().copied().find(|c| c.as_str() == s)
    }

    /// Categories in the safety set get the relevance boost.
    pub fn is_safety(&self) -> bool {
        matches!(
            self,
            Category::Crime
                | Category::Protest
                | Category::ReligiousFreedom
                | Category::Health
                | Category::Migration
                | Category::Infrastructure
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    pub fn parse(s: &str) -> Option<Sentiment> {
        match s {
            "positive" => Some(Sentiment::Positive),
            "neutral" => Some(Sentiment::Neutral),
            "negative" => Some(Sentiment::Negative),
            _ => None,
        }
    }
}

/// Extracted entities along five axes. Empty lists are valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityBag {
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl EntityBag {
    pub fn total(&self) -> usize {
        self.locations.len()
            + self.organizations.len()
            + self.groups.len()
            + self.topics.len()
            + self.keywords.len()
    }

    /// Lowercased union of the axes used for fusion entity overlap.
    pub fn overlap_terms(&self) -> Vec<String> {
        self.locations
            .iter()
            .chain(self.organizations.iter())
            .chain(self.groups.iter())
            .map(|s| s.to_lowercase())
            .collect()
    }
}

/// A normalized feed entry as produced by a `SourceFetcher`, before enrichment.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub source_id: String,
    pub source_url: String,
    pub raw_title: String,
    pub raw_text: String,
    pub published_at: DateTime<Utc>,
    pub location_hint: Option<String>,
    pub raw_metadata: serde_json::Value,
}

/// Output of the enrichment pipeline. Applied to an event exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub summary: String,
    pub category: Category,
    pub sentiment: Sentiment,
    pub entities: EntityBag,
    pub location_name: Option<String>,
    pub admin_region: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lon: Option<f64>,
    pub confidence_score: f64,
    pub relevance_score: f64,
    pub priority_score: f64,
}

/// The core unit: a global, enriched intelligence event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub source_id: String,
    pub source_url: String,
    pub raw_title: String,
    pub raw_text: String,
    pub fetched_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
    /// Event time; equals `published_at` when the true time is unknown.
    pub timestamp: DateTime<Utc>,
    pub location_name: Option<String>,
    pub admin_region: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lon: Option<f64>,
    pub summary: Option<String>,
    pub category: Option<Category>,
    pub sentiment: Option<Sentiment>,
    pub entities: EntityBag,
    pub confidence_score: f64,
    pub relevance_score: f64,
    pub priority_score: f64,
    pub cluster_id: Option<String>,
    pub source_count: i64,
    pub multi_source_boost: bool,
    /// Bumped on every mutation; cluster assignment is compare-and-set on it.
    pub row_version: i64,
    pub enriched_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl Event {
    pub fn is_enriched(&self) -> bool {
        self.enriched_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_roundtrip() {
        for c in Category::ALL {
            assert_eq!(Category::parse(c.as_str()), Some(c));
        }
        assert_eq!(Category::parse("bogus"), None);
    }

    #[test]
    fn safety_set_membership() {
        assert!(Category::Crime.is_safety());
        assert!(Category::Migration.is_safety());
        assert!(!Category::Weather.is_safety());
        assert!(!Category::Other.is_safety());
    }

    #[test]
    fn entity_bag_totals() {
        let bag = EntityBag {
            locations: vec!["Brussels".into()],
            organizations: vec!["EU".into(), "NATO".into()],
            groups: vec![],
            topics: vec!["migration".into()],
            keywords: vec![],
        };
        assert_eq!(bag.total(), 4);
        assert_eq!(bag.overlap_terms(), vec!["brussels", "eu", "nato"]);
    }
}
