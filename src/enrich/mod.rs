//! Enrichment pipeline: entity extraction, summarization, sentiment,
//! categorization, geocoding, then deterministic scoring. Each subpass
//! prefers the LLM capability and falls back on any error; `enrich` itself
//! never fails.

pub mod fallback;
pub mod gazetteer;
pub mod llm;

use chrono::{DateTime, Utc};

use crate::geocode::Geocoder;
use crate::models::event::{Category, Enrichment, RawEvent, Sentiment};
use llm::LlmClient;

/// Confidence multiplier applied once per subpass that fell back. With all
/// four LLM subpasses degraded the ceiling drops below 0.6.
const FALLBACK_PENALTY: f64 = 0.85;

pub struct Enricher {
    llm: Option<LlmClient>,
    geocoder: Option<Geocoder>,
}

impl Enricher {
    pub fn new(llm: Option<LlmClient>, geocoder: Option<Geocoder>) -> Self {
        if llm.is_none() {
            tracing::info!("enrichment: LLM capability disabled, deterministic fallbacks only");
        }
        Self { llm, geocoder }
    }

    /// Runs the five subpasses and scoring. Subpass failures degrade to
    /// fallbacks and penalize confidence; they are never surfaced.
    pub async fn enrich(&self, raw: &RawEvent, source_trust: f64) -> Enrichment {
        let mut fallback_passes = 0u32;

        let entities = match &self.llm {
            Some(llm) => match llm.extract_entities(&raw.raw_text).await {
                Ok(bag) => bag,
                Err(e) => {
                    tracing::debug!("entity extraction fell back for {}: {e}", raw.source_url);
                    fallback_passes += 1;
                    fallback::extract_entities(&raw.raw_title, &raw.raw_text)
                }
            },
            None => {
                fallback_passes += 1;
                fallback::extract_entities(&raw.raw_title, &raw.raw_text)
            }
        };

        let summary = match &self.llm {
            Some(llm) => match llm.summarize(&raw.raw_title, &raw.raw_text).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!("summarization fell back for {}: {e}", raw.source_url);
                    fallback_passes += 1;
                    fallback_summary(raw)
                }
            },
            None => {
                fallback_passes += 1;
                fallback_summary(raw)
            }
        };

        let sentiment = match &self.llm {
            Some(llm) => match llm.sentiment(&raw.raw_text).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!("sentiment fell back for {}: {e}", raw.source_url);
                    fallback_passes += 1;
                    fallback::sentiment(&raw.raw_text)
                }
            },
            None => {
                fallback_passes += 1;
                fallback::sentiment(&raw.raw_text)
            }
        };

        let category = match &self.llm {
            Some(llm) => match llm.categorize(&raw.raw_title, &raw.raw_text).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!("categorization fell back for {}: {e}", raw.source_url);
                    fallback_passes += 1;
                    fallback::categorize(&raw.raw_title, &raw.raw_text)
                }
            },
            None => {
                fallback_passes += 1;
                fallback::categorize(&raw.raw_title, &raw.raw_text)
            }
        };

        // Location resolution: first extracted location, else the fetcher's
        // hint. The gazetteer resolves known names without a network call.
        let location_name = entities
            .locations
            .first()
            .cloned()
            .or_else(|| raw.location_hint.clone());
        let (admin_region, mut lat, mut lon) = match location_name
            .as_deref()
            .and_then(gazetteer::lookup_location)
        {
            Some((_, region, known_lat, known_lon)) => {
                (Some(region.to_string()), Some(known_lat), Some(known_lon))
            }
            None => (None, None, None),
        };
        if lat.is_none() {
            if let (Some(name), Some(geocoder)) = (location_name.as_deref(), &self.geocoder) {
                if let Some((g_lat, g_lon)) = geocoder.geocode(name).await {
                    lat = Some(g_lat);
                    lon = Some(g_lon);
                }
            }
        }

        let confidence_score = confidence(
            raw.raw_text.len(),
            entities.total(),
            category,
            source_trust,
            fallback_passes,
        );
        let relevance_score = relevance(category, sentiment);
        let age_hours = (Utc::now() - raw.published_at).num_minutes() as f64 / 60.0;
        let priority_score = priority(relevance_score, confidence_score, age_hours, 1);

        Enrichment {
            summary,
            category,
            sentiment,
            entities,
            location_name,
            admin_region,
            location_lat: lat,
            location_lon: lon,
            confidence_score,
            relevance_score,
            priority_score,
        }
    }
}

fn fallback_summary(raw: &RawEvent) -> String {
    let summary = fallback::summarize(&raw.raw_text);
    if summary.is_empty() {
        fallback::summarize(&raw.raw_title)
    } else {
        summary
    }
}

fn clip01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// `0.25·text_length + 0.25·entity_density + 0.30·specificity + 0.20·trust`,
/// penalized per degraded subpass, clipped to [0,1].
pub fn confidence(
    text_len: usize,
    entity_total: usize,
    category: Category,
    source_trust: f64,
    fallback_passes: u32,
) -> f64 {
    let text_length_factor = (text_len as f64 / 600.0).min(1.0);
    let entity_density_factor = (entity_total as f64 / 8.0).min(1.0);
    let category_specificity = if category == Category::Other { 0.0 } else { 1.0 };
    let base = 0.25 * text_length_factor
        + 0.25 * entity_density_factor
        + 0.30 * category_specificity
        + 0.20 * source_trust.clamp(0.0, 1.0);
    clip01(clip01(base) * FALLBACK_PENALTY.powi(fallback_passes as i32))
}

/// Base 0.4, +0.3 for safety categories, +0.1 for negative sentiment.
pub fn relevance(category: Category, sentiment: Sentiment) -> f64 {
    let mut score = 0.4;
    if category.is_safety() {
        score += 0.3;
    }
    if sentiment == Sentiment::Negative {
        score += 0.1;
    }
    clip01(score)
}

/// `0.5·relevance + 0.3·confidence + 0.1·recency + 0.1·multi_source`.
pub fn priority(relevance: f64, confidence: f64, age_hours: f64, source_count: i64) -> f64 {
    let recency_factor = (1.0 - age_hours / 72.0).max(0.0);
    let multi_source_factor = (((source_count - 1) as f64) / 3.0).min(1.0).max(0.0);
    clip01(0.5 * relevance + 0.3 * confidence + 0.1 * recency_factor + 0.1 * multi_source_factor)
}

/// Recompute a stored event's priority after fusion changed its source count.
pub fn priority_for_event(
    relevance: f64,
    confidence: f64,
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    source_count: i64,
) -> f64 {
    let age_hours = (now - timestamp).num_minutes() as f64 / 60.0;
    priority(relevance, confidence, age_hours, source_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_in_range_and_penalized() {
        let full = confidence(600, 8, Category::Protest, 0.5, 0);
        assert!((full - 0.9).abs() < 1e-9);
        let degraded = confidence(600, 8, Category::Protest, 0.5, 4);
        assert!(degraded < 0.6);
        assert!(degraded > 0.0);
        // even perfect trust cannot reach 0.6 on full fallback
        assert!(confidence(10_000, 100, Category::Crime, 1.0, 4) < 0.6);
    }

    #[test]
    fn confidence_zeroes_specificity_for_other() {
        let specific = confidence(300, 4, Category::Health, 0.5, 0);
        let vague = confidence(300, 4, Category::Other, 0.5, 0);
        assert!((specific - vague - 0.30).abs() < 1e-9);
    }

    #[test]
    fn relevance_boosts() {
        assert!((relevance(Category::Economic, Sentiment::Neutral) - 0.4).abs() < 1e-9);
        assert!((relevance(Category::Crime, Sentiment::Neutral) - 0.7).abs() < 1e-9);
        assert!((relevance(Category::Crime, Sentiment::Negative) - 0.8).abs() < 1e-9);
        assert!(relevance(Category::Protest, Sentiment::Negative) <= 1.0);
    }

    #[test]
    fn priority_recency_decays_to_zero() {
        let fresh = priority(0.8, 0.6, 0.0, 1);
        let stale = priority(0.8, 0.6, 100.0, 1);
        assert!(fresh > stale);
        assert!((fresh - stale - 0.1).abs() < 1e-9);
    }

    #[test]
    fn priority_multi_source_saturates() {
        let single = priority(0.5, 0.5, 80.0, 1);
        let four = priority(0.5, 0.5, 80.0, 4);
        let ten = priority(0.5, 0.5, 80.0, 10);
        assert!((four - single - 0.1).abs() < 1e-9);
        assert!((ten - four).abs() < 1e-9);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        for trust in [0.0, 0.5, 1.0, 2.0] {
            for len in [0usize, 100, 600, 100_000] {
                for passes in [0u32, 1, 4] {
                    let c = confidence(len, 50, Category::Crime, trust, passes);
                    assert!((0.0..=1.0).contains(&c));
                }
            }
        }
        for age in [0.0, 10.0, 72.0, 1000.0] {
            let p = priority(1.0, 1.0, age, 100);
            assert!((0.0..=1.0).contains(&p));
        }
    }
}
