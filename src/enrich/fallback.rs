//! Deterministic enrichment used when the LLM capability is unavailable or
//! returns something unusable. Same inputs always yield the same outputs.

use std::collections::HashMap;

use crate::enrich::gazetteer::{
    CATEGORY_KEYWORDS, KNOWN_LOCATIONS, NEGATIVE_WORDS, POSITIVE_WORDS, TOPIC_KEYWORDS,
    is_stop_word,
};
use crate::models::event::{Category, EntityBag, Sentiment};

/// Case-insensitive whole-word containment.
fn contains_word(haystack_lower: &str, needle_lower: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack_lower[start..].find(needle_lower) {
        let abs = start + pos;
        let end = abs + needle_lower.len();
        let before_ok = abs == 0
            || !haystack_lower[..abs]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = end >= haystack_lower.len()
            || !haystack_lower[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = abs + 1;
    }
    false
}

pub fn extract_entities(title: &str, text: &str) -> EntityBag {
    let combined = format!("{title} {text}");
    let lower = combined.to_lowercase();

    let locations: Vec<String> = KNOWN_LOCATIONS
        .iter()
        .filter(|(name, _, _, _)| contains_word(&lower, &name.to_lowercase()))
        .map(|(name, _, _, _)| name.to_string())
        .collect();

    let organizations = capitalized_phrases(&combined, &locations);

    let topics: Vec<String> = TOPIC_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| contains_word(&lower, k)))
        .map(|(topic, _)| topic.to_string())
        .collect();

    let keywords = frequent_keywords(&lower, 8);

    EntityBag {
        locations,
        organizations,
        groups: Vec::new(),
        topics,
        keywords,
    }
}

/// Organization heuristic: runs of >= 2 capitalized words that are not a
/// known location, or single capitalized words carrying an institutional
/// suffix word nearby.
fn capitalized_phrases(text: &str, known_locations: &[String]) -> Vec<String> {
    const INSTITUTIONAL: &[&str] = &[
        "Ministry", "Police", "University", "Council", "Agency", "Authority", "Commission",
        "Union", "Party", "Court", "Bank", "Church", "Federation", "Institute",
    ];
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out: Vec<String> = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    let mut first_word = true;
    for word in words.iter().chain(std::iter::once(&"")) {
        let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric());
        let is_cap = cleaned.chars().next().is_some_and(|c| c.is_uppercase());
        // Sentence-initial words are capitalized regardless; skip them.
        if is_cap && !cleaned.is_empty() && !first_word {
            run.push(cleaned);
        } else {
            let phrase = run.join(" ");
            let institutional = run.iter().any(|w| INSTITUTIONAL.contains(w));
            if (run.len() >= 2 || institutional)
                && !phrase.is_empty()
                && !known_locations.iter().any(|l| l.eq_ignore_ascii_case(&phrase))
                && !out.iter().any(|o| o.eq_ignore_ascii_case(&phrase))
            {
                out.push(phrase);
            }
            run.clear();
        }
        first_word = word
            .chars()
            .next_back()
            .is_some_and(|c| matches!(c, '.' | '!' | '?'));
    }
    out.truncate(6);
    out
}

fn frequent_keywords(lower: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in lower.split(|c: char| !c.is_alphanumeric()) {
        if token.len() > 3 && !is_stop_word(token) {
            *counts.entry(token).or_default() += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    // Deterministic: frequency desc, then alphabetical.
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(w, _)| w.to_string())
        .collect()
}

/// First two sentences, truncated to 320 chars on a word boundary.
pub fn summarize(text: &str) -> String {
    const MAX_LEN: usize = 320;
    let mut summary = String::new();
    let mut sentences = 0;
    for chunk in text.split_inclusive(['.', '!', '?']) {
        summary.push_str(chunk);
        sentences += 1;
        if sentences == 2 {
            break;
        }
    }
    let summary = summary.trim();
    if summary.is_empty() {
        return text.chars().take(MAX_LEN).collect::<String>().trim().to_string();
    }
    if summary.len() <= MAX_LEN {
        return summary.to_string();
    }
    let mut cut = MAX_LEN.min(summary.len());
    while cut > 0 && !summary.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = &summary[..cut];
    match truncated.rfind(' ') {
        Some(pos) => truncated[..pos].trim_end().to_string(),
        None => truncated.to_string(),
    }
}

/// Lexicon score in [-1, 1]; |score| < 0.2 is neutral.
pub fn sentiment(text: &str) -> Sentiment {
    let lower = text.to_lowercase();
    let pos = POSITIVE_WORDS
        .iter()
        .filter(|w| contains_word(&lower, w))
        .count() as f64;
    let neg = NEGATIVE_WORDS
        .iter()
        .filter(|w| contains_word(&lower, w))
        .count() as f64;
    if pos + neg == 0.0 {
        return Sentiment::Neutral;
    }
    let score = (pos - neg) / (pos + neg);
    if score >= 0.2 {
        Sentiment::Positive
    } else if score <= -0.2 {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

/// Keyword mapping with `other` as the terminal default.
pub fn categorize(title: &str, text: &str) -> Category {
    let lower = format!("{title} {text}").to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| contains_word(&lower, k)) {
            return *category;
        }
    }
    Category::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_boundaries_respected() {
        assert!(contains_word("riot in paris", "paris"));
        assert!(!contains_word("comparison", "paris"));
        assert!(contains_word("paris.", "paris"));
    }

    #[test]
    fn extracts_gazetteer_locations() {
        let bag = extract_entities(
            "Protest in Brussels over migration policy",
            "Hundreds marched through central Brussels on Saturday.",
        );
        assert_eq!(bag.locations, vec!["Brussels"]);
        assert!(bag.topics.iter().any(|t| t == "civil unrest"));
        assert!(bag.topics.iter().any(|t| t == "migration"));
    }

    #[test]
    fn organization_heuristic_skips_locations_and_sentence_starts() {
        let bag = extract_entities(
            "Statement issued",
            "Officials from the Interior Ministry met protesters in Madrid. The European Union observed.",
        );
        assert!(bag.organizations.iter().any(|o| o == "Interior Ministry"));
        assert!(bag.organizations.iter().any(|o| o == "European Union"));
        assert!(!bag.organizations.iter().any(|o| o == "Madrid"));
    }

    #[test]
    fn summary_is_first_two_sentences() {
        let text = "First sentence. Second sentence. Third sentence.";
        assert_eq!(summarize(text), "First sentence. Second sentence.");
    }

    #[test]
    fn summary_truncates_on_word_boundary() {
        let text = format!("{} end.", "word ".repeat(100));
        let s = summarize(&text);
        assert!(s.len() <= 320);
        assert!(!s.ends_with("wor"));
    }

    #[test]
    fn sentiment_thresholds() {
        assert_eq!(sentiment("a peaceful agreement to celebrate"), Sentiment::Positive);
        assert_eq!(sentiment("three killed in violent attack"), Sentiment::Negative);
        assert_eq!(sentiment("the meeting happened on tuesday"), Sentiment::Neutral);
        // balanced counts land inside the neutral band
        assert_eq!(sentiment("violence ended in peaceful agreement after attack"), Sentiment::Neutral);
    }

    #[test]
    fn categorize_first_match_then_other() {
        assert_eq!(categorize("Protest in Brussels", ""), Category::Protest);
        assert_eq!(categorize("Flood warning issued", ""), Category::Weather);
        assert_eq!(categorize("Quarterly results published", ""), Category::Other);
    }

    #[test]
    fn enrichment_is_deterministic() {
        let title = "Protest in Brussels over migration policy";
        let text = "Hundreds marched. Police said three were injured.";
        let a = extract_entities(title, text);
        let b = extract_entities(title, text);
        assert_eq!(a, b);
        assert_eq!(summarize(text), summarize(text));
        assert_eq!(categorize(title, text), categorize(title, text));
    }
}
