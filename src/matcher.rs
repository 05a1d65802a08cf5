//! Dossier matcher: associates each newly enriched global event with every
//! organization's tracked subjects and maintains the derived statistics.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::enrich::gazetteer::is_public_official;
use crate::fusion::haversine_km;
use crate::models::dossier::{Dossier, DossierType};
use crate::models::event::Event;
use crate::store::{Store, fmt_ts, parse_ts};

/// Location dossiers match events within this radius of their anchor.
const LOCATION_MATCH_KM: f64 = 25.0;

fn name_candidates(dossier: &Dossier) -> Vec<String> {
    std::iter::once(dossier.name.to_lowercase())
        .chain(dossier.aliases.iter().map(|a| a.to_lowercase()))
        .collect()
}

fn axis_matches(axis: &[String], candidates: &[String]) -> bool {
    axis.iter()
        .any(|item| candidates.iter().any(|c| item.to_lowercase() == *c))
}

/// Pure match predicate between one dossier and one enriched event.
pub fn event_matches(dossier: &Dossier, event: &Event) -> bool {
    let candidates = name_candidates(dossier);
    match dossier.dossier_type {
        DossierType::Location => {
            if axis_matches(&event.entities.locations, &candidates) {
                return true;
            }
            if let (Some(lat), Some(lon), Some(d_lat), Some(d_lon)) = (
                event.location_lat,
                event.location_lon,
                dossier.known_lat,
                dossier.known_lon,
            ) {
                return haversine_km(lat, lon, d_lat, d_lon) <= LOCATION_MATCH_KM;
            }
            false
        }
        DossierType::Organization => axis_matches(&event.entities.organizations, &candidates),
        DossierType::Group => axis_matches(&event.entities.groups, &candidates),
        DossierType::Topic => axis_matches(&event.entities.topics, &candidates),
        DossierType::Person => {
            // Only designated public officials are matchable; private
            // individuals are dropped regardless of entity hits.
            if !is_public_official(&dossier.name) {
                return false;
            }
            axis_matches(&event.entities.keywords, &candidates)
                || axis_matches(&event.entities.organizations, &candidates)
        }
    }
}

/// Runs one enriched event against every org's dossiers, updating statistics
/// for each match. Returns the matched dossier ids.
pub fn match_event(store: &Store, event: &Event, now: DateTime<Utc>) -> anyhow::Result<Vec<String>> {
    let mut matched = Vec::new();
    for dossier in store.all_dossiers()? {
        if !event_matches(&dossier, event) {
            continue;
        }
        let event_count = dossier.event_count + 1;
        let last_event_at = match dossier.last_event_at.as_deref().and_then(parse_ts) {
            Some(prev) if prev > event.timestamp => fmt_ts(prev),
            _ => fmt_ts(event.timestamp),
        };
        let windows = recompute_windows(store, &dossier, now)?;
        store.write_dossier_stats(
            &dossier.id,
            event_count,
            Some(last_event_at.as_str()),
            windows.count_7d,
            windows.count_30d,
            &windows.category_breakdown,
            &windows.sentiment_breakdown,
        )?;
        matched.push(dossier.id);
    }
    Ok(matched)
}

/// Fully recomputes statistics for dossiers flagged dirty (edits, retention
/// deletions). Unlike the incremental path this also re-derives the lifetime
/// count, so deletions can lower it.
pub fn refresh_dirty(store: &Store, now: DateTime<Utc>) -> anyhow::Result<usize> {
    let dirty = store.dirty_dossiers()?;
    let count = dirty.len();
    for dossier in dirty {
        refresh_dossier(store, &dossier, now)?;
    }
    Ok(count)
}

pub fn refresh_dossier(store: &Store, dossier: &Dossier, now: DateTime<Utc>) -> anyhow::Result<()> {
    let all = store.events_in_window(DateTime::UNIX_EPOCH, now)?;
    let matching: Vec<&Event> = all
        .iter()
        .filter(|e| event_matches(dossier, e))
        .collect();
    let event_count = matching.len() as i64;
    let last_event_at = matching.iter().map(|e| e.timestamp).max().map(fmt_ts);
    let windows = windows_from_events(&matching, now);
    store.write_dossier_stats(
        &dossier.id,
        event_count,
        last_event_at.as_deref(),
        windows.count_7d,
        windows.count_30d,
        &windows.category_breakdown,
        &windows.sentiment_breakdown,
    )?;
    Ok(())
}

struct WindowStats {
    count_7d: i64,
    count_30d: i64,
    category_breakdown: HashMap<String, i64>,
    sentiment_breakdown: HashMap<String, i64>,
}

fn recompute_windows(
    store: &Store,
    dossier: &Dossier,
    now: DateTime<Utc>,
) -> anyhow::Result<WindowStats> {
    let recent = store.events_in_window(now - Duration::days(30), now)?;
    let matching: Vec<&Event> = recent
        .iter()
        .filter(|e| event_matches(dossier, e))
        .collect();
    Ok(windows_from_events(&matching, now))
}

fn windows_from_events(matching: &[&Event], now: DateTime<Utc>) -> WindowStats {
    let week_ago = now - Duration::days(7);
    let month_ago = now - Duration::days(30);
    let mut count_7d = 0;
    let mut count_30d = 0;
    let mut category_breakdown: HashMap<String, i64> = HashMap::new();
    let mut sentiment_breakdown: HashMap<String, i64> = HashMap::new();
    for event in matching {
        if event.timestamp < month_ago {
            continue;
        }
        count_30d += 1;
        if event.timestamp >= week_ago {
            count_7d += 1;
        }
        if let Some(category) = event.category {
            *category_breakdown
                .entry(category.as_str().to_string())
                .or_default() += 1;
        }
        if let Some(sentiment) = event.sentiment {
            *sentiment_breakdown
                .entry(sentiment.as_str().to_string())
                .or_default() += 1;
        }
    }
    WindowStats {
        count_7d,
        count_30d,
        category_breakdown,
        sentiment_breakdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{Category, Enrichment, EntityBag, RawEvent, Sentiment};

    fn dossier(name: &str, dossier_type: DossierType) -> Dossier {
        Dossier {
            id: uuid::Uuid::new_v4().to_string(),
            org_id: "org-a".into(),
            name: name.into(),
            dossier_type,
            description: String::new(),
            aliases: Vec::new(),
            tags: Vec::new(),
            notes: String::new(),
            known_lat: None,
            known_lon: None,
            event_count: 0,
            last_event_at: None,
            count_7d: 0,
            count_30d: 0,
            category_breakdown: HashMap::new(),
            sentiment_breakdown: HashMap::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn brussels_event(store: &Store, at: DateTime<Utc>) -> Event {
        let raw = RawEvent {
            source_id: "src".into(),
            source_url: format!("https://e.org/{}", uuid::Uuid::new_v4()),
            raw_title: "Protest in Brussels over migration policy".into(),
            raw_text: "Hundreds marched in Brussels.".into(),
            published_at: at,
            location_hint: None,
            raw_metadata: serde_json::json!({}),
        };
        let (id, _) = store.upsert_event(&raw, at, at).unwrap();
        let enrichment = Enrichment {
            summary: "Hundreds marched in Brussels over migration policy.".into(),
            category: Category::Protest,
            sentiment: Sentiment::Negative,
            entities: EntityBag {
                locations: vec!["Brussels".into()],
                topics: vec!["migration".into()],
                ..Default::default()
            },
            location_name: Some("Brussels".into()),
            admin_region: Some("Belgium".into()),
            location_lat: Some(50.8503),
            location_lon: Some(4.3517),
            confidence_score: 0.6,
            relevance_score: 0.8,
            priority_score: 0.7,
        };
        store.apply_enrichment(&id, &enrichment, at).unwrap();
        store.get_event(&id).unwrap().unwrap()
    }

    #[test]
    fn location_dossier_matches_by_name_and_alias() {
        let store = Store::open_in_memory().unwrap();
        let event = brussels_event(&store, Utc::now());
        let d = dossier("Brussels", DossierType::Location);
        assert!(event_matches(&d, &event));
        let mut aliased = dossier("Bruxelles", DossierType::Location);
        aliased.aliases = vec!["brussels".into()];
        assert!(event_matches(&aliased, &event));
        assert!(!event_matches(&dossier("Antwerp", DossierType::Location), &event));
    }

    #[test]
    fn location_dossier_matches_by_proximity() {
        let store = Store::open_in_memory().unwrap();
        let event = brussels_event(&store, Utc::now());
        // anchored ~10 km from central Brussels
        let mut near = dossier("Capital Region", DossierType::Location);
        near.known_lat = Some(50.90);
        near.known_lon = Some(4.45);
        assert!(event_matches(&near, &event));
        let mut far = dossier("Ardennes", DossierType::Location);
        far.known_lat = Some(50.0);
        far.known_lon = Some(5.7);
        assert!(!event_matches(&far, &event));
    }

    #[test]
    fn topic_dossier_matches_topic_axis() {
        let store = Store::open_in_memory().unwrap();
        let event = brussels_event(&store, Utc::now());
        assert!(event_matches(&dossier("migration", DossierType::Topic), &event));
        assert!(!event_matches(&dossier("energy", DossierType::Topic), &event));
    }

    #[test]
    fn person_dossier_requires_official() {
        let store = Store::open_in_memory().unwrap();
        let mut event = brussels_event(&store, Utc::now());
        event.entities.keywords = vec!["Mayor Anne Janssens".into(), "Jan Peeters".into()];
        assert!(event_matches(
            &dossier("Mayor Anne Janssens", DossierType::Person),
            &event
        ));
        // private individual: dropped even though the keyword matches
        assert!(!event_matches(
            &dossier("Jan Peeters", DossierType::Person),
            &event
        ));
    }

    #[test]
    fn match_event_updates_stats() {
        let store = Store::open_in_memory().unwrap();
        store.create_org("org-a", "A", "").unwrap();
        let d = dossier("Brussels", DossierType::Location);
        store.create_dossier(&d).unwrap();
        let now = Utc::now();
        let event = brussels_event(&store, now);

        let matched = match_event(&store, &event, now).unwrap();
        assert_eq!(matched, vec![d.id.clone()]);

        let updated = store.get_dossier("org-a", &d.id).unwrap().unwrap();
        assert_eq!(updated.event_count, 1);
        assert_eq!(updated.count_7d, 1);
        assert_eq!(updated.count_30d, 1);
        assert_eq!(updated.category_breakdown.get("protest"), Some(&1));
        assert_eq!(updated.sentiment_breakdown.get("negative"), Some(&1));
        assert!(updated.last_event_at.is_some());
    }

    #[test]
    fn deletion_recompute_lowers_counts() {
        let store = Store::open_in_memory().unwrap();
        store.create_org("org-a", "A", "").unwrap();
        let d = dossier("Brussels", DossierType::Location);
        store.create_dossier(&d).unwrap();
        let now = Utc::now();
        let old = now - Duration::days(40);
        let stale = brussels_event(&store, old);
        let fresh = brussels_event(&store, now);
        match_event(&store, &stale, now).unwrap();
        match_event(&store, &fresh, now).unwrap();
        assert_eq!(store.get_dossier("org-a", &d.id).unwrap().unwrap().event_count, 2);

        // retention removes the stale event, dossier flagged dirty
        store
            .soft_delete_events_before(now - Duration::days(30), now)
            .unwrap();
        store.mark_dossiers_dirty(&[d.id.clone()]).unwrap();
        let refreshed = refresh_dirty(&store, now).unwrap();
        assert_eq!(refreshed, 1);
        let after = store.get_dossier("org-a", &d.id).unwrap().unwrap();
        assert_eq!(after.event_count, 1);
        assert_eq!(after.count_30d, 1);
    }
}
