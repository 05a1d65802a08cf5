//! Fusion engine: periodic clustering of recent events and synthesis of
//! merged cluster records. Singleton across processes via a TTL lock row in
//! the store; re-running on an unchanged event set is a no-op.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::enrich::priority_for_event;
use crate::models::cluster::{Cluster, FusionSummary, StabilityTrend};
use crate::models::event::{EntityBag, Event};
use crate::store::Store;

const FUSION_LOCK: &str = "fusion_in_progress";
const FUSION_LOCK_TTL_SECS: i64 = 30 * 60;

/// Location score radius: full score at zero distance, zero at 50 km.
const LOCATION_RADIUS_KM: f64 = 50.0;
/// Shared location name without coordinates.
const NAME_MATCH_SCORE: f64 = 0.7;

/// Acquires the singleton lock and runs one pass. Returns an error when
/// another instance holds the lock.
pub fn run_fusion(
    store: &Store,
    window_hours: i64,
    threshold: f64,
) -> anyhow::Result<FusionSummary> {
    if !store.try_acquire_flag(FUSION_LOCK, FUSION_LOCK_TTL_SECS)? {
        anyhow::bail!("fusion already in progress");
    }
    let result = run_fusion_pass(store, window_hours, threshold, Utc::now());
    store.release_flag(FUSION_LOCK)?;
    result
}

// ── Similarity ──

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

fn word_set(event: &Event) -> HashSet<String> {
    let combined = format!(
        "{} {}",
        event.summary.as_deref().unwrap_or(""),
        event.raw_title
    );
    combined
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !crate::enrich::gazetteer::is_stop_word(w))
        .map(str::to_string)
        .collect()
}

fn location_score(a: &Event, b: &Event) -> f64 {
    if let (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) =
        (a.location_lat, a.location_lon, b.location_lat, b.location_lon)
    {
        return (1.0 - haversine_km(lat1, lon1, lat2, lon2) / LOCATION_RADIUS_KM).max(0.0);
    }
    match (a.location_name.as_deref(), b.location_name.as_deref()) {
        (Some(n1), Some(n2)) if n1.trim().to_lowercase() == n2.trim().to_lowercase() => {
            NAME_MATCH_SCORE
        }
        _ => 0.0,
    }
}

/// `0.4·location + 0.4·text + 0.2·entities`, gated on time window and
/// category equality. Symmetric by construction.
pub fn similarity(a: &Event, b: &Event, window: Duration) -> f64 {
    if (a.timestamp - b.timestamp).abs() > window {
        return 0.0;
    }
    match (a.category, b.category) {
        (Some(ca), Some(cb)) if ca == cb => {}
        _ => return 0.0,
    }
    let l = location_score(a, b);
    let t = jaccard(&word_set(a), &word_set(b));
    let e = jaccard(
        &a.entities.overlap_terms().into_iter().collect(),
        &b.entities.overlap_terms().into_iter().collect(),
    );
    0.4 * l + 0.4 * t + 0.2 * e
}

// ── Clustering pass ──

pub fn run_fusion_pass(
    store: &Store,
    window_hours: i64,
    threshold: f64,
    now: DateTime<Utc>,
) -> anyhow::Result<FusionSummary> {
    let window = Duration::hours(window_hours);
    let candidates = store.events_in_window(now - window, now)?;

    // Candidates arrive ordered (timestamp ASC, event_id ASC), which makes
    // the agglomeration deterministic across runs.
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (idx, event) in candidates.iter().enumerate() {
        let mut best: Option<(usize, f64)> = None;
        for (group_idx, members) in groups.iter().enumerate() {
            let max_sim = members
                .iter()
                .map(|&m| similarity(event, &candidates[m], window))
                .fold(0.0_f64, f64::max);
            if max_sim >= threshold {
                let better = match best {
                    None => true,
                    // Ties go to the group seeded earliest.
                    Some((_, best_sim)) => max_sim > best_sim,
                };
                if better {
                    best = Some((group_idx, max_sim));
                }
            }
        }
        match best {
            Some((group_idx, _)) => groups[group_idx].push(idx),
            None => groups.push(vec![idx]),
        }
    }

    let mut summary = FusionSummary {
        window_hours,
        candidates: candidates.len(),
        clusters_created: 0,
        clusters_updated: 0,
        clusters_dissolved: 0,
        events_clustered: 0,
    };

    let previous_ids: HashSet<String> = candidates
        .iter()
        .filter_map(|e| e.cluster_id.clone())
        .collect();
    let mut surviving_ids: HashSet<String> = HashSet::new();

    for members in &groups {
        if members.len() < 2 {
            // Singletons keep cluster_id NULL; clear any stale assignment.
            let event = &candidates[members[0]];
            if event.cluster_id.is_some() {
                clear_assignment(store, event, now)?;
            }
            continue;
        }
        let mut member_events: Vec<Event> =
            members.iter().map(|&i| candidates[i].clone()).collect();
        let cluster_id = reuse_or_mint_id(&member_events);
        surviving_ids.insert(cluster_id.clone());
        summary.events_clustered += member_events.len();

        let member_count = member_events.len() as i64;
        for event in &mut member_events {
            let priority = priority_for_event(
                event.relevance_score,
                event.confidence_score,
                event.timestamp,
                now,
                member_count,
            );
            let changed = event.cluster_id.as_deref() != Some(cluster_id.as_str())
                || event.source_count != member_count
                || !event.multi_source_boost
                || (event.priority_score - priority).abs() > 1e-12;
            if changed {
                // CAS failure means retention or another writer won; the
                // next pass reconciles.
                if !store.set_cluster_assignment(
                    &event.event_id,
                    Some(cluster_id.as_str()),
                    member_count,
                    true,
                    priority,
                    event.row_version,
                )? {
                    tracing::warn!(
                        "cluster assignment lost CAS race for event {}",
                        event.event_id
                    );
                }
            }
            event.cluster_id = Some(cluster_id.clone());
            event.source_count = member_count;
            event.multi_source_boost = true;
            event.priority_score = priority;
        }

        let existed = store.get_cluster(&cluster_id)?;
        let member_refs: Vec<&Event> = member_events.iter().collect();
        let record = synthesize_cluster(&cluster_id, &member_refs, store, window, now)?;
        match existed {
            Some(ref old) if cluster_record_eq(old, &record) => {}
            Some(_) => {
                store.upsert_cluster(&record)?;
                summary.clusters_updated += 1;
            }
            None => {
                store.upsert_cluster(&record)?;
                summary.clusters_created += 1;
            }
        }
    }

    // Clusters whose candidate members dispersed: recompute from the full
    // event table; dissolve when fewer than two members remain.
    for old_id in previous_ids.difference(&surviving_ids) {
        if recompute_cluster(store, old_id, window_hours, now)? == ClusterOutcome::Dissolved {
            summary.clusters_dissolved += 1;
        }
    }

    Ok(summary)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClusterOutcome {
    Kept,
    Dissolved,
    Gone,
}

/// Rebuilds a cluster record from its current members. Used after the pass
/// for dispersed clusters and by the retention sweep after deletions.
pub fn recompute_cluster(
    store: &Store,
    cluster_id: &str,
    window_hours: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<ClusterOutcome> {
    let members = store.events_by_cluster(cluster_id)?;
    if members.len() >= 2 {
        let refs: Vec<&Event> = members.iter().collect();
        let record =
            synthesize_cluster(cluster_id, &refs, store, Duration::hours(window_hours), now)?;
        let unchanged = store
            .get_cluster(cluster_id)?
            .is_some_and(|old| cluster_record_eq(&old, &record));
        if !unchanged {
            store.upsert_cluster(&record)?;
        }
        return Ok(ClusterOutcome::Kept);
    }
    // One member left: dissolve and clear the survivor.
    for event in &members {
        clear_assignment(store, event, now)?;
    }
    let deleted = store.delete_cluster(cluster_id)?;
    Ok(if deleted || !members.is_empty() {
        ClusterOutcome::Dissolved
    } else {
        ClusterOutcome::Gone
    })
}

fn clear_assignment(store: &Store, event: &Event, now: DateTime<Utc>) -> anyhow::Result<()> {
    let priority = priority_for_event(
        event.relevance_score,
        event.confidence_score,
        event.timestamp,
        now,
        1,
    );
    if !store.set_cluster_assignment(
        &event.event_id,
        None,
        1,
        false,
        priority,
        event.row_version,
    )? {
        tracing::warn!("cluster clear lost CAS race for event {}", event.event_id);
    }
    Ok(())
}

/// Stable id reuse keeps re-runs idempotent: the earliest member carrying an
/// id wins; a group of first-timers mints a fresh uuid.
fn reuse_or_mint_id(members: &[Event]) -> String {
    members
        .iter()
        .find_map(|e| e.cluster_id.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn synthesize_cluster(
    cluster_id: &str,
    members: &[&Event],
    store: &Store,
    window: Duration,
    now: DateTime<Utc>,
) -> anyhow::Result<Cluster> {
    // Canonical member: highest confidence, earliest timestamp breaking ties.
    let canonical = members
        .iter()
        .max_by(|a, b| {
            a.confidence_score
                .partial_cmp(&b.confidence_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| b.event_id.cmp(&a.event_id))
        })
        .expect("cluster has members");

    let member_count = members.len() as i64;
    let n = members.len() as f64;
    let avg_confidence = members.iter().map(|e| e.confidence_score).sum::<f64>() / n;
    let boost = 0.05 * (member_count - 1).min(3) as f64;
    let avg_relevance =
        (members.iter().map(|e| e.relevance_score).sum::<f64>() / n + boost).min(1.0);
    let avg_priority = members.iter().map(|e| e.priority_score).sum::<f64>() / n;

    let earliest = members.iter().map(|e| e.timestamp).min().expect("nonempty");
    let latest = members.iter().map(|e| e.timestamp).max().expect("nonempty");

    let trailing = store.cluster_members_between(cluster_id, now - window, now)?;
    let prior = store.cluster_members_between(cluster_id, now - window - window, now - window)?;
    let stability_trend = stability(trailing, prior);

    Ok(Cluster {
        cluster_id: cluster_id.to_string(),
        canonical_event_id: canonical.event_id.clone(),
        member_count,
        merged_summary: canonical
            .summary
            .clone()
            .unwrap_or_else(|| canonical.raw_title.clone()),
        merged_entities: merge_entities(members),
        earliest_timestamp: earliest,
        latest_timestamp: latest,
        avg_confidence,
        avg_relevance,
        avg_priority,
        stability_trend,
        updated_at: now,
    })
}

/// Per-axis union, deduplicated case-insensitively, order fixed by member
/// iteration order (timestamp, event_id).
fn merge_entities(members: &[&Event]) -> EntityBag {
    fn merge_axis(members: &[&Event], pick: fn(&EntityBag) -> &Vec<String>) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for event in members {
            for item in pick(&event.entities) {
                if seen.insert(item.to_lowercase()) {
                    out.push(item.clone());
                }
            }
        }
        out
    }
    EntityBag {
        locations: merge_axis(members, |b| &b.locations),
        organizations: merge_axis(members, |b| &b.organizations),
        groups: merge_axis(members, |b| &b.groups),
        topics: merge_axis(members, |b| &b.topics),
        keywords: merge_axis(members, |b| &b.keywords),
    }
}

/// `>150%` of the prior window is worsening, `<67%` improving. No prior
/// history means unknown.
fn stability(trailing: i64, prior: i64) -> StabilityTrend {
    if prior == 0 {
        return StabilityTrend::Unknown;
    }
    let ratio = trailing as f64 / prior as f64;
    if ratio > 1.5 {
        StabilityTrend::Worsening
    } else if ratio < 0.67 {
        StabilityTrend::Improving
    } else {
        StabilityTrend::Stable
    }
}

/// Equality ignoring `updated_at`, so an unchanged cluster is not rewritten.
fn cluster_record_eq(a: &Cluster, b: &Cluster) -> bool {
    a.cluster_id == b.cluster_id
        && a.canonical_event_id == b.canonical_event_id
        && a.member_count == b.member_count
        && a.merged_summary == b.merged_summary
        && a.merged_entities == b.merged_entities
        && a.earliest_timestamp == b.earliest_timestamp
        && a.latest_timestamp == b.latest_timestamp
        && a.avg_confidence == b.avg_confidence
        && a.avg_relevance == b.avg_relevance
        && a.avg_priority == b.avg_priority
        && a.stability_trend == b.stability_trend
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{Category, Enrichment, RawEvent, Sentiment};

    fn ingest(
        store: &Store,
        url: &str,
        title: &str,
        summary: &str,
        category: Category,
        lat_lon: Option<(f64, f64)>,
        location: Option<&str>,
        confidence: f64,
        at: DateTime<Utc>,
    ) -> String {
        let raw = RawEvent {
            source_id: "src".into(),
            source_url: url.into(),
            raw_title: title.into(),
            raw_text: summary.into(),
            published_at: at,
            location_hint: None,
            raw_metadata: serde_json::json!({}),
        };
        let (id, is_new) = store.upsert_event(&raw, at, at).unwrap();
        assert!(is_new);
        let enrichment = Enrichment {
            summary: summary.into(),
            category,
            sentiment: Sentiment::Negative,
            entities: EntityBag {
                locations: location.map(|l| vec![l.to_string()]).unwrap_or_default(),
                ..Default::default()
            },
            location_name: location.map(str::to_string),
            admin_region: None,
            location_lat: lat_lon.map(|(lat, _)| lat),
            location_lon: lat_lon.map(|(_, lon)| lon),
            confidence_score: confidence,
            relevance_score: 0.8,
            priority_score: 0.6,
        };
        store.apply_enrichment(&id, &enrichment, at).unwrap();
        id
    }

    fn madrid_pair(store: &Store, now: DateTime<Utc>) -> (String, String) {
        let a = ingest(
            store,
            "https://a.example/strike",
            "Madrid transit strike halts metro lines",
            "Transit workers strike in Madrid halting metro lines across the city.",
            Category::Protest,
            Some((40.4168, -3.7038)),
            Some("Madrid"),
            0.9,
            now - Duration::hours(3),
        );
        let b = ingest(
            store,
            "https://b.example/metro",
            "Metro halted as Madrid transit strike spreads",
            "Madrid transit strike spreads, metro lines halted across the city.",
            Category::Protest,
            Some((40.4200, -3.7000)),
            Some("Madrid"),
            0.7,
            now - Duration::hours(1),
        );
        (a, b)
    }

    #[test]
    fn haversine_sane() {
        // Madrid <-> Barcelona is roughly 500 km
        let d = haversine_km(40.4168, -3.7038, 41.3874, 2.1686);
        assert!((480.0..530.0).contains(&d), "got {d}");
        assert_eq!(haversine_km(40.0, -3.0, 40.0, -3.0), 0.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let (a, b) = madrid_pair(&store, now);
        let ea = store.get_event(&a).unwrap().unwrap();
        let eb = store.get_event(&b).unwrap().unwrap();
        let w = Duration::hours(24);
        assert_eq!(similarity(&ea, &eb, w), similarity(&eb, &ea, w));
        assert!(similarity(&ea, &eb, w) >= 0.6);
    }

    #[test]
    fn time_gate_zeroes_beyond_window_symmetrically() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let a = ingest(
            &store,
            "https://a.example/1",
            "Madrid transit strike",
            "Strike in Madrid.",
            Category::Protest,
            None,
            Some("Madrid"),
            0.5,
            now,
        );
        let b = ingest(
            &store,
            "https://b.example/2",
            "Madrid transit strike",
            "Strike in Madrid.",
            Category::Protest,
            None,
            Some("Madrid"),
            0.5,
            now - Duration::hours(25),
        );
        let ea = store.get_event(&a).unwrap().unwrap();
        let eb = store.get_event(&b).unwrap().unwrap();
        let w = Duration::hours(24);
        assert_eq!(similarity(&ea, &eb, w), 0.0);
        assert_eq!(similarity(&eb, &ea, w), 0.0);
    }

    #[test]
    fn category_gate() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let a = ingest(
            &store,
            "https://a.example/1",
            "Madrid flooding",
            "Flooding in Madrid.",
            Category::Weather,
            None,
            Some("Madrid"),
            0.5,
            now,
        );
        let b = ingest(
            &store,
            "https://b.example/2",
            "Madrid flooding",
            "Flooding in Madrid.",
            Category::Infrastructure,
            None,
            Some("Madrid"),
            0.5,
            now,
        );
        let ea = store.get_event(&a).unwrap().unwrap();
        let eb = store.get_event(&b).unwrap().unwrap();
        assert_eq!(similarity(&ea, &eb, Duration::hours(24)), 0.0);
    }

    #[test]
    fn pass_clusters_duplicate_reports() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let (a, b) = madrid_pair(&store, now);
        let summary = run_fusion_pass(&store, 24, 0.6, now).unwrap();
        assert_eq!(summary.clusters_created, 1);
        assert_eq!(summary.events_clustered, 2);

        let ea = store.get_event(&a).unwrap().unwrap();
        let eb = store.get_event(&b).unwrap().unwrap();
        assert!(ea.cluster_id.is_some());
        assert_eq!(ea.cluster_id, eb.cluster_id);
        assert_eq!(ea.source_count, 2);
        assert!(ea.multi_source_boost);

        let cluster = store.get_cluster(ea.cluster_id.as_ref().unwrap()).unwrap().unwrap();
        // canonical member is the higher-confidence report
        assert_eq!(cluster.canonical_event_id, a);
        assert_eq!(
            cluster.merged_summary,
            "Transit workers strike in Madrid halting metro lines across the city."
        );
        assert_eq!(cluster.member_count, 2);
    }

    #[test]
    fn singleton_keeps_null_cluster() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let a = ingest(
            &store,
            "https://a.example/1",
            "Protest in Brussels over migration policy",
            "Hundreds marched in Brussels.",
            Category::Protest,
            None,
            Some("Brussels"),
            0.5,
            now,
        );
        run_fusion_pass(&store, 24, 0.6, now).unwrap();
        assert!(store.get_event(&a).unwrap().unwrap().cluster_id.is_none());
    }

    #[test]
    fn rerun_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let (a, _) = madrid_pair(&store, now);
        run_fusion_pass(&store, 24, 0.6, now).unwrap();
        let cluster_id = store.get_event(&a).unwrap().unwrap().cluster_id.unwrap();
        let first = store.get_cluster(&cluster_id).unwrap().unwrap();

        let second_summary = run_fusion_pass(&store, 24, 0.6, now).unwrap();
        assert_eq!(second_summary.clusters_created, 0);
        assert_eq!(second_summary.clusters_updated, 0);
        let second = store.get_cluster(&cluster_id).unwrap().unwrap();
        assert!(cluster_record_eq(&first, &second));
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[test]
    fn retention_dissolves_pair_cluster() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let (a, b) = madrid_pair(&store, now);
        run_fusion_pass(&store, 24, 0.6, now).unwrap();
        let cluster_id = store.get_event(&a).unwrap().unwrap().cluster_id.unwrap();

        // retention removes one member
        store
            .soft_delete_events_before(now - Duration::hours(2), now)
            .unwrap();
        let outcome = recompute_cluster(&store, &cluster_id, 24, now).unwrap();
        assert_eq!(outcome, ClusterOutcome::Dissolved);
        assert!(store.get_cluster(&cluster_id).unwrap().is_none());
        let survivor = store.get_event(&b).unwrap().unwrap();
        assert!(survivor.cluster_id.is_none());
        assert_eq!(survivor.source_count, 1);
        assert!(!survivor.multi_source_boost);
    }

    #[test]
    fn stability_thresholds() {
        assert_eq!(stability(3, 0), StabilityTrend::Unknown);
        assert_eq!(stability(4, 2), StabilityTrend::Worsening);
        assert_eq!(stability(1, 2), StabilityTrend::Improving);
        assert_eq!(stability(2, 2), StabilityTrend::Stable);
        assert_eq!(stability(3, 2), StabilityTrend::Stable);
    }

    #[test]
    fn merged_entities_dedupe_case_insensitively() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let (a, b) = madrid_pair(&store, now);
        run_fusion_pass(&store, 24, 0.6, now).unwrap();
        let _ = b;
        let cluster_id = store.get_event(&a).unwrap().unwrap().cluster_id.unwrap();
        let cluster = store.get_cluster(&cluster_id).unwrap().unwrap();
        assert_eq!(cluster.merged_entities.locations, vec!["Madrid"]);
    }

    #[test]
    fn relevance_boost_caps_at_one() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let (a, _) = madrid_pair(&store, now);
        run_fusion_pass(&store, 24, 0.6, now).unwrap();
        let cluster_id = store.get_event(&a).unwrap().unwrap().cluster_id.unwrap();
        let cluster = store.get_cluster(&cluster_id).unwrap().unwrap();
        // two members: avg 0.8 + 0.05 boost
        assert!((cluster.avg_relevance - 0.85).abs() < 1e-9);
        assert!(cluster.avg_relevance <= 1.0);
    }
}
