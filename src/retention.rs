//! Retention sweep: the only process allowed to delete events and audit
//! rows. Events past retention are soft-deleted first, physically purged
//! after a grace window; affected clusters are recomputed and dossier
//! statistics flagged for lazy recomputation.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::config::RetentionTuning;
use crate::fusion::{ClusterOutcome, recompute_cluster};
use crate::store::{Store, fmt_ts};

#[derive(Debug, Default)]
pub struct RetentionSummary {
    pub soft_deleted: usize,
    pub purged: usize,
    pub clusters_recomputed: usize,
    pub clusters_dissolved: usize,
    pub audit_purged: usize,
}

/// One sweep. Event retention is the longest configured across orgs, so no
/// organization loses events it still wants; orgs without a setting do not
/// constrain the sweep.
pub fn run_retention(
    store: &Store,
    tuning: &RetentionTuning,
    window_hours: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<RetentionSummary> {
    let mut summary = RetentionSummary::default();

    let all_settings = store.all_org_settings()?;
    let retention_days = all_settings
        .iter()
        .filter_map(|s| s.event_retention_days)
        .max()
        .or(tuning.default_event_retention_days);

    if let Some(days) = retention_days {
        let cutoff = now - Duration::days(days);
        let affected = store.soft_delete_events_before(cutoff, now)?;
        summary.soft_deleted = affected.len();

        let clusters: HashSet<String> =
            affected.into_iter().filter_map(|(_, cid)| cid).collect();
        for cluster_id in clusters {
            summary.clusters_recomputed += 1;
            if recompute_cluster(store, &cluster_id, window_hours, now)?
                == ClusterOutcome::Dissolved
            {
                summary.clusters_dissolved += 1;
            }
        }

        if summary.soft_deleted > 0 {
            // Dossier stats reference deleted events; recompute lazily.
            let ids: Vec<String> = store.all_dossiers()?.into_iter().map(|d| d.id).collect();
            store.mark_dossiers_dirty(&ids)?;
        }
    }

    summary.purged = store.purge_soft_deleted_before(now - Duration::days(tuning.grace_days))?;

    for settings in &all_settings {
        let cutoff = fmt_ts(now - Duration::days(settings.audit_retention_days.max(30)));
        summary.audit_purged += store.purge_audit_before(&settings.org_id, &cutoff)?;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{Category, Enrichment, EntityBag, RawEvent, Sentiment};
    use crate::models::settings::OrgSettings;

    fn seed_event(store: &Store, url: &str, at: DateTime<Utc>) -> String {
        let raw = RawEvent {
            source_id: "src".into(),
            source_url: url.into(),
            raw_title: "Protest in Brussels".into(),
            raw_text: "Hundreds marched.".into(),
            published_at: at,
            location_hint: None,
            raw_metadata: serde_json::json!({}),
        };
        let (id, _) = store.upsert_event(&raw, at, at).unwrap();
        let enrichment = Enrichment {
            summary: "Hundreds marched.".into(),
            category: Category::Protest,
            sentiment: Sentiment::Negative,
            entities: EntityBag::default(),
            location_name: Some("Brussels".into()),
            admin_region: None,
            location_lat: None,
            location_lon: None,
            confidence_score: 0.5,
            relevance_score: 0.7,
            priority_score: 0.6,
        };
        store.apply_enrichment(&id, &enrichment, at).unwrap();
        id
    }

    #[test]
    fn sweep_soft_deletes_per_org_retention() {
        let store = Store::open_in_memory().unwrap();
        store.create_org("org-a", "A", "").unwrap();
        let mut settings = OrgSettings::defaults("org-a");
        settings.event_retention_days = Some(30);
        store.put_org_settings(&settings).unwrap();

        let now = Utc::now();
        let old = seed_event(&store, "https://e.org/old", now - Duration::days(31));
        let fresh = seed_event(&store, "https://e.org/fresh", now - Duration::days(5));

        let summary = run_retention(&store, &RetentionTuning::default(), 24, now).unwrap();
        assert_eq!(summary.soft_deleted, 1);
        assert!(store.get_event(&old).unwrap().is_none());
        assert!(store.get_event(&fresh).unwrap().is_some());
        // audit rows for the org survive the event sweep
        assert_eq!(summary.purged, 0);
    }

    #[test]
    fn sweep_without_configured_retention_is_a_noop() {
        let store = Store::open_in_memory().unwrap();
        store.create_org("org-a", "A", "").unwrap();
        let now = Utc::now();
        let old = seed_event(&store, "https://e.org/old", now - Duration::days(400));
        let summary = run_retention(&store, &RetentionTuning::default(), 24, now).unwrap();
        assert_eq!(summary.soft_deleted, 0);
        assert!(store.get_event(&old).unwrap().is_some());
    }

    #[test]
    fn longest_org_retention_wins() {
        let store = Store::open_in_memory().unwrap();
        store.create_org("org-a", "A", "").unwrap();
        store.create_org("org-b", "B", "").unwrap();
        let mut a = OrgSettings::defaults("org-a");
        a.event_retention_days = Some(30);
        store.put_org_settings(&a).unwrap();
        let mut b = OrgSettings::defaults("org-b");
        b.event_retention_days = Some(90);
        store.put_org_settings(&b).unwrap();

        let now = Utc::now();
        let mid = seed_event(&store, "https://e.org/mid", now - Duration::days(45));
        run_retention(&store, &RetentionTuning::default(), 24, now).unwrap();
        // org-b still wants 45-day-old events
        assert!(store.get_event(&mid).unwrap().is_some());
    }
}
