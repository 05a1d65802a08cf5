//! Ingest workers: per-source-type fetch loops feeding normalization,
//! enrichment, persistence, dossier matching, and realtime notification.
//! Source-fetch cycle: Idle -> Fetching -> {Parsing | CircuitOpen} ->
//! Persisting -> Enriching -> Notifying -> Idle.

pub mod rss;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use rand::Rng;

use crate::config::IngestTuning;
use crate::enrich::Enricher;
use crate::matcher;
use crate::models::event::RawEvent;
use crate::models::source::{Source, SourceType};
use crate::realtime::{Broker, alert_matches};
use crate::store::{Store, fmt_ts, parse_ts};

/// A normalized feed entry produced by a fetcher, before enrichment.
#[derive(Debug, Clone)]
pub struct FetchedEntry {
    pub source_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub title: String,
    pub text: String,
    pub location_hint: Option<String>,
    pub raw_metadata: serde_json::Value,
}

/// Source fetcher plug-in. Implementations must be bounded-time; the worker
/// additionally wraps calls in a timeout.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source_type(&self) -> SourceType;
    async fn fetch(
        &self,
        source: &Source,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<FetchedEntry>>;
}

const BREAKER_THRESHOLD: u32 = 5;
const BREAKER_PROBE_SECS: u64 = 600;

enum BreakerState {
    Closed { failures: u32 },
    Open { since: Instant },
}

/// Per-source circuit breaker: opens after 5 consecutive failures, lets a
/// probe through every 10 minutes.
struct CircuitBreaker {
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    fn allow(&self, source_id: &str) -> bool {
        let states = self.states.lock().unwrap();
        match states.get(source_id) {
            Some(BreakerState::Open { since }) => {
                since.elapsed() >= Duration::from_secs(BREAKER_PROBE_SECS)
            }
            _ => true,
        }
    }

    fn record_success(&self, source_id: &str) {
        self.states
            .lock()
            .unwrap()
            .insert(source_id.to_string(), BreakerState::Closed { failures: 0 });
    }

    fn record_failure(&self, source_id: &str) {
        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(source_id.to_string())
            .or_insert(BreakerState::Closed { failures: 0 });
        match state {
            BreakerState::Closed { failures } => {
                *failures += 1;
                if *failures >= BREAKER_THRESHOLD {
                    tracing::warn!("circuit opened for source {source_id}");
                    *state = BreakerState::Open {
                        since: Instant::now(),
                    };
                }
            }
            BreakerState::Open { since } => {
                // failed half-open probe: restart the open window
                *since = Instant::now();
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct IngestStats {
    pub sources_polled: usize,
    pub sources_skipped: usize,
    pub entries_seen: usize,
    pub events_created: usize,
    pub duplicates: usize,
    pub errors: usize,
}

pub struct IngestWorker {
    store: Arc<Store>,
    enricher: Arc<Enricher>,
    broker: Arc<Broker>,
    fetcher: Arc<dyn SourceFetcher>,
    tuning: IngestTuning,
    breaker: CircuitBreaker,
}

impl IngestWorker {
    pub fn new(
        store: Arc<Store>,
        enricher: Arc<Enricher>,
        broker: Arc<Broker>,
        fetcher: Arc<dyn SourceFetcher>,
        tuning: IngestTuning,
    ) -> Self {
        Self {
            store,
            enricher,
            broker,
            fetcher,
            tuning,
            breaker: CircuitBreaker::new(),
        }
    }

    pub fn source_type(&self) -> SourceType {
        self.fetcher.source_type()
    }

    /// One ingest tick: every due source of this worker's type, with bounded
    /// fetch concurrency. Entries within a source stay ordered.
    pub async fn run_once(&self) -> anyhow::Result<IngestStats> {
        let now = Utc::now();
        let sources = self.store.due_sources(self.source_type(), &fmt_ts(now))?;
        let stats = Mutex::new(IngestStats::default());

        futures_util::stream::iter(sources)
            .for_each_concurrent(self.tuning.fetch_concurrency, |source| {
                let stats = &stats;
                async move {
                    let outcome = self.process_source(&source, now).await;
                    let mut stats = stats.lock().unwrap();
                    match outcome {
                        SourceOutcome::Skipped => stats.sources_skipped += 1,
                        SourceOutcome::Failed => {
                            stats.sources_polled += 1;
                            stats.errors += 1;
                        }
                        SourceOutcome::Done(s) => {
                            stats.sources_polled += 1;
                            stats.entries_seen += s.entries_seen;
                            stats.events_created += s.events_created;
                            stats.duplicates += s.duplicates;
                            stats.errors += s.errors;
                        }
                    }
                }
            })
            .await;

        Ok(stats.into_inner().unwrap())
    }

    async fn process_source(&self, source: &Source, now: DateTime<Utc>) -> SourceOutcome {
        if !self.breaker.allow(&source.id) {
            tracing::debug!("source {} skipped: circuit open", source.id);
            return SourceOutcome::Skipped;
        }

        let since = source.last_fetched_at.as_deref().and_then(parse_ts);
        let fetch = tokio::time::timeout(
            Duration::from_secs(self.tuning.fetch_timeout_secs),
            self.fetcher.fetch(source, since),
        )
        .await;

        let entries = match fetch {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                self.breaker.record_failure(&source.id);
                let message = format!("fetch failed: {e}");
                self.record_result(source, now, Some(message.as_str()));
                tracing::warn!("source {} fetch failed: {e}", source.id);
                return SourceOutcome::Failed;
            }
            Err(_) => {
                self.breaker.record_failure(&source.id);
                self.record_result(source, now, Some("fetch timed out"));
                tracing::warn!("source {} fetch timed out", source.id);
                return SourceOutcome::Failed;
            }
        };
        self.breaker.record_success(&source.id);

        let mut stats = IngestStats::default();
        stats.entries_seen = entries.len();
        // Sequential per source: feed order is preserved.
        for entry in entries {
            match self.process_entry(source, entry, now).await {
                Ok(true) => stats.events_created += 1,
                Ok(false) => stats.duplicates += 1,
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!("source {} entry failed: {e}", source.id);
                }
            }
        }
        self.record_result(source, now, None);
        SourceOutcome::Done(stats)
    }

    /// Normalize -> persist -> enrich -> match -> notify. `EventCreated`
    /// fires only after enrichment is persisted, so observers never see a
    /// half-enriched event.
    async fn process_entry(
        &self,
        source: &Source,
        entry: FetchedEntry,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut metadata = entry.raw_metadata.clone();
        let mut published_at = entry.published_at.unwrap_or(now);
        if published_at > now {
            // clock skew upstream: clamp and flag
            if let Some(map) = metadata.as_object_mut() {
                map.insert("clock_skew".into(), serde_json::json!(true));
                map.insert(
                    "original_published_at".into(),
                    serde_json::json!(fmt_ts(published_at)),
                );
            }
            published_at = now;
        }

        let raw = RawEvent {
            source_id: source.id.clone(),
            source_url: entry.source_url.clone(),
            raw_title: entry.title.clone(),
            raw_text: entry.text.clone(),
            published_at,
            location_hint: entry.location_hint.clone(),
            raw_metadata: metadata,
        };

        let upserted = self
            .with_retry(|| self.store.upsert_event(&raw, now, published_at))
            .await;
        let (event_id, is_new) = match upserted {
            Ok(v) => v,
            Err(e) => {
                self.store
                    .append_dead_letter(&source.id, &entry.source_url)?;
                return Err(e);
            }
        };
        if !is_new {
            return Ok(false);
        }

        // Enrichment never fails; subpass errors degrade to fallbacks.
        let enrichment = self.enricher.enrich(&raw, source.trust).await;
        if let Err(e) = self
            .with_retry(|| self.store.apply_enrichment(&event_id, &enrichment, Utc::now()))
            .await
        {
            self.store
                .append_dead_letter(&source.id, &entry.source_url)?;
            return Err(e);
        }

        let Some(event) = self.store.get_event(&event_id)? else {
            return Ok(true);
        };
        if let Err(e) = matcher::match_event(&self.store, &event, now) {
            tracing::warn!("dossier matching failed for {event_id}: {e}");
        }

        self.broker.publish_event(&event);
        for settings in self.store.all_org_settings()? {
            if alert_matches(&settings, &event) {
                self.broker.publish_alert(&settings.org_id, &event);
            }
        }
        Ok(true)
    }

    /// Store writes retried with exponential backoff, 3 attempts total.
    async fn with_retry<T>(
        &self,
        mut op: impl FnMut() -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt >= 3 {
                        return Err(e);
                    }
                    let jitter: u64 = rand::rng().random_range(0..100);
                    let delay = 200u64 * 2u64.pow(attempt) + jitter;
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    fn record_result(&self, source: &Source, now: DateTime<Utc>, error: Option<&str>) {
        if let Err(e) = self
            .store
            .record_fetch_result(&source.id, &fmt_ts(now), error)
        {
            tracing::error!("recording fetch result for {} failed: {e}", source.id);
        }
    }
}

enum SourceOutcome {
    Skipped,
    Failed,
    Done(IngestStats),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold_and_probes() {
        let breaker = CircuitBreaker::new();
        assert!(breaker.allow("s1"));
        for _ in 0..4 {
            breaker.record_failure("s1");
            assert!(breaker.allow("s1"));
        }
        breaker.record_failure("s1");
        assert!(!breaker.allow("s1"));
        // success from a later probe closes it again
        breaker.record_success("s1");
        assert!(breaker.allow("s1"));
    }

    struct StaticFetcher {
        entries: Vec<FetchedEntry>,
    }

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        fn source_type(&self) -> SourceType {
            SourceType::Rss
        }

        async fn fetch(
            &self,
            _source: &Source,
            _since: Option<DateTime<Utc>>,
        ) -> anyhow::Result<Vec<FetchedEntry>> {
            Ok(self.entries.clone())
        }
    }

    fn worker_with(entries: Vec<FetchedEntry>) -> (Arc<Store>, IngestWorker) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .create_source(
                "src-1",
                "https://wire.example/feed",
                "Wire",
                SourceType::Rss,
                true,
                0.5,
                30,
            )
            .unwrap();
        let worker = IngestWorker::new(
            store.clone(),
            Arc::new(Enricher::new(None, None)),
            Arc::new(Broker::new(30)),
            Arc::new(StaticFetcher { entries }),
            IngestTuning::default(),
        );
        (store, worker)
    }

    fn entry(url: &str, title: &str, published_at: Option<DateTime<Utc>>) -> FetchedEntry {
        FetchedEntry {
            source_url: url.into(),
            published_at,
            title: title.into(),
            text: "Hundreds marched through central Brussels on Saturday to protest migration policy."
                .into(),
            location_hint: None,
            raw_metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn tick_ingests_and_enriches_new_entries() {
        let published = Utc::now() - chrono::Duration::hours(2);
        let (store, worker) = worker_with(vec![entry(
            "https://wire.example/brussels",
            "Protest in Brussels over migration policy",
            Some(published),
        )]);
        let stats = worker.run_once().await.unwrap();
        assert_eq!(stats.sources_polled, 1);
        assert_eq!(stats.events_created, 1);

        let (events, total) = store.list_events(&Default::default()).unwrap();
        assert_eq!(total, 1);
        let event = &events[0];
        assert!(event.is_enriched());
        assert_eq!(event.category.map(|c| c.as_str()), Some("protest"));
        assert!(event.entities.locations.iter().any(|l| l == "Brussels"));
        assert!(event.summary.as_deref().is_some_and(|s| !s.is_empty()));
        // fallback-only enrichment caps confidence
        assert!(event.confidence_score < 0.6);
        assert!(event.cluster_id.is_none());

        let source = store.get_source("src-1").unwrap().unwrap();
        assert!(source.last_fetched_at.is_some());
        assert!(source.last_error.is_none());
    }

    #[tokio::test]
    async fn tick_is_idempotent_across_reruns() {
        let published = Utc::now() - chrono::Duration::hours(2);
        let (store, worker) = worker_with(vec![entry(
            "https://wire.example/brussels",
            "Protest in Brussels over migration policy",
            Some(published),
        )]);
        worker.run_once().await.unwrap();
        // force the source due again
        store
            .record_fetch_result("src-1", &fmt_ts(Utc::now() - chrono::Duration::hours(2)), None)
            .unwrap();
        let stats = worker.run_once().await.unwrap();
        assert_eq!(stats.events_created, 0);
        assert_eq!(stats.duplicates, 1);
        let (_, total) = store.list_events(&Default::default()).unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn future_published_at_is_clamped() {
        let future = Utc::now() + chrono::Duration::hours(6);
        let (store, worker) = worker_with(vec![entry(
            "https://wire.example/skewed",
            "Protest in Brussels over migration policy",
            Some(future),
        )]);
        worker.run_once().await.unwrap();
        let (events, _) = store.list_events(&Default::default()).unwrap();
        let event = &events[0];
        assert!(event.published_at <= Utc::now());
        assert_eq!(event.metadata.get("clock_skew"), Some(&serde_json::json!(true)));
    }
}
