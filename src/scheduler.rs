//! Passive tick generator for the background jobs. Each job owns an
//! in-flight flag; a tick arriving while the previous run is still going is
//! skipped rather than queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;

use crate::config::TuningConfig;
use crate::fusion;
use crate::ingest::IngestWorker;
use crate::matcher;
use crate::retention;
use crate::store::Store;

struct JobGuard {
    name: &'static str,
    running: AtomicBool,
}

impl JobGuard {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            running: AtomicBool::new(false),
        }
    }

    fn try_start(&self) -> bool {
        let started = !self.running.swap(true, Ordering::SeqCst);
        if !started {
            tracing::warn!("{} tick skipped: previous run still going", self.name);
        }
        started
    }

    fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Spawns every background loop: one ingest loop per worker, the fusion
/// pass, the retention sweep, and the dossier stats refresh.
pub fn spawn_all(
    store: Arc<Store>,
    workers: Vec<Arc<IngestWorker>>,
    tuning: TuningConfig,
) {
    for worker in workers {
        let guard = Arc::new(JobGuard::new("ingest"));
        let tick_secs = tuning.ingest.tick_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(tick_secs));
            loop {
                interval.tick().await;
                if !guard.try_start() {
                    continue;
                }
                match worker.run_once().await {
                    Ok(stats) if stats.events_created > 0 || stats.errors > 0 => {
                        tracing::info!(
                            "ingest {}: {} polled, {} new, {} dup, {} errors",
                            worker.source_type().as_str(),
                            stats.sources_polled,
                            stats.events_created,
                            stats.duplicates,
                            stats.errors,
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("ingest tick error: {e}"),
                }
                guard.finish();
            }
        });
    }

    {
        let store = store.clone();
        let fusion_tuning = tuning.fusion.clone();
        let guard = Arc::new(JobGuard::new("fusion"));
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(fusion_tuning.interval_mins * 60));
            loop {
                interval.tick().await;
                if !guard.try_start() {
                    continue;
                }
                match fusion::run_fusion(
                    &store,
                    fusion_tuning.window_hours,
                    fusion_tuning.similarity_threshold,
                ) {
                    Ok(summary) => tracing::info!(
                        "fusion pass: {} candidates, {} created, {} updated, {} dissolved",
                        summary.candidates,
                        summary.clusters_created,
                        summary.clusters_updated,
                        summary.clusters_dissolved,
                    ),
                    Err(e) => tracing::warn!("fusion tick: {e}"),
                }
                guard.finish();
            }
        });
    }

    {
        let store = store.clone();
        let retention_tuning = tuning.retention.clone();
        let window_hours = tuning.fusion.window_hours;
        let guard = Arc::new(JobGuard::new("retention"));
        tokio::spawn(async move {
            // Let ingest settle before the first sweep.
            tokio::time::sleep(Duration::from_secs(60)).await;
            let mut interval =
                tokio::time::interval(Duration::from_secs(retention_tuning.interval_mins * 60));
            loop {
                interval.tick().await;
                if !guard.try_start() {
                    continue;
                }
                match retention::run_retention(&store, &retention_tuning, window_hours, Utc::now())
                {
                    Ok(summary) if summary.soft_deleted > 0 || summary.purged > 0 => {
                        tracing::info!(
                            "retention sweep: {} soft-deleted, {} purged, {} audit rows",
                            summary.soft_deleted,
                            summary.purged,
                            summary.audit_purged,
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("retention sweep error: {e}"),
                }
                guard.finish();
            }
        });
    }

    {
        let store = store.clone();
        let refresh_mins = tuning.enrichment.dossier_refresh_mins;
        let guard = Arc::new(JobGuard::new("dossier_stats_refresh"));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(refresh_mins * 60));
            loop {
                interval.tick().await;
                if !guard.try_start() {
                    continue;
                }
                match matcher::refresh_dirty(&store, Utc::now()) {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("dossier stats refreshed for {n} dossiers"),
                    Err(e) => tracing::error!("dossier stats refresh error: {e}"),
                }
                guard.finish();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_suppresses_overlap() {
        let guard = JobGuard::new("test");
        assert!(guard.try_start());
        assert!(!guard.try_start());
        guard.finish();
        assert!(guard.try_start());
    }
}
