//! One-shot scheduler: runs a single background job and exits with a
//! sysexits-style code so cron/CI wrappers can tell configuration problems
//! from retryable ones. 0 success, 64 configuration error, 69 upstream
//! unavailable, 75 retryable transient.

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::EnvFilter;

use argus_api::config::{AppConfig, TuningConfig};
use argus_api::enrich::{Enricher, llm::LlmClient};
use argus_api::fusion;
use argus_api::geocode::Geocoder;
use argus_api::ingest::{IngestWorker, rss::RssFetcher};
use argus_api::matcher;
use argus_api::realtime::Broker;
use argus_api::retention;
use argus_api::store::Store;

const EX_OK: u8 = 0;
const EX_USAGE: u8 = 64;
const EX_UNAVAILABLE: u8 = 69;
const EX_TEMPFAIL: u8 = 75;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("argus_api=info")),
        )
        .init();

    let Some(job) = std::env::args().nth(1) else {
        eprintln!("usage: argus-scheduler <ingest|fusion|retention|dossier-stats>");
        return ExitCode::from(EX_USAGE);
    };

    let config = AppConfig::from_env();
    let tuning = match TuningConfig::load(
        std::env::var("ARGUS_CONFIG").unwrap_or_else(|_| "./argus.toml".to_string()),
    ) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("bad tuning config: {e}");
            return ExitCode::from(EX_USAGE);
        }
    };
    let store = match Store::open(&config.db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("store unavailable at {}: {e}", config.db_path);
            return ExitCode::from(EX_UNAVAILABLE);
        }
    };

    match job.as_str() {
        "ingest" => {
            let llm = match config.llm.clone().map(|c| {
                LlmClient::new(
                    c,
                    tuning.enrichment.llm_concurrency,
                    tuning.enrichment.llm_timeout_secs,
                )
            }) {
                Some(Ok(client)) => Some(client),
                Some(Err(e)) => {
                    eprintln!("bad LLM config: {e}");
                    return ExitCode::from(EX_USAGE);
                }
                None => None,
            };
            let geocoder = match config.geocoder.clone().map(Geocoder::new) {
                Some(Ok(g)) => Some(g),
                Some(Err(e)) => {
                    eprintln!("bad geocoder config: {e}");
                    return ExitCode::from(EX_USAGE);
                }
                None => None,
            };
            let fetcher = match RssFetcher::new(tuning.ingest.fetch_timeout_secs) {
                Ok(f) => Arc::new(f),
                Err(e) => {
                    eprintln!("fetcher init failed: {e}");
                    return ExitCode::from(EX_USAGE);
                }
            };
            let worker = IngestWorker::new(
                store,
                Arc::new(Enricher::new(llm, geocoder)),
                Arc::new(Broker::new(config.heartbeat_secs)),
                fetcher,
                tuning.ingest.clone(),
            );
            match worker.run_once().await {
                Ok(stats) => {
                    tracing::info!(
                        "ingest: {} polled, {} new, {} dup, {} errors",
                        stats.sources_polled,
                        stats.events_created,
                        stats.duplicates,
                        stats.errors,
                    );
                    // every source failing is an upstream outage, not success
                    if stats.sources_polled > 0 && stats.errors >= stats.sources_polled {
                        return ExitCode::from(EX_UNAVAILABLE);
                    }
                    ExitCode::from(EX_OK)
                }
                Err(e) => {
                    eprintln!("ingest failed: {e}");
                    ExitCode::from(EX_TEMPFAIL)
                }
            }
        }
        "fusion" => match fusion::run_fusion(
            &store,
            tuning.fusion.window_hours,
            tuning.fusion.similarity_threshold,
        ) {
            Ok(summary) => {
                tracing::info!(
                    "fusion: {} candidates, {} created, {} updated, {} dissolved",
                    summary.candidates,
                    summary.clusters_created,
                    summary.clusters_updated,
                    summary.clusters_dissolved,
                );
                ExitCode::from(EX_OK)
            }
            Err(e) if e.to_string().contains("in progress") => {
                eprintln!("fusion busy: {e}");
                ExitCode::from(EX_TEMPFAIL)
            }
            Err(e) => {
                eprintln!("fusion failed: {e}");
                ExitCode::from(EX_UNAVAILABLE)
            }
        },
        "retention" => match retention::run_retention(
            &store,
            &tuning.retention,
            tuning.fusion.window_hours,
            Utc::now(),
        ) {
            Ok(summary) => {
                tracing::info!(
                    "retention: {} soft-deleted, {} purged, {} audit rows",
                    summary.soft_deleted,
                    summary.purged,
                    summary.audit_purged,
                );
                ExitCode::from(EX_OK)
            }
            Err(e) => {
                eprintln!("retention failed: {e}");
                ExitCode::from(EX_UNAVAILABLE)
            }
        },
        "dossier-stats" => match matcher::refresh_dirty(&store, Utc::now()) {
            Ok(n) => {
                tracing::info!("dossier stats refreshed for {n} dossiers");
                ExitCode::from(EX_OK)
            }
            Err(e) => {
                eprintln!("dossier stats refresh failed: {e}");
                ExitCode::from(EX_UNAVAILABLE)
            }
        },
        other => {
            eprintln!("unknown job '{other}'");
            ExitCode::from(EX_USAGE)
        }
    }
}
