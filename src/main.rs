use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{Router, middleware, routing::delete, routing::get, routing::post, routing::put};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use argus_api::AppState;
use argus_api::audit::AuditLog;
use argus_api::config::{AppConfig, TuningConfig};
use argus_api::enrich::{Enricher, llm::LlmClient};
use argus_api::geocode::Geocoder;
use argus_api::handlers;
use argus_api::ingest::{IngestWorker, rss::RssFetcher};
use argus_api::realtime::{Broker, spawn_heartbeat};
use argus_api::scheduler;
use argus_api::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("argus_api=debug,tower_http=debug")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env());
    let tuning = Arc::new(TuningConfig::load(
        std::env::var("ARGUS_CONFIG").unwrap_or_else(|_| "./argus.toml".to_string()),
    )?);

    let store = Arc::new(Store::open(&config.db_path)?);
    tracing::info!("store opened at {}", config.db_path);

    let llm = match config.llm.clone() {
        Some(llm_config) => Some(LlmClient::new(
            llm_config,
            tuning.enrichment.llm_concurrency,
            tuning.enrichment.llm_timeout_secs,
        )?),
        None => None,
    };
    let geocoder = match config.geocoder.clone() {
        Some(geo_config) => Some(Geocoder::new(geo_config)?),
        None => None,
    };
    let enricher = Arc::new(Enricher::new(llm, geocoder));

    let broker = Arc::new(Broker::new(config.heartbeat_secs));
    spawn_heartbeat(broker.clone(), config.heartbeat_secs);

    // One worker per source class; RSS is the built-in one, the rest plug
    // in behind the SourceFetcher trait.
    let rss_worker = Arc::new(IngestWorker::new(
        store.clone(),
        enricher.clone(),
        broker.clone(),
        Arc::new(RssFetcher::new(tuning.ingest.fetch_timeout_secs)?),
        tuning.ingest.clone(),
    ));
    scheduler::spawn_all(store.clone(), vec![rss_worker], (*tuning).clone());

    let state = AppState {
        store,
        broker,
        audit: Arc::new(AuditLog::new()),
        config: config.clone(),
        tuning,
    };

    let cors = if config.cors_origins == "*" {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .split(',')
            .filter_map(|o| o.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = Router::new()
        // Event surface
        .route("/api/v1/events", get(handlers::events::list_events))
        .route("/api/v1/events/{id}", get(handlers::events::get_event))
        .route(
            "/api/v1/events/{id}/feedback",
            post(handlers::feedback::submit_feedback),
        )
        .route("/api/v1/clusters/{id}", get(handlers::events::get_cluster))
        // Dashboards
        .route("/api/v1/dashboard/summary", get(handlers::dashboard::summary))
        .route("/api/v1/dashboard/trends", get(handlers::dashboard::trends))
        // Dossiers
        .route(
            "/api/v1/dossiers",
            get(handlers::dossiers::list_dossiers).post(handlers::dossiers::create_dossier),
        )
        .route(
            "/api/v1/dossiers/{id}",
            get(handlers::dossiers::get_dossier)
                .put(handlers::dossiers::update_dossier)
                .delete(handlers::dossiers::delete_dossier),
        )
        // Watchlists
        .route(
            "/api/v1/watchlists",
            get(handlers::watchlists::list_watchlists).post(handlers::watchlists::create_watchlist),
        )
        .route(
            "/api/v1/watchlists/{id}",
            get(handlers::watchlists::get_watchlist)
                .put(handlers::watchlists::update_watchlist)
                .delete(handlers::watchlists::delete_watchlist),
        )
        // Org settings
        .route(
            "/api/v1/settings",
            get(handlers::settings::get_settings)
                .put(handlers::settings::update_settings)
                .delete(handlers::settings::reset_settings),
        )
        // Feedback
        .route("/api/v1/feedback/stats", get(handlers::feedback::feedback_stats))
        .route(
            "/api/v1/feedback/{id}",
            delete(handlers::feedback::delete_feedback),
        )
        // Audit
        .route("/api/v1/audit", get(handlers::audit::list_audit))
        // Source administration
        .route(
            "/api/v1/sources",
            get(handlers::sources::list_sources).post(handlers::sources::create_source),
        )
        .route(
            "/api/v1/sources/{id}",
            put(handlers::sources::update_source).delete(handlers::sources::delete_source),
        )
        // Org / user bootstrap
        .route(
            "/api/v1/orgs",
            get(handlers::orgs::list_orgs).post(handlers::orgs::create_org),
        )
        .route("/api/v1/orgs/{org_id}/members", post(handlers::orgs::add_member))
        .route("/api/v1/users", post(handlers::orgs::create_user))
        .route("/api/v1/users/{id}", delete(handlers::orgs::delete_user))
        // Fusion admin trigger
        .route("/api/v1/fusion/run", post(handlers::fusion::run_fusion_now))
        // Realtime
        .route("/api/v1/stream", get(handlers::stream::stream))
        // Health
        .route("/healthz", get(handlers::health::healthz))
        .layer(middleware::from_fn(request_id))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("argus-api listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Correlation id: propagated when the client sends one, minted otherwise.
async fn request_id(
    req: axum::extract::Request,
    next: middleware::Next,
) -> axum::response::Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}
