pub mod audit;
pub mod auth;
pub mod config;
pub mod enrich;
pub mod error;
pub mod fusion;
pub mod geocode;
pub mod handlers;
pub mod ingest;
pub mod matcher;
pub mod models;
pub mod realtime;
pub mod retention;
pub mod scheduler;
pub mod store;

use std::sync::Arc;

use audit::AuditLog;
use config::{AppConfig, TuningConfig};
use realtime::Broker;
use store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub broker: Arc<Broker>,
    pub audit: Arc<AuditLog>,
    pub config: Arc<AppConfig>,
    pub tuning: Arc<TuningConfig>,
}
