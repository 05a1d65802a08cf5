use serde::Deserialize;
use std::path::Path;

/// Process configuration from the environment. Secrets and endpoints live
/// here; schedule tuning lives in `TuningConfig` (argus.toml).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub bind_addr: String,
    pub llm: Option<LlmConfig>,
    pub geocoder: Option<GeocoderConfig>,
    pub jwt_secret: Option<String>,
    pub admin_api_key: Option<String>,
    pub cors_origins: String,
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub url: String,
    pub rate_limit_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let llm = std::env::var("ARGUS_LLM_URL").ok().map(|url| LlmConfig {
            url,
            api_key: std::env::var("ARGUS_LLM_API_KEY").unwrap_or_default(),
            model: std::env::var("ARGUS_LLM_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            temperature: std::env::var("ARGUS_LLM_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.2),
            max_tokens: std::env::var("ARGUS_LLM_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(512),
        });
        let geocoder = std::env::var("ARGUS_GEOCODER_URL")
            .ok()
            .map(|url| GeocoderConfig {
                url,
                rate_limit_ms: std::env::var("ARGUS_GEOCODER_RATE_LIMIT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            });
        Self {
            db_path: std::env::var("ARGUS_DB").unwrap_or_else(|_| "./argus.db".to_string()),
            bind_addr: std::env::var("ARGUS_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            llm,
            geocoder,
            jwt_secret: std::env::var("ARGUS_JWT_SECRET").ok(),
            admin_api_key: std::env::var("ARGUS_ADMIN_API_KEY").ok(),
            cors_origins: std::env::var("ARGUS_CORS_ORIGINS").unwrap_or_else(|_| "*".to_string()),
            heartbeat_secs: std::env::var("ARGUS_HEARTBEAT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}

/// Schedule and fusion tuning loaded from `argus.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TuningConfig {
    #[serde(default)]
    pub ingest: IngestTuning,
    #[serde(default)]
    pub fusion: FusionTuning,
    #[serde(default)]
    pub retention: RetentionTuning,
    #[serde(default)]
    pub enrichment: EnrichmentTuning,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestTuning {
    /// Worker wake-up cadence; per-source intervals gate actual fetches.
    #[serde(default = "default_ingest_tick_secs")]
    pub tick_secs: u64,
    /// In-flight fetches per source type.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for IngestTuning {
    fn default() -> Self {
        Self {
            tick_secs: default_ingest_tick_secs(),
            fetch_concurrency: default_fetch_concurrency(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FusionTuning {
    #[serde(default = "default_fusion_interval_mins")]
    pub interval_mins: u64,
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for FusionTuning {
    fn default() -> Self {
        Self {
            interval_mins: default_fusion_interval_mins(),
            window_hours: default_window_hours(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionTuning {
    #[serde(default = "default_retention_interval_mins")]
    pub interval_mins: u64,
    /// Soft-deleted rows are purged after this many days.
    #[serde(default = "default_grace_days")]
    pub grace_days: i64,
    /// Fallback event retention when no org configures one. None keeps forever.
    #[serde(default)]
    pub default_event_retention_days: Option<i64>,
}

impl Default for RetentionTuning {
    fn default() -> Self {
        Self {
            interval_mins: default_retention_interval_mins(),
            grace_days: default_grace_days(),
            default_event_retention_days: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentTuning {
    /// Process-wide cap on concurrent LLM calls.
    #[serde(default = "default_llm_concurrency")]
    pub llm_concurrency: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_dossier_refresh_mins")]
    pub dossier_refresh_mins: u64,
}

impl Default for EnrichmentTuning {
    fn default() -> Self {
        Self {
            llm_concurrency: default_llm_concurrency(),
            llm_timeout_secs: default_llm_timeout_secs(),
            dossier_refresh_mins: default_dossier_refresh_mins(),
        }
    }
}

fn default_ingest_tick_secs() -> u64 {
    60
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_fusion_interval_mins() -> u64 {
    120
}

fn default_window_hours() -> i64 {
    24
}

fn default_similarity_threshold() -> f64 {
    0.6
}

fn default_retention_interval_mins() -> u64 {
    60
}

fn default_grace_days() -> i64 {
    7
}

fn default_llm_concurrency() -> usize {
    8
}

fn default_llm_timeout_secs() -> u64 {
    20
}

fn default_dossier_refresh_mins() -> u64 {
    15
}

impl TuningConfig {
    /// Load from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("tuning file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: TuningConfig = toml::from_str(&contents)?;
        tracing::info!("loaded tuning from {}", path.display());
        Ok(config)
    }
}
