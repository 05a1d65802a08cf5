//! Name -> coordinate resolution against a Nominatim-style endpoint, with a
//! per-provider rate limit. Disabled entirely when no URL is configured.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::GeocoderConfig;

pub struct Geocoder {
    http: reqwest::Client,
    config: GeocoderConfig,
    last_call: Mutex<Option<Instant>>,
}

#[derive(serde::Deserialize)]
struct GeocodeHit {
    lat: serde_json::Value,
    lon: serde_json::Value,
}

fn coord(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl Geocoder {
    pub fn new(config: GeocoderConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            config,
            last_call: Mutex::new(None),
        })
    }

    /// Resolves a place name. Returns None on miss or provider error; the
    /// event stays valid without coordinates.
    pub async fn geocode(&self, name: &str) -> Option<(f64, f64)> {
        self.throttle().await;
        let url = format!(
            "{}?format=json&limit=1&q={}",
            self.config.url,
            urlencoding::encode(name)
        );
        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("geocoder request failed for '{name}': {e}");
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!("geocoder returned {} for '{name}'", resp.status());
            return None;
        }
        let hits: Vec<GeocodeHit> = match resp.json().await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!("geocoder payload unparsable for '{name}': {e}");
                return None;
            }
        };
        let hit = hits.first()?;
        Some((coord(&hit.lat)?, coord(&hit.lon)?))
    }

    async fn throttle(&self) {
        let min_gap = Duration::from_millis(self.config.rate_limit_ms);
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < min_gap {
                tokio::time::sleep(min_gap - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coords_parse_from_strings_and_numbers() {
        assert_eq!(coord(&serde_json::json!("50.85")), Some(50.85));
        assert_eq!(coord(&serde_json::json!(4.35)), Some(4.35));
        assert_eq!(coord(&serde_json::json!(null)), None);
    }
}
