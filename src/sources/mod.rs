// src/sources/mod.rs
//! Data source adapters: weather, traffic, air quality and safety.
//!
//! Weather and traffic call real HTTP APIs and fall back to documented
//! simulated records when a key is missing or the call fails. Air quality
//! and safety are simulations. The live weather client used by `/api/iqv`
//! and `/api/forecast` reports typed errors instead of falling back.

pub mod air_quality;
pub mod safety;
pub mod traffic;
pub mod types;
pub mod weather;

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::SeedableRng;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::AppConfig;
use crate::error::SourceError;
use crate::sources::air_quality::AirQualitySource;
use crate::sources::safety::SafetySource;
use crate::sources::traffic::TrafficSource;
use crate::sources::types::{
    AirQualityRecord, RawSignals, SafetyRecord, SignalSource, TrafficRecord, WeatherRecord,
};
use crate::sources::weather::WeatherSource;

const USER_AGENT: &str = "city-sense/0.1";

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "source_fallbacks_total",
            "Adapter calls answered with simulated data."
        );
        describe_counter!("source_errors_total", "Adapter calls that failed.");
    });
}

/// Record that an adapter substituted simulated data.
pub(crate) fn note_fallback(source: &'static str, reason: &str) {
    ensure_metrics_described();
    counter!("source_fallbacks_total", "source" => source).increment(1);
    tracing::warn!(source, reason, "using simulated data");
}

/// Strip diacritics and surrounding whitespace, keep case.
/// `"São Paulo"` → `"Sao Paulo"`.
pub fn normalize_city_name(city: &str) -> String {
    city.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// False for names carrying path separators, `..` or control characters.
/// City names end up in file names, so these never reach the store.
pub fn is_plausible_city_name(city: &str) -> bool {
    !city.is_empty()
        && !city.contains("..")
        && !city.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}

/// Lookup key that ignores spaces, underscores and case.
pub(crate) fn city_key(city: &str) -> String {
    city.chars()
        .filter(|c| *c != ' ' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// RNG for simulated sources: deterministic per `(seed, city)` when seeded.
pub(crate) fn simulation_rng(seed: Option<u64>, city: &str) -> StdRng {
    match seed {
        Some(seed) => {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            city.hash(&mut hasher);
            StdRng::seed_from_u64(seed ^ hasher.finish())
        }
        None => StdRng::from_os_rng(),
    }
}

/// Shared HTTP client with the per-call timeout applied.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(timeout.min(Duration::from_secs(4)))
        .timeout(timeout)
        .build()
}

/// The four adapters the pipeline extracts from.
#[derive(Clone)]
pub struct Sources {
    pub weather: Arc<dyn SignalSource<WeatherRecord>>,
    pub traffic: Arc<dyn SignalSource<TrafficRecord>>,
    pub air_quality: Arc<dyn SignalSource<AirQualityRecord>>,
    pub safety: Arc<dyn SignalSource<SafetyRecord>>,
}

impl Sources {
    /// Real adapters wired from configuration.
    pub fn from_config(cfg: &AppConfig, client: reqwest::Client) -> Self {
        Self {
            weather: Arc::new(WeatherSource::new(
                client.clone(),
                cfg.sources.openweather_api_key.clone(),
                cfg.sources.openweather_base_url.clone(),
            )),
            traffic: Arc::new(TrafficSource::new(
                client,
                cfg.sources.graphhopper_api_key.clone(),
                cfg.sources.graphhopper_base_url.clone(),
            )),
            air_quality: Arc::new(AirQualitySource::new()),
            safety: Arc::new(SafetySource::new()),
        }
    }

    /// Run all adapters concurrently. Any failure fails the whole stage.
    pub async fn extract(&self, city: &str) -> Result<RawSignals, SourceError> {
        ensure_metrics_described();
        let (weather, traffic, air_quality, safety) = tokio::try_join!(
            fetch_logged(self.weather.as_ref(), city),
            fetch_logged(self.traffic.as_ref(), city),
            fetch_logged(self.air_quality.as_ref(), city),
            fetch_logged(self.safety.as_ref(), city),
        )?;
        Ok(RawSignals {
            weather,
            traffic,
            air_quality,
            safety,
        })
    }
}

async fn fetch_logged<T>(source: &dyn SignalSource<T>, city: &str) -> Result<T, SourceError> {
    match source.fetch(city).await {
        Ok(v) => {
            tracing::debug!(source = source.name(), city, "source fetched");
            Ok(v)
        }
        Err(e) => {
            tracing::warn!(error = %e, source = source.name(), city, "source error");
            counter!("source_errors_total", "source" => source.name()).increment(1);
            Err(e)
        }
    }
}
