//! Simulated air quality. Large metros draw a worse AQI band.

use async_trait::async_trait;
use rand::Rng;

use crate::error::SourceError;
use crate::sources::types::{AirQualityRecord, SignalSource};

const LARGE_CITIES: &[&str] = &["Sao Paulo", "Rio de Janeiro", "New York", "London", "Tokyo"];

pub fn is_large_city(city: &str) -> bool {
    let key = super::city_key(city);
    LARGE_CITIES.iter().any(|c| super::city_key(c) == key)
}

/// Pollutants flagged for a given AQI.
pub fn pollutants_for(aqi: u32) -> Vec<String> {
    if aqi > 70 {
        vec!["PM2.5".to_string(), "PM10".to_string()]
    } else if aqi > 50 {
        vec!["PM2.5".to_string()]
    } else {
        Vec::new()
    }
}

#[derive(Debug, Default, Clone)]
pub struct AirQualitySource {
    seed: Option<u64>,
}

impl AirQualitySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic output per city.
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

#[async_trait]
impl SignalSource<AirQualityRecord> for AirQualitySource {
    async fn fetch(&self, city: &str) -> Result<AirQualityRecord, SourceError> {
        let mut rng = super::simulation_rng(self.seed, city);
        let aqi = if is_large_city(city) {
            rng.random_range(50..=100)
        } else {
            rng.random_range(20..=50)
        };
        tracing::info!(city, aqi, "simulated air quality");
        Ok(AirQualityRecord {
            aqi,
            pollutants: pollutants_for(aqi),
        })
    }

    fn name(&self) -> &'static str {
        "air_quality"
    }
}
