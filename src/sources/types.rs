// src/sources/types.rs
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Current conditions as consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub temperature: f64, // °C
    pub humidity: f64,    // %
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLevel {
    Leve,
    Moderado,
    Intenso,
}

impl TrafficLevel {
    /// Level for a delay in minutes.
    pub fn from_delay(delay_min: f64) -> Self {
        if delay_min < 2.0 {
            TrafficLevel::Leve
        } else if delay_min < 8.0 {
            TrafficLevel::Moderado
        } else {
            TrafficLevel::Intenso
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub traffic_delay: f64, // minutes
    pub traffic_level: TrafficLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<f64>,
    /// Set when the record is simulated; holds the reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityRecord {
    pub aqi: u32,
    pub pollutants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyRecord {
    pub safety_index: f64,
    pub crime_rate: f64,
}

/// Output of the extract stage: one record per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignals {
    pub weather: WeatherRecord,
    pub traffic: TrafficRecord,
    pub air_quality: AirQualityRecord,
    pub safety: SafetyRecord,
}

/// One category of raw signal for a (normalized) city name.
#[async_trait::async_trait]
pub trait SignalSource<T>: Send + Sync {
    async fn fetch(&self, city: &str) -> Result<T, SourceError>;
    fn name(&self) -> &'static str;
}
