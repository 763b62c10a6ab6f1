// src/iqv.rs
//! Live IQV: current weather + traffic, scored with the fixed formulas and
//! annotated with weather alerts.

use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::scoring::IqvBreakdown;
use crate::sources::types::{SignalSource, TrafficRecord};
use crate::sources::weather::WeatherClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Heat,
    Cold,
    Humidity,
    Traffic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
}

/// Alerts for the given conditions, in heat/cold/humidity/traffic order.
pub fn weather_alerts(temperature: f64, humidity: f64, traffic_delay: f64) -> Vec<Alert> {
    let mut alerts = Vec::new();
    if temperature > 35.0 {
        alerts.push(Alert {
            kind: AlertKind::Heat,
            severity: Severity::High,
            message: format!("Extreme heat: {temperature}°C, avoid sun exposure"),
        });
    }
    if temperature < 5.0 {
        alerts.push(Alert {
            kind: AlertKind::Cold,
            severity: Severity::High,
            message: format!("Extreme cold: {temperature}°C, dress warmly"),
        });
    }
    if humidity > 85.0 {
        alerts.push(Alert {
            kind: AlertKind::Humidity,
            severity: Severity::Medium,
            message: format!("High humidity ({humidity}%), watch for mold"),
        });
    }
    if traffic_delay > 20.0 {
        alerts.push(Alert {
            kind: AlertKind::Traffic,
            severity: Severity::Medium,
            message: format!("Heavy traffic: {traffic_delay} minutes of expected delay"),
        });
    }
    alerts
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveIqv {
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub description: String,
    pub avg_traffic_delay_min: f64,
    #[serde(flatten)]
    pub breakdown: IqvBreakdown,
    pub alerts: Vec<Alert>,
    pub updated_at: String,
}

/// Weather errors propagate; traffic degrades to its fallback inside the adapter.
pub async fn live_iqv(
    weather: &WeatherClient,
    traffic: &dyn SignalSource<TrafficRecord>,
    city: &str,
) -> Result<LiveIqv, SourceError> {
    let (current, traffic) = tokio::try_join!(weather.current(city), traffic.fetch(city))?;
    let delay = traffic.traffic_delay;
    let breakdown = IqvBreakdown::compute(current.temperature, current.humidity, delay);
    tracing::info!(city, iqv = breakdown.iqv_overall, "live IQV computed");
    Ok(LiveIqv {
        alerts: weather_alerts(current.temperature, current.humidity, delay),
        city: current.city,
        country: current.country,
        latitude: current.latitude,
        longitude: current.longitude,
        temperature: current.temperature,
        humidity: current.humidity,
        description: current.description,
        avg_traffic_delay_min: delay,
        breakdown,
        updated_at: current.updated_at,
    })
}
