//! Route-based traffic delay from GraphHopper.
//!
//! Only cities with a known sample route are queried. Everything else,
//! and every failure, produces [`fallback_traffic`].

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SourceError;
use crate::sources::types::{SignalSource, TrafficLevel, TrafficRecord};

pub const DEFAULT_GRAPHHOPPER_BASE_URL: &str = "https://graphhopper.com/api/1";
pub const FALLBACK_DELAY_MIN: f64 = 15.0;
/// Free-flow reference speed used to derive the delay.
const BASE_SPEED_KMH: f64 = 30.0;

/// A sample route: (lat, lon) endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub origin_name: &'static str,
    pub destination_name: &'static str,
    pub origin: (f64, f64),
    pub destination: (f64, f64),
}

static ROUTES: &[(&str, Route)] = &[
    (
        "saopaulo",
        Route {
            origin_name: "Avenida Paulista",
            destination_name: "Aeroporto de Congonhas",
            origin: (-23.550520, -46.633308),
            destination: (-23.627778, -46.656389),
        },
    ),
    (
        "riodejaneiro",
        Route {
            origin_name: "Praia de Copacabana",
            destination_name: "Cristo Redentor",
            origin: (-22.986539, -43.1882714),
            destination: (-22.953173, -43.210322),
        },
    ),
];

/// Sample route for a city, ignoring case, spaces and underscores.
pub fn route_for(city: &str) -> Option<&'static Route> {
    let key = super::city_key(city);
    ROUTES.iter().find(|(k, _)| *k == key).map(|(_, r)| r)
}

pub fn fallback_traffic(reason: &str) -> TrafficRecord {
    TrafficRecord {
        traffic_delay: FALLBACK_DELAY_MIN,
        traffic_level: TrafficLevel::Moderado,
        route: None,
        distance_km: None,
        duration_min: None,
        simulated: Some(reason.to_string()),
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Delay over free-flow time, never negative.
pub fn delay_minutes(time_ms: f64, distance_m: f64) -> f64 {
    let duration_min = time_ms / 60_000.0;
    let base_min = (distance_m / 1000.0) / BASE_SPEED_KMH;
    (duration_min - base_min).max(0.0)
}

#[derive(Debug, Deserialize)]
struct RouteResp {
    #[serde(default)]
    paths: Vec<Path>,
}

#[derive(Debug, Deserialize)]
struct Path {
    #[serde(default)]
    time: f64,
    #[serde(default)]
    distance: f64,
}

pub struct TrafficSource {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl TrafficSource {
    pub fn new(client: reqwest::Client, api_key: Option<String>, base_url: String) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url,
        }
    }

    async fn fetch_route(&self, route: &Route, key: &str) -> Result<TrafficRecord, String> {
        let url = format!("{}/route", self.base_url.trim_end_matches('/'));
        let point = |(lat, lon): (f64, f64)| format!("{lat},{lon}");
        tracing::info!(
            origin = route.origin_name,
            destination = route.destination_name,
            "calling GraphHopper"
        );
        let resp = self
            .client
            .get(url)
            .query(&[
                ("point", point(route.origin)),
                ("point", point(route.destination)),
                ("vehicle", "car".to_string()),
                ("locale", "pt-BR".to_string()),
                ("instructions", "false".to_string()),
                ("calc_points", "false".to_string()),
                ("key", key.to_string()),
            ])
            .send()
            .await
            .map_err(|_| "connection error".to_string())?;
        if !resp.status().is_success() {
            tracing::error!(status = resp.status().as_u16(), "GraphHopper HTTP error");
            return Err("HTTP error".to_string());
        }
        let body: RouteResp = resp
            .json()
            .await
            .map_err(|_| "unexpected error".to_string())?;
        let path = body.paths.first().ok_or_else(|| "no route".to_string())?;

        let delay = delay_minutes(path.time, path.distance);
        Ok(TrafficRecord {
            traffic_delay: round2(delay),
            traffic_level: TrafficLevel::from_delay(delay),
            route: Some(format!("{} → {}", route.origin_name, route.destination_name)),
            distance_km: Some(round2(path.distance / 1000.0)),
            duration_min: Some(round2(path.time / 60_000.0)),
            simulated: None,
        })
    }
}

#[async_trait]
impl SignalSource<TrafficRecord> for TrafficSource {
    async fn fetch(&self, city: &str) -> Result<TrafficRecord, SourceError> {
        let Some(key) = self.api_key.as_deref() else {
            super::note_fallback("traffic", "missing API key");
            return Ok(fallback_traffic("missing API key"));
        };
        let Some(route) = route_for(city) else {
            super::note_fallback("traffic", "city not mapped");
            return Ok(fallback_traffic("city not mapped"));
        };
        match self.fetch_route(route, key).await {
            Ok(rec) => {
                tracing::info!(
                    city,
                    delay = rec.traffic_delay,
                    level = ?rec.traffic_level,
                    "traffic data fetched"
                );
                Ok(rec)
            }
            Err(reason) => {
                super::note_fallback("traffic", &reason);
                Ok(fallback_traffic(&reason))
            }
        }
    }

    fn name(&self) -> &'static str {
        "traffic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_match_loosely() {
        assert!(route_for("Sao Paulo").is_some());
        assert!(route_for("sao_paulo").is_some());
        assert!(route_for("RIO DE JANEIRO").is_some());
        assert!(route_for("Curitiba").is_none());
    }

    #[test]
    fn delay_is_clamped_at_zero() {
        // 10 km in 10 min is faster than free flow.
        assert_eq!(delay_minutes(600_000.0, 10_000.0), 0.0);
        // 15 km in 45 min: base 0.5 min, delay 44.5 min.
        assert!((delay_minutes(2_700_000.0, 15_000.0) - 44.5).abs() < 1e-9);
    }

    #[test]
    fn level_thresholds() {
        assert_eq!(TrafficLevel::from_delay(0.0), TrafficLevel::Leve);
        assert_eq!(TrafficLevel::from_delay(1.99), TrafficLevel::Leve);
        assert_eq!(TrafficLevel::from_delay(2.0), TrafficLevel::Moderado);
        assert_eq!(TrafficLevel::from_delay(7.99), TrafficLevel::Moderado);
        assert_eq!(TrafficLevel::from_delay(8.0), TrafficLevel::Intenso);
    }

    #[tokio::test]
    async fn missing_key_falls_back() {
        let src = TrafficSource::new(reqwest::Client::new(), None, "http://127.0.0.1:9".into());
        let rec = src.fetch("Sao Paulo").await.unwrap();
        assert_eq!(rec.traffic_delay, FALLBACK_DELAY_MIN);
        assert_eq!(rec.traffic_level, TrafficLevel::Moderado);
        assert_eq!(rec.simulated.as_deref(), Some("missing API key"));
    }

    #[tokio::test]
    async fn unmapped_city_falls_back() {
        let src = TrafficSource::new(
            reqwest::Client::new(),
            Some("k".into()),
            "http://127.0.0.1:9".into(),
        );
        let rec = src.fetch("Curitiba").await.unwrap();
        assert_eq!(rec.simulated.as_deref(), Some("city not mapped"));
    }
}
