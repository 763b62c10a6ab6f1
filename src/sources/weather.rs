//! OpenWeatherMap access.
//!
//! [`WeatherSource`] is the pipeline adapter and never fails: a missing key
//! or a failed call yields [`fallback_weather`]. [`WeatherClient`] backs the
//! live endpoints and reports typed errors (`NotFound`, `Config`, `Upstream`).

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::sources::types::{SignalSource, WeatherRecord};

pub const DEFAULT_OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org";
pub const FALLBACK_TEMPERATURE: f64 = 25.0;
pub const FALLBACK_HUMIDITY: f64 = 60.0;
const FORECAST_MAX_DAYS: usize = 7;

/// Simulated record used when real weather data is unavailable.
pub fn fallback_weather(reason: &str) -> WeatherRecord {
    WeatherRecord {
        temperature: FALLBACK_TEMPERATURE,
        humidity: FALLBACK_HUMIDITY,
        description: format!("Clear sky (simulated - {reason})"),
    }
}

// ---- OpenWeather response shapes (only the fields we read) ----

#[derive(Debug, Deserialize)]
struct Main {
    temp: f64,
    humidity: f64,
    #[serde(default)]
    temp_min: Option<f64>,
    #[serde(default)]
    temp_max: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct CurrentResp {
    main: Main,
    #[serde(default)]
    weather: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct GeoHit {
    lat: f64,
    lon: f64,
    #[serde(default)]
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResp {
    list: Vec<ForecastItem>,
    #[serde(default)]
    city: Option<ForecastCity>,
}

#[derive(Debug, Deserialize)]
struct ForecastCity {
    #[serde(default)]
    timezone: i32,
}

#[derive(Debug, Deserialize)]
struct ForecastItem {
    dt: i64,
    main: Main,
    #[serde(default)]
    weather: Vec<Condition>,
}

fn first_description(conds: &[Condition]) -> String {
    conds
        .first()
        .map(|c| c.description.clone())
        .unwrap_or_default()
}

// ---- Pipeline adapter ----

pub struct WeatherSource {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl WeatherSource {
    pub fn new(client: reqwest::Client, api_key: Option<String>, base_url: String) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url,
        }
    }

    async fn fetch_current(&self, city: &str, key: &str) -> Result<WeatherRecord, String> {
        let url = format!("{}/data/2.5/weather", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(url)
            .query(&[
                ("q", city),
                ("appid", key),
                ("units", "metric"),
                ("lang", "pt_br"),
            ])
            .send()
            .await
            .map_err(|_| "connection error".to_string())?;
        if !resp.status().is_success() {
            tracing::error!(city, status = resp.status().as_u16(), "weather HTTP error");
            return Err("HTTP error".to_string());
        }
        let body: CurrentResp = resp
            .json()
            .await
            .map_err(|_| "unexpected error".to_string())?;
        Ok(WeatherRecord {
            temperature: body.main.temp,
            humidity: body.main.humidity,
            description: first_description(&body.weather),
        })
    }
}

#[async_trait]
impl SignalSource<WeatherRecord> for WeatherSource {
    async fn fetch(&self, city: &str) -> Result<WeatherRecord, SourceError> {
        let Some(key) = self.api_key.as_deref() else {
            super::note_fallback("weather", "missing API key");
            return Ok(fallback_weather("missing API key"));
        };
        match self.fetch_current(city, key).await {
            Ok(rec) => {
                tracing::info!(city, "weather data fetched");
                Ok(rec)
            }
            Err(reason) => {
                super::note_fallback("weather", &reason);
                Ok(fallback_weather(&reason))
            }
        }
    }

    fn name(&self) -> &'static str {
        "weather"
    }
}

// ---- Live client ----

/// Current conditions with location, as served by `/api/iqv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub description: String,
    pub updated_at: String,
}

/// One aggregated forecast day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyForecast {
    pub date: String,
    pub temperature: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub description: String,
    pub humidity: f64,
}

/// Three-hourly forecast sample before aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastEntry {
    pub at: DateTime<Utc>,
    pub temperature: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity: f64,
    pub description: String,
}

#[derive(Clone)]
pub struct WeatherClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl WeatherClient {
    pub fn new(client: reqwest::Client, api_key: Option<String>, base_url: String) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url,
        }
    }

    fn key(&self) -> Result<&str, SourceError> {
        self.api_key.as_deref().ok_or_else(|| {
            tracing::error!("OPENWEATHER_API_KEY is not set");
            SourceError::Config("OPENWEATHER_API_KEY is not set".into())
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        city: &str,
    ) -> Result<T, SourceError> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::upstream("openweather", e.to_string()))?;
        match resp.status() {
            s if s.is_success() => resp
                .json::<T>()
                .await
                .map_err(|e| SourceError::upstream("openweather", e.to_string())),
            StatusCode::UNAUTHORIZED => {
                Err(SourceError::Config("invalid OpenWeather API key".into()))
            }
            StatusCode::NOT_FOUND => Err(SourceError::NotFound {
                city: city.to_string(),
            }),
            s => Err(SourceError::upstream(
                "openweather",
                format!("HTTP {}", s.as_u16()),
            )),
        }
    }

    async fn geocode(&self, city: &str) -> Result<GeoHit, SourceError> {
        let key = self.key()?;
        let hits: Vec<GeoHit> = self
            .get_json(
                "/geo/1.0/direct",
                &[
                    ("q", city.to_string()),
                    ("limit", "1".to_string()),
                    ("appid", key.to_string()),
                ],
                city,
            )
            .await?;
        hits.into_iter().next().ok_or_else(|| {
            tracing::warn!(city, "city not found by geocoding");
            SourceError::NotFound {
                city: city.to_string(),
            }
        })
    }

    pub async fn current(&self, city: &str) -> Result<CurrentWeather, SourceError> {
        let geo = self.geocode(city).await?;
        let key = self.key()?;
        let body: CurrentResp = self
            .get_json(
                "/data/2.5/weather",
                &[
                    ("lat", geo.lat.to_string()),
                    ("lon", geo.lon.to_string()),
                    ("appid", key.to_string()),
                    ("units", "metric".to_string()),
                ],
                city,
            )
            .await?;
        Ok(CurrentWeather {
            city: city.to_string(),
            country: geo.country.unwrap_or_else(|| "N/A".to_string()),
            latitude: geo.lat,
            longitude: geo.lon,
            temperature: body.main.temp,
            humidity: body.main.humidity,
            description: first_description(&body.weather),
            updated_at: chrono::Local::now().to_rfc3339(),
        })
    }

    pub async fn forecast(&self, city: &str) -> Result<Vec<DailyForecast>, SourceError> {
        let geo = self.geocode(city).await?;
        let key = self.key()?;
        let body: ForecastResp = self
            .get_json(
                "/data/2.5/forecast",
                &[
                    ("lat", geo.lat.to_string()),
                    ("lon", geo.lon.to_string()),
                    ("appid", key.to_string()),
                    ("units", "metric".to_string()),
                ],
                city,
            )
            .await?;
        let offset_secs = body.city.map(|c| c.timezone).unwrap_or(0);
        let offset = FixedOffset::east_opt(offset_secs).unwrap_or_else(|| Utc.fix());
        let entries = body
            .list
            .into_iter()
            .filter_map(|it| {
                let at = DateTime::<Utc>::from_timestamp(it.dt, 0)?;
                Some(ForecastEntry {
                    at,
                    temperature: it.main.temp,
                    temp_min: it.main.temp_min.unwrap_or(it.main.temp),
                    temp_max: it.main.temp_max.unwrap_or(it.main.temp),
                    humidity: it.main.humidity,
                    description: first_description(&it.weather),
                })
            })
            .collect::<Vec<_>>();
        Ok(aggregate_daily(&entries, offset))
    }
}

/// Group samples by local date (first-seen order) and summarize each day.
/// At most seven days are returned.
pub fn aggregate_daily(entries: &[ForecastEntry], offset: FixedOffset) -> Vec<DailyForecast> {
    let mut days: Vec<(String, Vec<&ForecastEntry>)> = Vec::new();
    for e in entries {
        let date = e.at.with_timezone(&offset).format("%Y-%m-%d").to_string();
        match days.iter_mut().find(|(d, _)| *d == date) {
            Some((_, v)) => v.push(e),
            None => days.push((date, vec![e])),
        }
    }

    days.into_iter()
        .take(FORECAST_MAX_DAYS)
        .map(|(date, items)| {
            let n = items.len() as f64;
            let temperature = items.iter().map(|e| e.temperature).sum::<f64>() / n;
            let humidity = items.iter().map(|e| e.humidity).sum::<f64>() / n;
            let min_temperature = items
                .iter()
                .map(|e| e.temp_min)
                .fold(f64::INFINITY, f64::min);
            let max_temperature = items
                .iter()
                .map(|e| e.temp_max)
                .fold(f64::NEG_INFINITY, f64::max);
            DailyForecast {
                date,
                temperature,
                min_temperature,
                max_temperature,
                description: most_common(items.iter().map(|e| e.description.as_str())),
                humidity,
            }
        })
        .collect()
}

/// Most frequent value; the earliest one wins ties.
fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for v in values {
        match counts.iter_mut().find(|(s, _)| *s == v) {
            Some((_, n)) => *n += 1,
            None => counts.push((v, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (s, n) in counts {
        match best {
            Some((_, b)) if n <= b => {}
            _ => best = Some((s, n)),
        }
    }
    best.map(|(s, _)| s.to_string()).unwrap_or_default()
}
