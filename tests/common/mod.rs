// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

use city_sense::config::AppConfig;

/// Serve `router` on an ephemeral local port; returns its base URL.
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// 2025-03-01T00:00:00Z
pub const MARCH_1_UTC: i64 = 1_740_787_200;

fn forecast_item(dt: i64, temp: f64, tmin: f64, tmax: f64, humidity: f64, desc: &str) -> Value {
    json!({
        "dt": dt,
        "main": { "temp": temp, "temp_min": tmin, "temp_max": tmax, "humidity": humidity },
        "weather": [{ "description": desc }]
    })
}

/// Stand-in for OpenWeather (geocoding, current, forecast) and GraphHopper.
/// The city "Nowhere" is unknown to geocoding.
pub fn upstream() -> Router {
    Router::new()
        .route(
            "/geo/1.0/direct",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                if q.get("q").map(String::as_str) == Some("Nowhere") {
                    return Json(json!([]));
                }
                Json(json!([{ "name": "São Paulo", "lat": -23.55, "lon": -46.63, "country": "BR" }]))
            }),
        )
        .route(
            "/data/2.5/weather",
            get(|| async {
                Json(json!({
                    "main": { "temp": 36.5, "humidity": 90.0 },
                    "weather": [{ "description": "céu limpo" }]
                }))
            }),
        )
        .route(
            "/data/2.5/forecast",
            get(|| async {
                Json(json!({
                    "city": { "timezone": -10800 },
                    "list": [
                        // 2025-02-28 22:00 local
                        forecast_item(MARCH_1_UTC + 3_600, 20.0, 19.0, 21.0, 80.0, "chuva"),
                        // 2025-03-01 09:00 and 12:00 local
                        forecast_item(MARCH_1_UTC + 43_200, 24.0, 22.0, 25.0, 60.0, "nublado"),
                        forecast_item(MARCH_1_UTC + 54_000, 28.0, 26.0, 30.0, 50.0, "nublado"),
                        // 2025-03-02 09:00 local
                        forecast_item(MARCH_1_UTC + 86_400 + 43_200, 26.0, 25.0, 27.0, 55.0, "sol"),
                    ]
                }))
            }),
        )
        .route(
            "/route",
            get(|| async { Json(json!({ "paths": [{ "time": 2_700_000.0, "distance": 15_000.0 }] })) }),
        )
}

/// Upstream that fails every call with the given status.
pub fn failing_upstream(status: StatusCode) -> Router {
    Router::new().fallback(move || async move { (status, "nope") })
}

/// No API keys, model path inside `dir` (absent), records under `dir/data`.
pub fn offline_config(dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.environment = "test".to_string();
    cfg.model.path = dir.join("models").join("iqv_model.json");
    cfg.storage.data_dir = dir.join("data");
    cfg.sources.openweather_base_url = "http://127.0.0.1:9".to_string();
    cfg.sources.graphhopper_base_url = "http://127.0.0.1:9".to_string();
    cfg.sources.http_timeout_secs = 2;
    cfg
}

/// Keys set and both upstreams pointed at `base`.
pub fn online_config(dir: &Path, base: &str) -> AppConfig {
    let mut cfg = offline_config(dir);
    cfg.sources.openweather_api_key = Some("test-key".to_string());
    cfg.sources.graphhopper_api_key = Some("test-key".to_string());
    cfg.sources.openweather_base_url = base.to_string();
    cfg.sources.graphhopper_base_url = base.to_string();
    cfg
}
