use std::sync::{Arc, PoisonError, RwLock};

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::iqv::{live_iqv, LiveIqv};
use crate::metrics::Metrics;
use crate::pipeline::{Pipeline, PipelineConfig, ProcessedRecord};
use crate::predictor::{Predictor, PredictorConfig};
use crate::sources::weather::{DailyForecast, WeatherClient};
use crate::sources::{http_client, is_plausible_city_name, normalize_city_name, Sources};
use crate::store::{FileStore, RecordSink};

const DEFAULT_HISTORY_LIMIT: usize = 10;
const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    sources: Sources,
    weather: WeatherClient,
    store: Arc<FileStore>,
    predictor_cfg: Arc<PredictorConfig>,
    predictor: Arc<RwLock<Arc<Predictor>>>,
}

impl AppState {
    /// Wire real adapters, the model and the record store from `config`.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let predictor_cfg = PredictorConfig::from_model_config(&config.model)?;
        let predictor = Predictor::load(&predictor_cfg)?;
        let client = http_client(config.sources.http_timeout())?;
        let sources = Sources::from_config(&config, client.clone());
        let weather = WeatherClient::new(
            client,
            config.sources.openweather_api_key.clone(),
            config.sources.openweather_base_url.clone(),
        );
        let store = FileStore::new(config.storage.data_dir.clone());
        Ok(Self::new(config, sources, weather, predictor_cfg, predictor, store))
    }

    pub fn new(
        config: AppConfig,
        sources: Sources,
        weather: WeatherClient,
        predictor_cfg: PredictorConfig,
        predictor: Predictor,
        store: FileStore,
    ) -> Self {
        Self {
            config: Arc::new(config),
            sources,
            weather,
            store: Arc::new(store),
            predictor_cfg: Arc::new(predictor_cfg),
            predictor: Arc::new(RwLock::new(Arc::new(predictor))),
        }
    }

    /// Current model; cheap to clone, never blocks on inference.
    pub fn predictor(&self) -> Arc<Predictor> {
        self.predictor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn pipeline(&self) -> Pipeline {
        let sink: Arc<dyn RecordSink> = self.store.clone();
        Pipeline::new(self.sources.clone(), self.predictor(), sink)
    }
}

pub fn router(state: AppState, metrics: &Metrics) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/predict/iqv", get(predict_iqv))
        .route("/api/iqv", get(current_iqv))
        .route("/api/forecast", get(forecast))
        .route("/api/history", get(history))
        .route("/api/admin/reload-model", post(admin_reload_model))
        .merge(metrics.router())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Deserialize)]
struct CityQuery {
    #[serde(default)]
    city: Option<String>,
}

#[derive(serde::Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Normalized, non-empty city from the query string.
fn require_city(city: Option<&str>) -> Result<String, ApiError> {
    let city = normalize_city_name(city.unwrap_or_default());
    if city.is_empty() {
        return Err(ApiError::BadRequest(
            "query parameter 'city' is required".to_string(),
        ));
    }
    if !is_plausible_city_name(&city) {
        return Err(ApiError::BadRequest(format!("invalid city name: '{city}'")));
    }
    Ok(city)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "City Sense API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/api/health",
            "/api/predict/iqv?city=",
            "/api/iqv?city=",
            "/api/forecast?city=",
            "/api/history?city=&limit=",
            "/api/admin/reload-model",
            "/metrics"
        ]
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Local::now().to_rfc3339(),
        "api_version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "model_loaded": state.predictor().is_loaded(),
    }))
}

async fn predict_iqv(
    State(state): State<AppState>,
    Query(q): Query<CityQuery>,
) -> Result<Json<ProcessedRecord>, ApiError> {
    let cfg = PipelineConfig::new(q.city.as_deref().unwrap_or_default())?;
    let record = state.pipeline().process(&cfg).await?;
    Ok(Json(record))
}

async fn current_iqv(
    State(state): State<AppState>,
    Query(q): Query<CityQuery>,
) -> Result<Json<LiveIqv>, ApiError> {
    let city = require_city(q.city.as_deref())?;
    let out = live_iqv(&state.weather, state.sources.traffic.as_ref(), &city).await?;
    Ok(Json(out))
}

#[derive(serde::Serialize)]
struct ForecastOut {
    city: String,
    forecast: Vec<DailyForecast>,
}

async fn forecast(
    State(state): State<AppState>,
    Query(q): Query<CityQuery>,
) -> Result<Json<ForecastOut>, ApiError> {
    let city = require_city(q.city.as_deref())?;
    let forecast = state.weather.forecast(&city).await?;
    Ok(Json(ForecastOut { city, forecast }))
}

#[derive(serde::Serialize)]
struct HistoryOut {
    city: String,
    count: usize,
    records: Vec<ProcessedRecord>,
}

async fn history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryOut>, ApiError> {
    let city = require_city(q.city.as_deref())?;
    let limit = q
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let records = state
        .store
        .list(&city, limit)
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;
    Ok(Json(HistoryOut {
        city,
        count: records.len(),
        records,
    }))
}

async fn admin_reload_model(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let fresh = Predictor::load(&state.predictor_cfg)
        .map_err(|e| ApiError::Internal(format!("reload failed: {e}")))?;
    let loaded = fresh.is_loaded();
    let reason = fresh.unloaded_reason().map(str::to_string);
    *state
        .predictor
        .write()
        .unwrap_or_else(PoisonError::into_inner) = Arc::new(fresh);
    tracing::info!(loaded, "model reloaded");
    Ok(Json(json!({
        "model_loaded": loaded,
        "reason": reason,
    })))
}
