// src/pipeline.rs
//! Extract → transform → load, once per request.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, Local};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, TransformError};
use crate::features::FeatureRecord;
use crate::predictor::Predictor;
use crate::scoring::ScoreSet;
use crate::sources::types::RawSignals;
use crate::sources::{is_plausible_city_name, normalize_city_name, Sources};
use crate::store::RecordSink;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline runs started.");
        describe_counter!("pipeline_failures_total", "Pipeline runs that returned an error.");
        describe_histogram!("pipeline_duration_ms", "Wall time of a pipeline run.");
        describe_counter!(
            "records_persist_errors_total",
            "Processed records that could not be written."
        );
    });
}

/// Run parameters. The city is normalized, never empty and safe to use
/// in a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    city: String,
}

impl PipelineConfig {
    pub fn new(city: &str) -> Result<Self, PipelineError> {
        let city = normalize_city_name(city);
        if !is_plausible_city_name(&city) {
            return Err(PipelineError::InvalidCity(city));
        }
        Ok(Self { city })
    }

    pub fn city(&self) -> &str {
        &self.city
    }
}

/// One pipeline result, flattened on the wire and on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub city: String,
    #[serde(flatten)]
    pub features: FeatureRecord,
    pub aqi: u32,
    pub safety_index: f64,
    #[serde(flatten)]
    pub scores: ScoreSet,
    pub predicted_iqv: f64,
    pub timestamp: DateTime<FixedOffset>,
}

fn finite(field: &'static str, v: f64) -> Result<f64, TransformError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(TransformError::NonFinite { field })
    }
}

/// Reject raw signals the feature stage cannot use.
pub fn validate(raw: &RawSignals) -> Result<(), TransformError> {
    finite("temperature", raw.weather.temperature)?;
    let h = finite("humidity", raw.weather.humidity)?;
    if !(0.0..=100.0).contains(&h) {
        return Err(TransformError::OutOfRange {
            field: "humidity",
            value: h,
        });
    }
    let d = finite("traffic_delay", raw.traffic.traffic_delay)?;
    if d < 0.0 {
        return Err(TransformError::OutOfRange {
            field: "traffic_delay",
            value: d,
        });
    }
    finite("safety_index", raw.safety.safety_index)?;
    Ok(())
}

#[derive(Clone)]
pub struct Pipeline {
    sources: Sources,
    predictor: Arc<Predictor>,
    sink: Arc<dyn RecordSink>,
}

impl Pipeline {
    pub fn new(sources: Sources, predictor: Arc<Predictor>, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            sources,
            predictor,
            sink,
        }
    }

    pub async fn extract(&self, cfg: &PipelineConfig) -> Result<RawSignals, PipelineError> {
        Ok(self.sources.extract(cfg.city()).await?)
    }

    /// Features, scores and prediction for `raw`, stamped with local now.
    pub fn transform(
        &self,
        cfg: &PipelineConfig,
        raw: &RawSignals,
    ) -> Result<ProcessedRecord, TransformError> {
        self.transform_at(cfg, raw, Local::now().fixed_offset())
    }

    pub fn transform_at(
        &self,
        cfg: &PipelineConfig,
        raw: &RawSignals,
        at: DateTime<FixedOffset>,
    ) -> Result<ProcessedRecord, TransformError> {
        validate(raw)?;
        let features = FeatureRecord::at(
            raw.weather.temperature,
            raw.weather.humidity,
            raw.traffic.traffic_delay,
            &at,
        );
        let scores = ScoreSet::compute(
            features.temperature,
            features.humidity,
            features.traffic_delay,
        );
        let predicted_iqv = self.predictor.predict(&features);
        Ok(ProcessedRecord {
            city: cfg.city().to_string(),
            features,
            aqi: raw.air_quality.aqi,
            safety_index: raw.safety.safety_index,
            scores,
            predicted_iqv,
            timestamp: at,
        })
    }

    /// Best-effort persistence; the record is returned either way.
    pub async fn load(&self, record: ProcessedRecord) -> ProcessedRecord {
        match self.sink.store(&record).await {
            Ok(path) => tracing::info!(city = %record.city, file = %path.display(), "record saved"),
            Err(e) => {
                counter!("records_persist_errors_total").increment(1);
                tracing::error!(city = %record.city, error = ?e, "failed to persist record");
            }
        }
        record
    }

    pub async fn process(&self, cfg: &PipelineConfig) -> Result<ProcessedRecord, PipelineError> {
        ensure_metrics_described();
        counter!("pipeline_runs_total").increment(1);
        let started = Instant::now();
        tracing::info!(city = cfg.city(), "pipeline started");

        let result = async {
            let raw = self.extract(cfg).await?;
            let record = self.transform(cfg, &raw)?;
            Ok::<_, PipelineError>(self.load(record).await)
        }
        .await;

        histogram!("pipeline_duration_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        match &result {
            Ok(rec) => tracing::info!(
                city = cfg.city(),
                predicted_iqv = rec.predicted_iqv,
                "pipeline finished"
            ),
            Err(e) => {
                counter!("pipeline_failures_total").increment(1);
                tracing::error!(city = cfg.city(), error = %e, "pipeline failed");
            }
        }
        result
    }
}
