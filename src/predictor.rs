// src/predictor.rs
//! IQV predictor backed by a serialized random forest.
//!
//! Two states: `Loaded` and `Unloaded`. Inference never fails from the
//! caller's point of view: an unloaded model or any inference problem is
//! logged and answered with [`FALLBACK_PREDICTION`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::{ConfigError, ModelError};
use crate::features::{vector_from_map, FeatureRecord, FEATURE_NAMES, N_FEATURES};
use crate::forest::RandomForest;

pub const FALLBACK_PREDICTION: f64 = 7.5;
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "predictor_fallbacks_total",
            "Predictions answered with the fallback value."
        );
        describe_gauge!("model_loaded", "1 when a model artifact is loaded.");
    });
}

/// On-disk model: the forest plus what is needed to query it safely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub feature_names: Vec<String>,
    /// Scale of the training target (10 or 100). Outputs are mapped to 0-10.
    pub target_scale: f64,
    pub trained_at: String,
    #[serde(default)]
    pub test_rmse: Option<f64>,
    pub n_train: usize,
    pub forest: RandomForest,
}

impl ModelArtifact {
    pub fn new(forest: RandomForest, target_scale: f64, n_train: usize) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            target_scale,
            trained_at: chrono::Utc::now().to_rfc3339(),
            test_rmse: None,
            n_train,
            forest,
        }
    }

    pub fn read(path: &Path) -> Result<Self, ModelError> {
        let data = fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let artifact: ModelArtifact = serde_json::from_str(&data)?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Write as JSON, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<(), ModelError> {
        let io = |source| ModelError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io)?;
        }
        let json = serde_json::to_string(self)?;
        fs::write(path, json).map_err(io)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.feature_names.iter().map(String::as_str).ne(FEATURE_NAMES) {
            return Err(ModelError::FeatureMismatch {
                expected: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                found: self.feature_names.clone(),
            });
        }
        if self.forest.n_features != N_FEATURES {
            return Err(ModelError::RowWidth {
                got: N_FEATURES,
                expected: self.forest.n_features,
            });
        }
        if !(self.target_scale.is_finite() && self.target_scale > 0.0) {
            return Err(ModelError::InvalidArtifact(format!(
                "target_scale must be positive, got {}",
                self.target_scale
            )));
        }
        self.forest.check()
    }
}

/// Where the model lives and whether startup needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorConfig {
    model_path: PathBuf,
    require_model: bool,
}

impl PredictorConfig {
    pub fn new(model_path: impl Into<PathBuf>, require_model: bool) -> Result<Self, ConfigError> {
        let model_path = model_path.into();
        if model_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyModelPath);
        }
        if model_path.is_dir() {
            return Err(ConfigError::ModelPathIsDir(model_path.display().to_string()));
        }
        Ok(Self {
            model_path,
            require_model,
        })
    }

    pub fn from_model_config(cfg: &ModelConfig) -> Result<Self, ConfigError> {
        Self::new(cfg.path.clone(), cfg.require)
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn require_model(&self) -> bool {
        self.require_model
    }
}

#[derive(Debug, Clone)]
enum State {
    Unloaded { reason: String },
    Loaded(Box<ModelArtifact>),
}

#[derive(Debug, Clone)]
pub struct Predictor {
    state: State,
}

impl Predictor {
    /// Load from the configured path. A missing or bad artifact leaves the
    /// predictor unloaded unless the config requires a model.
    pub fn load(cfg: &PredictorConfig) -> Result<Self, ConfigError> {
        ensure_metrics_described();
        let path = cfg.model_path();
        match ModelArtifact::read(path) {
            Ok(artifact) => {
                tracing::info!(
                    path = %path.display(),
                    trees = artifact.forest.n_trees(),
                    test_rmse = ?artifact.test_rmse,
                    "model loaded"
                );
                Ok(Self::loaded(artifact))
            }
            Err(e) if cfg.require_model() => {
                tracing::error!(path = %path.display(), error = %e, "required model not loadable");
                Err(ConfigError::ModelRequired(e.to_string()))
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "model not loaded; predictions will use the fallback value"
                );
                Ok(Self::unloaded(e.to_string()))
            }
        }
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelError> {
        artifact.validate()?;
        Ok(Self::loaded(artifact))
    }

    pub fn unloaded(reason: impl Into<String>) -> Self {
        ensure_metrics_described();
        gauge!("model_loaded").set(0.0);
        Self {
            state: State::Unloaded {
                reason: reason.into(),
            },
        }
    }

    fn loaded(artifact: ModelArtifact) -> Self {
        ensure_metrics_described();
        gauge!("model_loaded").set(1.0);
        Self {
            state: State::Loaded(Box::new(artifact)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, State::Loaded(_))
    }

    /// Why the model is not loaded, if it isn't.
    pub fn unloaded_reason(&self) -> Option<&str> {
        match &self.state {
            State::Unloaded { reason } => Some(reason),
            State::Loaded(_) => None,
        }
    }

    pub fn artifact(&self) -> Option<&ModelArtifact> {
        match &self.state {
            State::Loaded(a) => Some(a),
            State::Unloaded { .. } => None,
        }
    }

    pub fn predict(&self, features: &FeatureRecord) -> f64 {
        self.predict_vector(features.to_vector())
    }

    /// Loose variant: absent feature names count as 0 and derived columns are
    /// not recomputed (see [`vector_from_map`]).
    pub fn predict_map(&self, features: &HashMap<String, f64>) -> f64 {
        self.predict_vector(vector_from_map(features))
    }

    fn predict_vector(&self, row: [f64; N_FEATURES]) -> f64 {
        match self.try_predict(row) {
            Ok(v) => v,
            Err(e) => {
                counter!("predictor_fallbacks_total").increment(1);
                tracing::warn!(error = %e, "prediction fallback");
                FALLBACK_PREDICTION
            }
        }
    }

    /// Raw inference on the 0-10 scale.
    pub fn try_predict(&self, row: [f64; N_FEATURES]) -> Result<f64, ModelError> {
        let artifact = match &self.state {
            State::Loaded(a) => a,
            State::Unloaded { .. } => return Err(ModelError::Untrained),
        };
        let out = artifact.forest.predict(&[row.to_vec()])?;
        let raw = out.first().copied().ok_or(ModelError::EmptyOutput)?;
        if !raw.is_finite() {
            return Err(ModelError::EmptyOutput);
        }
        Ok(raw * 10.0 / artifact.target_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::ForestParams;

    fn tiny_artifact(target_scale: f64) -> ModelArtifact {
        let x: Vec<Vec<f64>> = (0..40)
            .map(|i| FeatureRecord::new(i as f64, 50.0, 0.0, 0, 6).to_vector().to_vec())
            .collect();
        let y: Vec<f64> = (0..40).map(|i| if i < 20 { 20.0 } else { 80.0 }).collect();
        let forest = RandomForest::fit(
            &x,
            &y,
            ForestParams {
                n_trees: 5,
                ..ForestParams::default()
            },
        )
        .unwrap();
        ModelArtifact::new(forest, target_scale, x.len())
    }

    #[test]
    fn config_rejects_empty_and_directory_paths() {
        assert_eq!(
            PredictorConfig::new("", false).unwrap_err(),
            ConfigError::EmptyModelPath
        );
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PredictorConfig::new(dir.path(), false),
            Err(ConfigError::ModelPathIsDir(_))
        ));
    }

    #[test]
    fn missing_model_is_unloaded_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PredictorConfig::new(dir.path().join("nope.json"), false).unwrap();
        let p = Predictor::load(&cfg).unwrap();
        assert!(!p.is_loaded());
        assert!(p.unloaded_reason().is_some());
        let f = FeatureRecord::new(25.0, 60.0, 15.0, 2, 3);
        assert_eq!(p.predict(&f), FALLBACK_PREDICTION);
        assert_eq!(p.predict_map(&HashMap::new()), FALLBACK_PREDICTION);
    }

    #[test]
    fn required_model_missing_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PredictorConfig::new(dir.path().join("nope.json"), true).unwrap();
        assert!(matches!(
            Predictor::load(&cfg),
            Err(ConfigError::ModelRequired(_))
        ));
    }

    #[test]
    fn garbage_file_is_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, "not json").unwrap();
        let p = Predictor::load(&PredictorConfig::new(&path, false).unwrap()).unwrap();
        assert!(!p.is_loaded());
    }

    #[test]
    fn loads_and_rescales_percent_targets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("iqv.json");
        tiny_artifact(100.0).write(&path).unwrap();

        let p = Predictor::load(&PredictorConfig::new(&path, true).unwrap()).unwrap();
        assert!(p.is_loaded());
        let low = p.predict(&FeatureRecord::new(5.0, 50.0, 0.0, 0, 6));
        let high = p.predict(&FeatureRecord::new(35.0, 50.0, 0.0, 0, 6));
        assert!((low - 2.0).abs() < 0.5, "{low}");
        assert!((high - 8.0).abs() < 0.5, "{high}");
    }

    #[test]
    fn feature_order_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let mut a = tiny_artifact(100.0);
        a.feature_names.swap(0, 1);
        a.write(&path).unwrap();

        let p = Predictor::load(&PredictorConfig::new(&path, false).unwrap()).unwrap();
        assert!(!p.is_loaded());
        assert!(p.unloaded_reason().unwrap().contains("features"));
        assert!(matches!(
            Predictor::from_artifact(a),
            Err(ModelError::FeatureMismatch { .. })
        ));
    }

    #[test]
    fn structurally_broken_forest_is_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let mut v = serde_json::to_value(tiny_artifact(10.0)).unwrap();
        let nodes = v["forest"]["trees"][0]["nodes"].as_array_mut().unwrap();
        let split = nodes
            .iter_mut()
            .find(|n| n["kind"] == "split")
            .expect("fitted tree has a split");
        split["feature"] = 99.into();
        fs::write(&path, v.to_string()).unwrap();

        let p = Predictor::load(&PredictorConfig::new(&path, false).unwrap()).unwrap();
        assert!(!p.is_loaded());
        let f = FeatureRecord::new(25.0, 60.0, 15.0, 2, 3);
        assert_eq!(p.predict(&f), FALLBACK_PREDICTION);

        let required = PredictorConfig::new(&path, true).unwrap();
        assert!(matches!(
            Predictor::load(&required),
            Err(ConfigError::ModelRequired(_))
        ));
    }

    #[test]
    fn non_finite_input_falls_back_or_stays_finite() {
        let p = Predictor::from_artifact(tiny_artifact(10.0)).unwrap();
        let v = p.predict_map(&HashMap::from([("temperature".to_string(), f64::NAN)]));
        assert!(v.is_finite());
    }
}
