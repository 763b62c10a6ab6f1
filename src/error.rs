//! Error taxonomy shared by adapters, pipeline, predictor and the HTTP layer.
//!
//! Adapter and transform errors propagate to the request boundary where
//! [`ApiError`] maps them to a status code and a `{"detail": ...}` body.
//! Predictor problems never leave the predictor (see `predictor.rs`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failure of a data source adapter.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The city could not be resolved by the upstream service.
    #[error("city '{city}' not found")]
    NotFound { city: String },
    /// Missing or rejected credential.
    #[error("configuration error: {0}")]
    Config(String),
    /// Transport error or unexpected upstream response.
    #[error("upstream {source_name} failed: {message}")]
    Upstream {
        source_name: &'static str,
        message: String,
    },
}

impl SourceError {
    pub fn upstream(source_name: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            source_name,
            message: message.into(),
        }
    }
}

/// Malformed intermediate data detected at the transform boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("field '{field}' is not a finite number")]
    NonFinite { field: &'static str },
    #[error("field '{field}' out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Failure of one pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid city name: '{0}'")]
    InvalidCity(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),
}

/// Problems loading or running the regression model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("reading model {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding model: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("model expects features {expected:?}, found {found:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("row has {got} features, model expects {expected}")]
    RowWidth { got: usize, expected: usize },
    #[error("model produced no usable output")]
    EmptyOutput,
    #[error("invalid model artifact: {0}")]
    InvalidArtifact(String),
    #[error("model is not trained")]
    Untrained,
}

/// Offline training failures.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("reading dataset: {0}")]
    Csv(#[from] csv::Error),
    #[error("reading processed records: {0:#}")]
    Records(anyhow::Error),
    #[error("dataset is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("dataset has no rows")]
    EmptyDataset,
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("model path must not be empty")]
    EmptyModelPath,
    #[error("model path {0} is a directory")]
    ModelPathIsDir(String),
    #[error("model required but not loadable: {0}")]
    ModelRequired(String),
    #[error("{key} has invalid value '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Error returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(PipelineError::InvalidCity(_)) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(PipelineError::Source(e)) | ApiError::Source(e) => source_status(e),
            ApiError::Pipeline(PipelineError::Transform(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

fn source_status(e: &SourceError) -> StatusCode {
    match e {
        SourceError::NotFound { .. } => StatusCode::NOT_FOUND,
        SourceError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SourceError::Upstream { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = Json(json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}
