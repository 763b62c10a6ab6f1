// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod forest;
pub mod iqv;
pub mod metrics;
pub mod pipeline;
pub mod predictor;
pub mod scoring;
pub mod sources;
pub mod store;
pub mod telemetry;
pub mod trainer;

pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;

/// Full application router for `config`: state, routes, CORS and `/metrics`.
pub fn app(config: AppConfig) -> anyhow::Result<axum::Router> {
    let metrics = metrics::Metrics::init();
    let state = AppState::from_config(config)?;
    Ok(router(state, &metrics))
}
