//! City Sense: binary entrypoint.
//! Loads configuration, initializes logging and serves the Axum router.

use city_sense::{app, telemetry, AppConfig};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry);
    tracing::info!(
        environment = %config.environment,
        model = %config.model.path.display(),
        data_dir = %config.storage.data_dir.display(),
        weather_key = config.sources.openweather_api_key.is_some(),
        traffic_key = config.sources.graphhopper_api_key.is_some(),
        "starting City Sense"
    );

    let router = app(config)?;
    Ok(router.into())
}
