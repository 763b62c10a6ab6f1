// src/config/mod.rs
//! Application configuration.
//!
//! Layering: built-in defaults, then an optional TOML file
//! (`$CITY_SENSE_CONFIG_PATH`, else `config/city_sense.toml`), then
//! environment overrides. `.env` is loaded first by [`AppConfig::load`].

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::sources::traffic::DEFAULT_GRAPHHOPPER_BASE_URL;
use crate::sources::weather::DEFAULT_OPENWEATHER_BASE_URL;

const ENV_CONFIG_PATH: &str = "CITY_SENSE_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config/city_sense.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub openweather_api_key: Option<String>,
    pub openweather_base_url: String,
    pub graphhopper_api_key: Option<String>,
    pub graphhopper_base_url: String,
    /// Per outbound call.
    pub http_timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            openweather_api_key: None,
            openweather_base_url: DEFAULT_OPENWEATHER_BASE_URL.to_string(),
            graphhopper_api_key: None,
            graphhopper_base_url: DEFAULT_GRAPHHOPPER_BASE_URL.to_string(),
            http_timeout_secs: 10,
        }
    }
}

impl SourcesConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    /// Refuse to start without a usable model.
    pub require: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/iqv_model.json"),
            require: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// development | test | production
    pub environment: String,
    pub sources: SourcesConfig,
    pub model: ModelConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            sources: SourcesConfig::default(),
            model: ModelConfig::default(),
            storage: StorageConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Full layering: `.env`, file, process environment.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::load_file_default()?;
        cfg.apply_env(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks that hold whichever layer a value came from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sources.http_timeout_secs",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing configuration TOML")
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// 1) $CITY_SENSE_CONFIG_PATH (must exist)
    /// 2) config/city_sense.toml
    /// 3) defaults
    fn load_file_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from_file(&pb);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from_file(&default);
        }
        Ok(Self::default())
    }

    /// Apply overrides from a variable lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("APP_ENV") {
            self.environment = v.to_lowercase();
        }
        if let Some(v) = get("OPENWEATHER_API_KEY") {
            self.sources.openweather_api_key = Some(v);
        }
        if let Some(v) = get("GRAPHHOPPER_API_KEY") {
            self.sources.graphhopper_api_key = Some(v);
        }
        if let Some(v) = get("CITY_SENSE_HTTP_TIMEOUT_SECS") {
            self.sources.http_timeout_secs = match v.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "CITY_SENSE_HTTP_TIMEOUT_SECS",
                        value: v,
                    })
                }
            };
        }
        if let Some(v) = get("CITY_SENSE_MODEL_PATH") {
            self.model.path = PathBuf::from(v);
        }
        if let Some(v) = get("CITY_SENSE_REQUIRE_MODEL") {
            self.model.require = parse_bool("CITY_SENSE_REQUIRE_MODEL", &v)?;
        }
        if let Some(v) = get("CITY_SENSE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("CITY_SENSE_LOG") {
            self.telemetry.log_filter = v;
        }
        if let Some(v) = get("CITY_SENSE_LOG_FORMAT") {
            self.telemetry.log_format = match v.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "pretty" => LogFormat::Text,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "CITY_SENSE_LOG_FORMAT",
                        value: v,
                    })
                }
            };
        }
        Ok(())
    }
}

fn parse_bool(key: &'static str, v: &str) -> Result<bool, ConfigError> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: v.to_string(),
        }),
    }
}
