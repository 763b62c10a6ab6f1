// src/trainer.rs
//! Offline training of the IQV regressor.
//!
//! Reads a CSV with `temperature, humidity, traffic_delay, day_of_week,
//! month, iqv_overall`, derives the same features the predictor uses, fits
//! a random forest on an 80/20 split and writes a [`ModelArtifact`].
//!
//! Training tables come from the synthetic generator or from persisted
//! pipeline records via [`consolidate`].

use std::io::Read;
use std::path::Path;

use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::TrainError;
use crate::features::FeatureRecord;
use crate::forest::{ForestParams, RandomForest};
use crate::pipeline::ProcessedRecord;
use crate::predictor::ModelArtifact;
use crate::store::FileStore;

pub const REQUIRED_COLUMNS: [&str; 6] = [
    "temperature",
    "humidity",
    "traffic_delay",
    "day_of_week",
    "month",
    "iqv_overall",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub temperature: f64,
    pub humidity: f64,
    pub traffic_delay: f64,
    pub day_of_week: u32,
    pub month: u32,
    pub iqv_overall: f64,
}

impl TrainingRow {
    pub fn features(&self) -> FeatureRecord {
        FeatureRecord::new(
            self.temperature,
            self.humidity,
            self.traffic_delay,
            self.day_of_week,
            self.month,
        )
    }
}

pub fn read_dataset(path: &Path) -> Result<Vec<TrainingRow>, TrainError> {
    read_dataset_from(csv::Reader::from_path(path)?)
}

/// Rows from any CSV reader. Extra columns are ignored.
pub fn read_dataset_from<R: Read>(mut rdr: csv::Reader<R>) -> Result<Vec<TrainingRow>, TrainError> {
    let headers = rdr.headers()?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !headers.iter().any(|h| h.trim() == **c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(TrainError::MissingColumns(missing));
    }
    let rows = rdr
        .deserialize::<TrainingRow>()
        .collect::<Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        return Err(TrainError::EmptyDataset);
    }
    Ok(rows)
}

pub fn write_dataset(path: &Path, rows: &[TrainingRow]) -> Result<(), TrainError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| TrainError::Io {
            path: dir.display().to_string(),
            source,
        })?;
    }
    let mut w = csv::Writer::from_path(path)?;
    for r in rows {
        w.serialize(r)?;
    }
    w.flush().map_err(|source| TrainError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub forest: ForestParams,
    pub test_fraction: f64,
    pub seed: u64,
    /// Inferred from the targets when `None`: 100 if any exceeds 10.
    pub target_scale: Option<f64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            forest: ForestParams::default(),
            test_fraction: 0.2,
            seed: 42,
            target_scale: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub artifact: ModelArtifact,
    pub n_train: usize,
    pub n_test: usize,
    /// Held-out RMSE on the target's own scale; `None` without a test split.
    pub test_rmse: Option<f64>,
    pub train_rmse: f64,
}

pub fn rmse(predicted: &[f64], actual: &[f64]) -> f64 {
    let n = predicted.len().min(actual.len());
    if n == 0 {
        return f64::NAN;
    }
    let sse: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a) * (p - a))
        .sum();
    (sse / n as f64).sqrt()
}

/// Shuffled `(train, test)` index sets; the train side is never empty.
pub fn split_indices(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_test = ((n as f64) * test_fraction.clamp(0.0, 1.0)).round() as usize;
    let n_test = n_test.min(n.saturating_sub(1));
    let test = idx.split_off(n - n_test);
    (idx, test)
}

fn design(rows: &[TrainingRow], idx: &[usize]) -> (Vec<Vec<f64>>, Vec<f64>) {
    idx.iter()
        .map(|&i| (rows[i].features().to_vector().to_vec(), rows[i].iqv_overall))
        .unzip()
}

pub fn train(rows: &[TrainingRow], cfg: &TrainConfig) -> Result<TrainReport, TrainError> {
    if rows.is_empty() {
        return Err(TrainError::EmptyDataset);
    }
    let (train_idx, test_idx) = split_indices(rows.len(), cfg.test_fraction, cfg.seed);
    let (x_train, y_train) = design(rows, &train_idx);
    let (x_test, y_test) = design(rows, &test_idx);

    tracing::info!(
        n_train = x_train.len(),
        n_test = x_test.len(),
        trees = cfg.forest.n_trees,
        "fitting random forest"
    );
    let forest = RandomForest::fit(&x_train, &y_train, cfg.forest.clone())?;

    let train_rmse = rmse(&forest.predict(&x_train)?, &y_train);
    let test_rmse = if x_test.is_empty() {
        None
    } else {
        Some(rmse(&forest.predict(&x_test)?, &y_test))
    };

    let target_scale = cfg.target_scale.unwrap_or_else(|| {
        if rows.iter().any(|r| r.iqv_overall > 10.0) {
            100.0
        } else {
            10.0
        }
    });
    let mut artifact = ModelArtifact::new(forest, target_scale, x_train.len());
    artifact.test_rmse = test_rmse;
    tracing::info!(?test_rmse, train_rmse, target_scale, "training finished");

    Ok(TrainReport {
        n_train: x_train.len(),
        n_test: x_test.len(),
        artifact,
        test_rmse,
        train_rmse,
    })
}

/// Standard normal via Box-Muller.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Ground truth of the synthetic data set, before noise.
pub fn synthetic_target(temperature: f64, humidity: f64, traffic_delay: f64) -> f64 {
    70.0 - 0.8 * (temperature - 22.0).abs()
        - 0.3 * (humidity - 50.0).abs()
        - 0.7 * traffic_delay
}

/// Target assigned to consolidated records, clamped to 0-100.
/// June to August earn a flat 10-point bonus.
pub fn consolidated_target(temperature: f64, humidity: f64, traffic_delay: f64, month: u32) -> f64 {
    let winter = if (6..=8).contains(&month) { 10.0 } else { 0.0 };
    (80.0 - 0.5 * (temperature - 22.0).abs() - 0.2 * (humidity - 50.0).abs()
        - 0.8 * traffic_delay
        + winter)
        .clamp(0.0, 100.0)
}

impl From<&ProcessedRecord> for TrainingRow {
    fn from(rec: &ProcessedRecord) -> Self {
        let f = &rec.features;
        Self {
            temperature: f.temperature,
            humidity: f.humidity,
            traffic_delay: f.traffic_delay,
            day_of_week: f.day_of_week,
            month: f.month,
            iqv_overall: consolidated_target(f.temperature, f.humidity, f.traffic_delay, f.month),
        }
    }
}

/// Training rows from the records persisted under `store`, oldest first.
/// `city` narrows to one city's files.
pub fn consolidate(store: &FileStore, city: Option<&str>) -> Result<Vec<TrainingRow>, TrainError> {
    let mut records = match city {
        Some(city) => store.list(city, usize::MAX),
        None => store.list_all(),
    }
    .map_err(TrainError::Records)?;
    if records.is_empty() {
        return Err(TrainError::EmptyDataset);
    }
    records.sort_by_key(|r| r.timestamp);
    tracing::info!(
        records = records.len(),
        dir = %store.dir().display(),
        "consolidated processed records"
    );
    Ok(records.iter().map(TrainingRow::from).collect())
}

#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub n: usize,
    pub seed: u64,
    /// Standard deviation of the additive target noise.
    pub noise_sd: f64,
    /// Last day of the two-year window.
    pub end: NaiveDate,
}

impl SyntheticSpec {
    pub fn new(end: NaiveDate) -> Self {
        Self {
            n: 2000,
            seed: 42,
            noise_sd: 3.0,
            end,
        }
    }
}

/// Plausible rows spread over two years ending at `spec.end`.
pub fn generate_synthetic(spec: &SyntheticSpec) -> Vec<TrainingRow> {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    (0..spec.n)
        .map(|_| {
            let date = spec.end - Duration::days(rng.random_range(0..730));
            let temperature = (25.0 + 10.0 * standard_normal(&mut rng)).clamp(-10.0, 50.0);
            let humidity = rng.random_range(20.0..95.0);
            let traffic_delay = (-8.0 * (1.0 - rng.random::<f64>()).ln()).clamp(0.0, 60.0);
            let noise = spec.noise_sd * standard_normal(&mut rng);
            let iqv = (synthetic_target(temperature, humidity, traffic_delay) + noise)
                .clamp(0.0, 100.0);
            TrainingRow {
                temperature,
                humidity,
                traffic_delay,
                day_of_week: date.weekday().num_days_from_monday(),
                month: date.month(),
                iqv_overall: iqv,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_are_named() {
        let data = "temperature,humidity,month\n20,50,3\n";
        let err = read_dataset_from(csv::Reader::from_reader(data.as_bytes())).unwrap_err();
        match err {
            TrainError::MissingColumns(cols) => {
                assert_eq!(cols, vec!["traffic_delay", "day_of_week", "iqv_overall"]);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn extra_columns_are_ignored() {
        let data = "city,temperature,humidity,traffic_delay,day_of_week,month,iqv_overall\n\
                    Recife,28.5,70,4.2,2,11,61.0\n";
        let rows = read_dataset_from(csv::Reader::from_reader(data.as_bytes())).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].month, 11);
        assert_eq!(rows[0].features().season, 4);
    }

    #[test]
    fn header_only_is_empty() {
        let data = "temperature,humidity,traffic_delay,day_of_week,month,iqv_overall\n";
        assert!(matches!(
            read_dataset_from(csv::Reader::from_reader(data.as_bytes())),
            Err(TrainError::EmptyDataset)
        ));
    }

    #[test]
    fn split_is_80_20_and_disjoint() {
        let (train, test) = split_indices(100, 0.2, 42);
        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);
        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
        assert_eq!(split_indices(100, 0.2, 42), (train, test));
        assert_eq!(split_indices(1, 0.2, 42).0.len(), 1);
    }

    #[test]
    fn consolidated_target_formula() {
        assert_eq!(consolidated_target(22.0, 50.0, 0.0, 3), 80.0);
        assert_eq!(consolidated_target(22.0, 50.0, 0.0, 7), 90.0);
        // 80 - 4 - 4 - 8
        assert!((consolidated_target(30.0, 70.0, 10.0, 11) - 64.0).abs() < 1e-9);
        assert_eq!(consolidated_target(22.0, 50.0, 200.0, 1), 0.0);
    }

    #[test]
    fn rmse_basics() {
        assert_eq!(rmse(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
        assert!((rmse(&[0.0, 0.0], &[3.0, 4.0]) - 12.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn synthetic_rows_respect_bounds() {
        let end = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let rows = generate_synthetic(&SyntheticSpec {
            n: 500,
            ..SyntheticSpec::new(end)
        });
        assert_eq!(rows.len(), 500);
        for r in &rows {
            assert!((-10.0..=50.0).contains(&r.temperature));
            assert!((20.0..95.0).contains(&r.humidity));
            assert!((0.0..=60.0).contains(&r.traffic_delay));
            assert!((0.0..=100.0).contains(&r.iqv_overall));
            assert!(r.day_of_week <= 6);
            assert!((1..=12).contains(&r.month));
        }
        let again = generate_synthetic(&SyntheticSpec {
            n: 500,
            ..SyntheticSpec::new(end)
        });
        assert_eq!(rows, again);
    }
}
