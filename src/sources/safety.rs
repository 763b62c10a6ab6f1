use async_trait::async_trait;
use rand::Rng;

use crate::error::SourceError;
use crate::sources::types::{SafetyRecord, SignalSource};

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Crime rate derived from a safety index: `(10 - s) * 10`, one decimal.
pub fn crime_rate_for(safety_index: f64) -> f64 {
    round1((10.0 - safety_index) * 10.0)
}

/// Simulated safety index in [6.0, 8.5].
#[derive(Debug, Default, Clone)]
pub struct SafetySource {
    seed: Option<u64>,
}

impl SafetySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

#[async_trait]
impl SignalSource<SafetyRecord> for SafetySource {
    async fn fetch(&self, city: &str) -> Result<SafetyRecord, SourceError> {
        let mut rng = super::simulation_rng(self.seed, city);
        let safety_index = round1(rng.random_range(6.0..=8.5));
        tracing::info!(city, safety_index, "simulated safety");
        Ok(SafetyRecord {
            safety_index,
            crime_rate: crime_rate_for(safety_index),
        })
    }

    fn name(&self) -> &'static str {
        "safety"
    }
}
