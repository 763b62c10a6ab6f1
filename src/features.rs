//! Feature derivation shared by the predictor and the trainer.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, TimeZone};
use serde::{Deserialize, Serialize};

/// Column order the regressor is trained and queried with.
pub const FEATURE_NAMES: [&str; 6] = [
    "temperature",
    "humidity",
    "traffic_delay",
    "temp_humidity_interaction",
    "is_weekend",
    "season",
];

pub const N_FEATURES: usize = FEATURE_NAMES.len();

/// Season code for a month (1-12): Dec-Feb 1, Mar-May 2, Jun-Aug 3, else 4.
pub fn season(month: u32) -> u8 {
    match month {
        12 | 1 | 2 => 1,
        3..=5 => 2,
        6..=8 => 3,
        _ => 4,
    }
}

/// Inputs of one prediction, with derived columns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub temperature: f64,
    pub humidity: f64,
    pub traffic_delay: f64,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u32,
    pub month: u32,
    pub temp_humidity_interaction: f64,
    pub is_weekend: bool,
    pub season: u8,
}

impl FeatureRecord {
    pub fn new(
        temperature: f64,
        humidity: f64,
        traffic_delay: f64,
        day_of_week: u32,
        month: u32,
    ) -> Self {
        Self {
            temperature,
            humidity,
            traffic_delay,
            day_of_week,
            month,
            temp_humidity_interaction: temperature * humidity,
            is_weekend: day_of_week >= 5,
            season: season(month),
        }
    }

    /// Calendar fields taken from `at`.
    pub fn at<Tz: TimeZone>(
        temperature: f64,
        humidity: f64,
        traffic_delay: f64,
        at: &DateTime<Tz>,
    ) -> Self {
        Self::new(
            temperature,
            humidity,
            traffic_delay,
            at.weekday().num_days_from_monday(),
            at.month(),
        )
    }

    /// Values in [`FEATURE_NAMES`] order.
    pub fn to_vector(&self) -> [f64; N_FEATURES] {
        [
            self.temperature,
            self.humidity,
            self.traffic_delay,
            self.temp_humidity_interaction,
            if self.is_weekend { 1.0 } else { 0.0 },
            f64::from(self.season),
        ]
    }
}

/// Vector from a loose name -> value map; absent names become 0.
///
/// Derived columns (`temp_humidity_interaction`, `is_weekend`, `season`) are
/// taken from the map as given and never recomputed from the raw ones. Build a
/// [`FeatureRecord`] when only raw readings are at hand.
pub fn vector_from_map(map: &HashMap<String, f64>) -> [f64; N_FEATURES] {
    FEATURE_NAMES.map(|name| map.get(name).copied().unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn season_table() {
        let got: Vec<u8> = (1..=12).map(season).collect();
        assert_eq!(got, vec![1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4, 1]);
    }

    #[test]
    fn derived_fields() {
        let f = FeatureRecord::new(20.0, 50.0, 3.0, 5, 7);
        assert_eq!(f.temp_humidity_interaction, 1000.0);
        assert!(f.is_weekend);
        assert_eq!(f.season, 3);
        assert_eq!(f.to_vector(), [20.0, 50.0, 3.0, 1000.0, 1.0, 3.0]);
        assert!(!FeatureRecord::new(20.0, 50.0, 3.0, 4, 7).is_weekend);
    }

    #[test]
    fn calendar_from_datetime() {
        // 2025-03-16 was a Sunday.
        let at = Utc.with_ymd_and_hms(2025, 3, 16, 12, 0, 0).unwrap();
        let f = FeatureRecord::at(25.0, 60.0, 0.0, &at);
        assert_eq!(f.day_of_week, 6);
        assert_eq!(f.month, 3);
        assert_eq!(f.season, 2);
    }

    #[test]
    fn map_defaults_missing_to_zero() {
        let mut m = HashMap::new();
        m.insert("humidity".to_string(), 40.0);
        m.insert("unrelated".to_string(), 99.0);
        assert_eq!(vector_from_map(&m), [0.0, 40.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn map_does_not_derive_interaction() {
        let m = HashMap::from([
            ("temperature".to_string(), 20.0),
            ("humidity".to_string(), 50.0),
        ]);
        assert_eq!(vector_from_map(&m)[3], 0.0);
    }
}
