//! # Scoring
//! Pure sub-score formulas. Every function is total and deterministic:
//! no I/O, no hidden state, no randomness.
//!
//! All sub-scores live on a 0–10 scale, except [`trend_score`] which is
//! intentionally left unclamped.

use serde::{Deserialize, Serialize};

/// Temperature considered ideal (°C).
pub const IDEAL_TEMPERATURE: f64 = 22.5;
/// Relative humidity considered ideal (%).
pub const IDEAL_HUMIDITY: f64 = 50.0;

pub const W_TEMP: f64 = 0.3;
pub const W_HUMIDITY: f64 = 0.2;
pub const W_TRAFFIC: f64 = 0.3;
pub const W_TREND: f64 = 0.2;

fn clamp10(x: f64) -> f64 {
    x.clamp(0.0, 10.0)
}

/// `clamp(10 - |t - 22.5| / 2.5, 0, 10)`
pub fn temp_score(t: f64) -> f64 {
    clamp10(10.0 - (t - IDEAL_TEMPERATURE).abs() / 2.5)
}

/// `clamp(10 - |h - 50| / 5, 0, 10)`
pub fn humidity_score(h: f64) -> f64 {
    clamp10(10.0 - (h - IDEAL_HUMIDITY).abs() / 5.0)
}

/// Pipeline variant: plateau at 10 up to 40 %, 0 from 70 %, linear between.
pub fn humidity_score_piecewise(h: f64) -> f64 {
    if h <= 40.0 {
        10.0
    } else if h >= 70.0 {
        0.0
    } else {
        10.0 - (h - 40.0) * 10.0 / 30.0
    }
}

/// `clamp(10 - d / 3, 0, 10)`; `d` is the traffic delay in minutes.
pub fn traffic_score(d: f64) -> f64 {
    clamp10(10.0 - d / 3.0)
}

/// `5 + (22.5 - t) / 5`, not clamped.
pub fn trend_score(t: f64) -> f64 {
    5.0 + (IDEAL_TEMPERATURE - t) / 5.0
}

/// Temperature mapped linearly from [10, 40] °C onto [0, 10].
pub fn temp_normalized(t: f64) -> f64 {
    ((t - 10.0) / 30.0).clamp(0.0, 1.0) * 10.0
}

/// Weighted combination of the four sub-scores (weights sum to 1.0).
pub fn iqv_overall(temp: f64, humidity: f64, traffic: f64, trend: f64) -> f64 {
    W_TEMP * temp + W_HUMIDITY * humidity + W_TRAFFIC * traffic + W_TREND * trend
}

/// Sub-scores attached to every processed pipeline record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub temp_normalized: f64,
    pub humidity_score: f64,
    pub traffic_score: f64,
}

impl ScoreSet {
    pub fn compute(temperature: f64, humidity: f64, traffic_delay: f64) -> Self {
        Self {
            temp_normalized: temp_normalized(temperature),
            humidity_score: humidity_score_piecewise(humidity),
            traffic_score: traffic_score(traffic_delay),
        }
    }
}

/// Full breakdown used by the live `/api/iqv` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IqvBreakdown {
    pub iqv_climate: f64,
    pub iqv_humidity: f64,
    pub iqv_traffic: f64,
    pub iqv_trend: f64,
    pub iqv_overall: f64,
}

impl IqvBreakdown {
    pub fn compute(temperature: f64, humidity: f64, traffic_delay: f64) -> Self {
        let climate = temp_score(temperature);
        let hum = humidity_score(humidity);
        let traffic = traffic_score(traffic_delay);
        let trend = trend_score(temperature);
        Self {
            iqv_climate: climate,
            iqv_humidity: hum,
            iqv_traffic: traffic,
            iqv_trend: trend,
            iqv_overall: iqv_overall(climate, hum, traffic, trend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn sweep(from: f64, to: f64, step: f64) -> impl Iterator<Item = f64> {
        let n = ((to - from) / step) as usize;
        (0..=n).map(move |i| from + i as f64 * step)
    }

    #[test]
    fn temp_score_bounded_and_peaks_at_ideal() {
        assert_eq!(temp_score(22.5), 10.0);
        for t in sweep(-60.0, 80.0, 0.25) {
            let s = temp_score(t);
            assert!((0.0..=10.0).contains(&s), "t={t} -> {s}");
        }
        assert_eq!(temp_score(-40.0), 0.0);
        assert!((temp_score(25.0) - 9.0).abs() < EPS);
    }

    #[test]
    fn humidity_score_bounded_and_peaks_at_50() {
        assert_eq!(humidity_score(50.0), 10.0);
        for h in sweep(-20.0, 150.0, 0.5) {
            let s = humidity_score(h);
            assert!((0.0..=10.0).contains(&s), "h={h} -> {s}");
        }
        assert!((humidity_score(60.0) - 8.0).abs() < EPS);
    }

    #[test]
    fn humidity_piecewise_plateaus() {
        assert_eq!(humidity_score_piecewise(10.0), 10.0);
        assert_eq!(humidity_score_piecewise(40.0), 10.0);
        assert!((humidity_score_piecewise(55.0) - 5.0).abs() < EPS);
        assert_eq!(humidity_score_piecewise(70.0), 0.0);
        assert_eq!(humidity_score_piecewise(99.0), 0.0);
    }

    #[test]
    fn traffic_score_monotone_non_increasing() {
        let mut prev = traffic_score(0.0);
        assert_eq!(prev, 10.0);
        for d in sweep(0.0, 120.0, 0.5) {
            let s = traffic_score(d);
            assert!((0.0..=10.0).contains(&s));
            assert!(s <= prev + EPS, "d={d}: {s} > {prev}");
            prev = s;
        }
        assert_eq!(traffic_score(30.0), 0.0);
    }

    #[test]
    fn trend_score_is_not_clamped() {
        assert_eq!(trend_score(22.5), 5.0);
        assert!((trend_score(-40.0) - 17.5).abs() < EPS);
        assert!((trend_score(60.0) - (-2.5)).abs() < EPS);
    }

    #[test]
    fn weights_sum_to_one() {
        assert!((W_TEMP + W_HUMIDITY + W_TRAFFIC + W_TREND - 1.0).abs() < EPS);
    }

    #[test]
    fn overall_moves_with_each_sub_score() {
        let base = iqv_overall(5.0, 5.0, 5.0, 5.0);
        assert!(iqv_overall(6.0, 5.0, 5.0, 5.0) > base);
        assert!(iqv_overall(5.0, 4.0, 5.0, 5.0) < base);
        assert!(iqv_overall(5.0, 5.0, 7.0, 5.0) > base);
        // Trend beyond 10 still contributes linearly.
        let hot = iqv_overall(5.0, 5.0, 5.0, 15.0);
        assert!((hot - base - W_TREND * 10.0).abs() < EPS);
    }

    #[test]
    fn ideal_conditions_breakdown() {
        let b = IqvBreakdown::compute(22.5, 50.0, 0.0);
        assert_eq!(b.iqv_climate, 10.0);
        assert_eq!(b.iqv_humidity, 10.0);
        assert_eq!(b.iqv_traffic, 10.0);
        assert_eq!(b.iqv_trend, 5.0);
        assert!((b.iqv_overall - 9.0).abs() < EPS);
    }

    #[test]
    fn unclamped_trend_reaches_overall() {
        // Very cold: trend = 5 + 62.5/5 = 17.5, climate/humidity/traffic clamp to 0..10
        let b = IqvBreakdown::compute(-40.0, 50.0, 0.0);
        let expected = 0.3 * 0.0 + 0.2 * 10.0 + 0.3 * 10.0 + 0.2 * 17.5;
        assert!((b.iqv_overall - expected).abs() < EPS);
    }

    #[test]
    fn score_set_stays_in_range() {
        for t in sweep(-30.0, 60.0, 1.0) {
            let s = ScoreSet::compute(t, 55.0, 12.0);
            assert!((0.0..=10.0).contains(&s.temp_normalized));
        }
        let s = ScoreSet::compute(25.0, 60.0, 15.0);
        assert!((s.temp_normalized - 5.0).abs() < EPS);
        assert!((s.humidity_score - 10.0 / 3.0).abs() < EPS);
        assert!((s.traffic_score - 5.0).abs() < EPS);
    }
}
