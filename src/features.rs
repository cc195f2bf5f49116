//! Feature derivation
//!
//! This module derives the values the engine works on from raw daily rows:
//! - Sub-metric inputs for scoring (sleep hours, restorative share, efficiency, ...)
//! - Per-metric daily series for the pattern engine

use crate::normalizer::MergedDays;
use crate::types::{DailyRawMetrics, DailyValue, PatternMetric, SubMetricId, SubMetricValues};
use chrono::NaiveDate;

/// Feature deriver for sub-metric values and pattern series
pub struct FeatureDeriver;

impl FeatureDeriver {
    /// Derive sub-metric inputs from a (windowed) daily row. Missing inputs stay absent.
    pub fn derive(row: &DailyRawMetrics) -> SubMetricValues {
        let mut values = SubMetricValues::new();
        for id in SubMetricId::ALL {
            let value = match id {
                SubMetricId::SleepDuration => row.sleep_minutes.map(|m| m / 60.0),
                SubMetricId::RestorativeSleep => compute_restorative_share(row),
                SubMetricId::SleepEfficiency => compute_sleep_efficiency(row),
                SubMetricId::Steps => row.steps,
                SubMetricId::MovementMinutes => row.movement_minutes,
                SubMetricId::ActiveCalories => row.active_calories,
                SubMetricId::Hrv => row.hrv_rmssd_ms.or(row.hrv_sdnn_ms),
                SubMetricId::RestingHeartRate => row.resting_hr_bpm,
                SubMetricId::BreathingRate => row.breathing_rate,
            };
            if let Some(v) = value.filter(|v| v.is_finite()) {
                values.insert(id, v);
            }
        }
        values
    }

    /// Value of one pattern metric on one row
    pub fn project(row: &DailyRawMetrics, metric: PatternMetric) -> Option<f64> {
        let value = match metric {
            PatternMetric::SleepMinutes => row.sleep_minutes,
            PatternMetric::Steps => row.steps,
            PatternMetric::HrvMs => row.hrv_rmssd_ms.or(row.hrv_sdnn_ms),
            PatternMetric::RestingHr => row.resting_hr_bpm,
            PatternMetric::MovementMinutes => row.movement_minutes,
            PatternMetric::BreathingRate => row.breathing_rate,
        };
        value.filter(|v| v.is_finite())
    }

    /// Chronological series of one metric over `[start, end]`, missing days dropped
    pub fn series(
        days: &MergedDays,
        metric: PatternMetric,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<DailyValue> {
        if start > end {
            return Vec::new();
        }
        days.range(start..=end)
            .filter_map(|(date, row)| Self::project(row, metric).map(|v| DailyValue::new(*date, v)))
            .collect()
    }
}

/// Deep + REM share of total sleep, in percent
fn compute_restorative_share(row: &DailyRawMetrics) -> Option<f64> {
    match (row.deep_sleep_minutes, row.rem_sleep_minutes, row.sleep_minutes) {
        (Some(deep), Some(rem), Some(total)) if total > 0.0 => {
            Some(((deep + rem) * 100.0 / total).clamp(0.0, 100.0))
        }
        _ => None,
    }
}

/// Reported efficiency, or sleep / time in bed, in percent
fn compute_sleep_efficiency(row: &DailyRawMetrics) -> Option<f64> {
    if let Some(pct) = row.sleep_efficiency_pct {
        return Some(pct.clamp(0.0, 100.0));
    }
    match (row.sleep_minutes, row.time_in_bed_minutes) {
        (Some(sleep), Some(bed)) if bed > 0.0 => Some((sleep * 100.0 / bed).clamp(0.0, 100.0)),
        _ => None,
    }
}
