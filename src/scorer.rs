//! Sub-metric scoring
//!
//! Maps one raw value onto a 0-100 integer score using a normalized [`MetricRange`] and a
//! [`ScoringDirection`]. Each band is a linear segment; the result is truncated, not
//! rounded.

use crate::schema::MetricRange;
use crate::types::ScoringDirection;

/// Scorer for individual sub-metrics
pub struct SubMetricScorer;

impl SubMetricScorer {
    /// Score a raw value. `None` in, `None` out: a missing value is never scored as 0.
    pub fn score(value: Option<f64>, range: &MetricRange, direction: ScoringDirection) -> Option<u8> {
        let value = value.filter(|v| v.is_finite())?;
        let range = range.normalized();
        let raw = match direction {
            ScoringDirection::OptimalRange => score_optimal_range(value, &range),
            ScoringDirection::HigherIsBetter => score_higher_is_better(value, &range),
            ScoringDirection::LowerIsBetter => score_lower_is_better(value, &range),
        };
        Some(truncate(raw))
    }
}

fn score_optimal_range(v: f64, r: &MetricRange) -> f64 {
    if v >= r.optimal_min && v <= r.optimal_max {
        return segment(v, r.optimal_min, r.optimal_max, 80.0, 100.0);
    }
    if v < r.optimal_min {
        if v >= r.acceptable_low_min {
            segment(v, r.acceptable_low_min, r.acceptable_low_max, 50.0, 80.0)
        } else if v > r.poor_low_max {
            segment(v, r.poor_low_max, r.acceptable_low_min, 0.0, 50.0)
        } else {
            0.0
        }
    } else if v <= r.acceptable_high_max {
        segment(v, r.acceptable_high_min, r.acceptable_high_max, 100.0, 80.0)
    } else if v < r.poor_high_min {
        segment(v, r.acceptable_high_max, r.poor_high_min, 50.0, 0.0)
    } else {
        0.0
    }
}

fn score_higher_is_better(v: f64, r: &MetricRange) -> f64 {
    if v >= r.optimal_max {
        100.0
    } else if v >= r.optimal_min {
        segment(v, r.optimal_min, r.optimal_max, 80.0, 100.0)
    } else if v >= r.acceptable_low_min {
        segment(v, r.acceptable_low_min, r.acceptable_low_max, 60.0, 80.0)
    } else if v > r.poor_low_max {
        segment(v, r.poor_low_max, r.acceptable_low_min, 0.0, 60.0)
    } else {
        0.0
    }
}

fn score_lower_is_better(v: f64, r: &MetricRange) -> f64 {
    if v <= r.optimal_min {
        100.0
    } else if v <= r.optimal_max {
        segment(v, r.optimal_min, r.optimal_max, 100.0, 80.0)
    } else if v <= r.acceptable_high_max {
        segment(v, r.acceptable_high_min, r.acceptable_high_max, 80.0, 60.0)
    } else if v < r.poor_high_min {
        segment(v, r.acceptable_high_max, r.poor_high_min, 60.0, 0.0)
    } else {
        0.0
    }
}

/// Linear interpolation across `[lo, hi]`. Values outside the band (gaps between
/// configured bands) take the nearest edge score; a zero-width band yields `to`.
fn segment(v: f64, lo: f64, hi: f64, from: f64, to: f64) -> f64 {
    if hi <= lo {
        return to;
    }
    let t = ((v - lo) / (hi - lo)).clamp(0.0, 1.0);
    from + (to - from) * t
}

fn truncate(score: f64) -> u8 {
    score.clamp(0.0, 100.0).trunc() as u8
}
