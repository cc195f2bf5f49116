//! Baseline and recent window computation
//!
//! Compares a short, strict "recent" window against a longer, capped "baseline" pool of
//! the same person's history. The recent window must be calendar-consecutive and end on
//! the evaluation date; the baseline pool tolerates gaps.

use crate::types::{BaselineComputation, DailyValue};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum number of points on or before the evaluation date
pub const DEFAULT_MIN_POINTS: usize = 7;
/// Recent window length in days
pub const DEFAULT_RECENT_WINDOW: usize = 3;
/// Maximum number of baseline entries
pub const DEFAULT_BASELINE_CAP: usize = 21;
/// Minimum number of baseline entries
pub const DEFAULT_MIN_BASELINE_DAYS: usize = 4;

/// Why a baseline could not be computed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Insufficiency {
    TooFewPoints { have: usize, need: usize },
    RecentWindowNotCurrent { last: NaiveDate },
    RecentWindowGap { start: NaiveDate, end: NaiveDate },
    TooFewBaselineDays { have: usize, need: usize },
}

impl fmt::Display for Insufficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insufficiency::TooFewPoints { have, need } => {
                write!(f, "{} data points, need {}", have, need)
            }
            Insufficiency::RecentWindowNotCurrent { last } => {
                write!(f, "latest data point is {}", last)
            }
            Insufficiency::RecentWindowGap { start, end } => {
                write!(f, "recent window {}..{} is not consecutive", start, end)
            }
            Insufficiency::TooFewBaselineDays { have, need } => {
                write!(f, "{} baseline days, need {}", have, need)
            }
        }
    }
}

/// Baseline/recent window calculator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineCalculator {
    pub min_points: usize,
    pub recent_window: usize,
    pub baseline_cap: usize,
    pub min_baseline_days: usize,
}

impl Default for BaselineCalculator {
    fn default() -> Self {
        Self {
            min_points: DEFAULT_MIN_POINTS,
            recent_window: DEFAULT_RECENT_WINDOW,
            baseline_cap: DEFAULT_BASELINE_CAP,
            min_baseline_days: DEFAULT_MIN_BASELINE_DAYS,
        }
    }
}

impl BaselineCalculator {
    /// Compute baseline and recent averages as of `evaluation_date`
    pub fn compute(
        &self,
        values: &[DailyValue],
        evaluation_date: NaiveDate,
    ) -> Result<BaselineComputation, Insufficiency> {
        let mut history: Vec<DailyValue> = values
            .iter()
            .filter(|v| v.date <= evaluation_date && v.value.is_finite())
            .copied()
            .collect();
        history.sort_by_key(|v| v.date);
        history.dedup_by_key(|v| v.date);

        let need = self.min_points.max(self.recent_window).max(1);
        if history.len() < need {
            return Err(Insufficiency::TooFewPoints {
                have: history.len(),
                need,
            });
        }

        let recent = &history[history.len() - self.recent_window.max(1)..];
        let recent_start = recent[0].date;
        let recent_end = recent[recent.len() - 1].date;

        if recent_end != evaluation_date {
            return Err(Insufficiency::RecentWindowNotCurrent { last: recent_end });
        }
        let consecutive = recent
            .windows(2)
            .all(|pair| (pair[1].date - pair[0].date).num_days() == 1);
        if !consecutive {
            return Err(Insufficiency::RecentWindowGap {
                start: recent_start,
                end: recent_end,
            });
        }

        let pool: Vec<&DailyValue> = history.iter().filter(|v| v.date < recent_start).collect();
        let pool = &pool[pool.len().saturating_sub(self.baseline_cap)..];
        let need = self.min_baseline_days.max(1);
        if pool.len() < need {
            return Err(Insufficiency::TooFewBaselineDays {
                have: pool.len(),
                need,
            });
        }

        Ok(BaselineComputation {
            baseline_avg: average(pool.iter().map(|v| v.value)),
            recent_avg: average(recent.iter().map(|v| v.value)),
            baseline_days: pool.len(),
            recent_days: recent.len(),
            baseline_start: pool[0].date,
            baseline_end: pool[pool.len() - 1].date,
            recent_start,
            recent_end,
        })
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
