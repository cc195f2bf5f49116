//! Raw row normalization
//!
//! Merges same-day rows from several sources and builds the trailing-window row the
//! scorer consumes.
//! - Merge is a per-field max, so it is order-independent and idempotent
//! - Window averaging ignores missing values
//! - Fields still missing after averaging backfill from an older lookback

use crate::types::{DailyRawMetrics, RawField};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Trailing averaging window for scoring, in days (inclusive of the scoring day)
pub const DEFAULT_SCORING_WINDOW: i64 = 7;
/// Additional days searched for a backfill value
pub const DEFAULT_BACKFILL_LOOKBACK: i64 = 7;

/// Merged rows for one person, keyed by day
pub type MergedDays = BTreeMap<NaiveDate, DailyRawMetrics>;

/// Scoring input for one day plus the fields that came from backfill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowedMetrics {
    pub row: DailyRawMetrics,
    pub backfilled: Vec<RawField>,
    /// Days in the averaging window with at least one value
    pub days_with_data: usize,
}

/// Normalizer for merging and windowing daily rows
pub struct Normalizer;

impl Normalizer {
    /// Merge two rows of the same (person, day), taking the larger value of each field
    pub fn merge_pair(a: &DailyRawMetrics, b: &DailyRawMetrics) -> DailyRawMetrics {
        let mut merged = DailyRawMetrics::new(a.person_id.clone(), a.date);
        merged.source = merge_sources(&a.source, &b.source);
        for field in RawField::ALL {
            merged.set(field, max_opt(a.get(field), b.get(field)));
        }
        merged
    }

    /// Merge every row of one person into one row per day.
    ///
    /// Rows for other people are ignored; non-finite values are treated as missing.
    pub fn merge(person_id: &str, rows: &[DailyRawMetrics]) -> MergedDays {
        let mut days: MergedDays = BTreeMap::new();
        for row in rows.iter().filter(|r| r.person_id == person_id) {
            let cleaned = sanitize(row);
            match days.get(&row.date) {
                Some(existing) => {
                    let merged = Self::merge_pair(existing, &cleaned);
                    days.insert(row.date, merged);
                }
                None => {
                    days.insert(row.date, cleaned);
                }
            }
        }
        days
    }

    /// Build the scoring row for `date` from the trailing window with backfill
    pub fn window(
        days: &MergedDays,
        person_id: &str,
        date: NaiveDate,
        window_days: i64,
        backfill_days: i64,
    ) -> WindowedMetrics {
        let window_start = date - Duration::days(window_days.max(1) - 1);
        let backfill_start = window_start - Duration::days(backfill_days.max(0));

        let window: Vec<&DailyRawMetrics> = days.range(window_start..=date).map(|(_, r)| r).collect();
        let mut row = DailyRawMetrics::new(person_id, date);
        row.source = window
            .iter()
            .fold(String::new(), |acc, r| merge_sources(&acc, &r.source));
        if row.source.is_empty() {
            row.source = "unknown".to_string();
        }

        let mut backfilled = Vec::new();
        for field in RawField::ALL {
            let mut value = mean(window.iter().filter_map(|r| r.get(field)));
            if value.is_none() && backfill_days > 0 {
                value = days
                    .range(backfill_start..window_start)
                    .rev()
                    .find_map(|(_, r)| r.get(field));
                if value.is_some() {
                    backfilled.push(field);
                }
            }
            row.set(field, value);
        }

        WindowedMetrics {
            row,
            backfilled,
            days_with_data: window.iter().filter(|r| !r.is_empty()).count(),
        }
    }
}

fn sanitize(row: &DailyRawMetrics) -> DailyRawMetrics {
    let mut cleaned = row.clone();
    for field in RawField::ALL {
        cleaned.set(field, row.get(field).filter(|v| v.is_finite()));
    }
    cleaned
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Sorted, de-duplicated `+`-joined source list
fn merge_sources(a: &str, b: &str) -> String {
    let sources: BTreeSet<&str> = a
        .split('+')
        .chain(b.split('+'))
        .filter(|s| !s.is_empty())
        .collect();
    sources.into_iter().collect::<Vec<_>>().join("+")
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
