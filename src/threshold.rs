//! Threshold rule evaluation
//!
//! Decides, from a baseline/recent comparison, whether a metric's configured deviation
//! rules fire on a given date. Missing history is a normal outcome, not an error.

use crate::baseline::{BaselineCalculator, Insufficiency};
use crate::schema::{MetricThresholds, ThresholdRule};
use crate::types::{BaselineComputation, DailyValue};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Why a pattern evaluated the way it did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternReason {
    RuleMatched { rule: ThresholdRule },
    BelowThreshold,
    InsufficientData { detail: Insufficiency },
}

/// Pattern state of one metric on one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEvaluation {
    pub date: NaiveDate,
    pub triggered: bool,
    pub reason: PatternReason,
    /// Relative deviation of recent vs. baseline, kept for audit
    pub deviation: Option<f64>,
    pub computation: Option<BaselineComputation>,
}

impl PatternEvaluation {
    /// A clean day: pattern false and deviation within `band` of baseline
    pub fn is_clean(&self, band: f64) -> bool {
        !self.triggered && self.deviation.map_or(false, |dev| dev.abs() <= band)
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self.reason, PatternReason::InsufficientData { .. })
    }
}

/// Evaluator for OR-combined threshold rules
pub struct ThresholdEvaluator;

impl ThresholdEvaluator {
    /// Evaluate rules against an already computed baseline
    pub fn evaluate(
        date: NaiveDate,
        baseline: Result<BaselineComputation, Insufficiency>,
        thresholds: &MetricThresholds,
    ) -> PatternEvaluation {
        let computation = match baseline {
            Ok(computation) => computation,
            Err(detail) => {
                return PatternEvaluation {
                    date,
                    triggered: false,
                    reason: PatternReason::InsufficientData { detail },
                    deviation: None,
                    computation: None,
                }
            }
        };

        let deviation = computation.deviation();
        let matched = thresholds
            .rules
            .iter()
            .find(|rule| rule.matches(&computation))
            .copied();

        PatternEvaluation {
            date,
            triggered: matched.is_some(),
            reason: match matched {
                Some(rule) => PatternReason::RuleMatched { rule },
                None => PatternReason::BelowThreshold,
            },
            deviation,
            computation: Some(computation),
        }
    }

    /// Compute the baseline for `date` from a series and evaluate the rules
    pub fn evaluate_series(
        calculator: &BaselineCalculator,
        series: &[DailyValue],
        date: NaiveDate,
        thresholds: &MetricThresholds,
    ) -> PatternEvaluation {
        Self::evaluate(date, calculator.compute(series, date), thresholds)
    }
}
