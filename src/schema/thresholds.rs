//! Threshold configuration
//!
//! Per-metric deviation rules for the pattern engine. Each entry pairs a metric with a
//! pattern type and a list of rules combined with OR semantics.

use crate::error::ComputeError;
use crate::schema::ValidationError;
use crate::types::{BaselineComputation, PatternMetric, PatternType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Current threshold configuration version
pub const THRESHOLD_CONFIG_VERSION: &str = "vitality.thresholds.v1";

/// One deviation predicate. Percent values are fractions (`0.25` = 25%).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ThresholdRule {
    PercentDropAtLeast(f64),
    PercentRiseAtLeast(f64),
    AbsoluteDropAtLeast(f64),
    AbsoluteRiseAtLeast(f64),
}

impl ThresholdRule {
    pub fn value(&self) -> f64 {
        match self {
            ThresholdRule::PercentDropAtLeast(v)
            | ThresholdRule::PercentRiseAtLeast(v)
            | ThresholdRule::AbsoluteDropAtLeast(v)
            | ThresholdRule::AbsoluteRiseAtLeast(v) => *v,
        }
    }

    /// The pattern type this rule can detect
    pub fn pattern_type(&self) -> PatternType {
        match self {
            ThresholdRule::PercentDropAtLeast(_) | ThresholdRule::AbsoluteDropAtLeast(_) => {
                PatternType::DropVsBaseline
            }
            ThresholdRule::PercentRiseAtLeast(_) | ThresholdRule::AbsoluteRiseAtLeast(_) => {
                PatternType::RiseVsBaseline
            }
        }
    }

    /// Whether the rule fires for a baseline/recent pair
    pub fn matches(&self, computation: &BaselineComputation) -> bool {
        let delta = computation.recent_avg - computation.baseline_avg;
        match self {
            ThresholdRule::PercentDropAtLeast(p) => {
                computation.deviation().map_or(false, |dev| -dev >= *p)
            }
            ThresholdRule::PercentRiseAtLeast(p) => {
                computation.deviation().map_or(false, |dev| dev >= *p)
            }
            ThresholdRule::AbsoluteDropAtLeast(a) => -delta >= *a,
            ThresholdRule::AbsoluteRiseAtLeast(a) => delta >= *a,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ThresholdRule::PercentDropAtLeast(p) => format!("drop >= {:.0}%", p * 100.0),
            ThresholdRule::PercentRiseAtLeast(p) => format!("rise >= {:.0}%", p * 100.0),
            ThresholdRule::AbsoluteDropAtLeast(a) => format!("drop >= {}", a),
            ThresholdRule::AbsoluteRiseAtLeast(a) => format!("rise >= {}", a),
        }
    }
}

/// Rules for one (metric, pattern type) key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricThresholds {
    pub metric: PatternMetric,
    pub pattern_type: PatternType,
    pub rules: Vec<ThresholdRule>,
}

/// Versioned per-metric rule table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub version: String,
    pub metrics: Vec<MetricThresholds>,
}

impl ThresholdConfig {
    /// Parse and validate a threshold document
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: ThresholdConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = BTreeSet::new();
        for entry in &self.metrics {
            let key = format!("{}/{}", entry.metric.as_str(), entry.pattern_type.as_str());
            if !seen.insert((entry.metric, entry.pattern_type)) {
                return Err(ValidationError::Duplicate(key));
            }
            if entry.rules.is_empty() {
                return Err(ValidationError::Empty(format!("rules of {}", key)));
            }
            for rule in &entry.rules {
                let value = rule.value();
                let in_bounds = match rule {
                    ThresholdRule::PercentDropAtLeast(_) => value > 0.0 && value <= 1.0,
                    _ => value.is_finite() && value > 0.0,
                };
                if !in_bounds {
                    return Err(ValidationError::InvalidRule {
                        key: key.clone(),
                        reason: format!("{:?} has an out-of-range value", rule),
                    });
                }
                if rule.pattern_type() != entry.pattern_type {
                    return Err(ValidationError::InvalidRule {
                        key: key.clone(),
                        reason: format!("{:?} cannot detect {}", rule, entry.pattern_type.as_str()),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn rules_for(&self, metric: PatternMetric, pattern: PatternType) -> Option<&MetricThresholds> {
        self.metrics
            .iter()
            .find(|m| m.metric == metric && m.pattern_type == pattern)
    }

    /// Built-in rule table shipped with the engine
    pub fn builtin() -> Self {
        use ThresholdRule::*;

        let entry = |metric, pattern_type, rules: Vec<ThresholdRule>| MetricThresholds {
            metric,
            pattern_type,
            rules,
        };

        ThresholdConfig {
            version: THRESHOLD_CONFIG_VERSION.to_string(),
            metrics: vec![
                entry(
                    PatternMetric::SleepMinutes,
                    PatternType::DropVsBaseline,
                    vec![PercentDropAtLeast(0.20), AbsoluteDropAtLeast(90.0)],
                ),
                entry(
                    PatternMetric::Steps,
                    PatternType::DropVsBaseline,
                    vec![PercentDropAtLeast(0.40)],
                ),
                entry(
                    PatternMetric::HrvMs,
                    PatternType::DropVsBaseline,
                    vec![PercentDropAtLeast(0.20)],
                ),
                entry(
                    PatternMetric::RestingHr,
                    PatternType::RiseVsBaseline,
                    vec![AbsoluteRiseAtLeast(5.0), PercentRiseAtLeast(0.10)],
                ),
                entry(
                    PatternMetric::MovementMinutes,
                    PatternType::DropVsBaseline,
                    vec![PercentDropAtLeast(0.50)],
                ),
                entry(
                    PatternMetric::BreathingRate,
                    PatternType::RiseVsBaseline,
                    vec![AbsoluteRiseAtLeast(2.0)],
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn computation(baseline: f64, recent: f64) -> BaselineComputation {
        let d = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        BaselineComputation {
            baseline_avg: baseline,
            recent_avg: recent,
            baseline_days: 7,
            recent_days: 3,
            baseline_start: d,
            baseline_end: d,
            recent_start: d,
            recent_end: d,
        }
    }

    #[test]
    fn test_builtin_config_is_valid() {
        assert!(ThresholdConfig::builtin().validate().is_ok());
    }

    #[test]
    fn test_rule_json_shape() {
        let json = r#"{
            "version": "vitality.thresholds.v1",
            "metrics": [{
                "metric": "sleep_minutes",
                "pattern_type": "drop_vs_baseline",
                "rules": [{"kind": "percent_drop_at_least", "value": 0.25}]
            }]
        }"#;
        let config = ThresholdConfig::from_json(json).unwrap();
        let entry = config
            .rules_for(PatternMetric::SleepMinutes, PatternType::DropVsBaseline)
            .unwrap();
        assert_eq!(entry.rules, vec![ThresholdRule::PercentDropAtLeast(0.25)]);
    }

    #[test]
    fn test_percent_drop_boundary_fires() {
        let rule = ThresholdRule::PercentDropAtLeast(0.25);
        assert!(rule.matches(&computation(480.0, 360.0)));
        assert!(!rule.matches(&computation(480.0, 361.0)));
    }

    #[test]
    fn test_absolute_rise() {
        let rule = ThresholdRule::AbsoluteRiseAtLeast(5.0);
        assert!(rule.matches(&computation(58.0, 63.0)));
        assert!(!rule.matches(&computation(58.0, 62.0)));
    }

    #[test]
    fn test_percent_rules_ignore_zero_baseline() {
        assert!(!ThresholdRule::PercentRiseAtLeast(0.1).matches(&computation(0.0, 10.0)));
        assert!(ThresholdRule::AbsoluteRiseAtLeast(5.0).matches(&computation(0.0, 10.0)));
    }

    #[test]
    fn test_mismatched_rule_direction_rejected() {
        let config = ThresholdConfig {
            version: THRESHOLD_CONFIG_VERSION.to_string(),
            metrics: vec![MetricThresholds {
                metric: PatternMetric::RestingHr,
                pattern_type: PatternType::RiseVsBaseline,
                rules: vec![ThresholdRule::PercentDropAtLeast(0.1)],
            }],
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut config = ThresholdConfig::builtin();
        let first = config.metrics[0].clone();
        config.metrics.push(first);
        assert!(matches!(config.validate(), Err(ValidationError::Duplicate(_))));
    }

    #[test]
    fn test_percent_drop_above_one_rejected() {
        let mut config = ThresholdConfig::builtin();
        config.metrics[1].rules = vec![ThresholdRule::PercentDropAtLeast(1.5)];
        let err: ComputeError = config.validate().unwrap_err().into();
        assert!(err.to_string().starts_with("Invalid configuration"));
    }
}
