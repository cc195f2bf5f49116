//! Scoring schema definition
//!
//! Age-group buckets, pillars, sub-metrics and their per-age-group ranges. The schema is
//! an externally edited JSON document; it is validated once at load and rejected as a
//! whole if any structural rule is broken.

use crate::error::ComputeError;
use crate::schema::{ValidationError, WEIGHT_TOLERANCE};
use crate::types::{AgeGroup, PillarId, ScoringDirection, SubMetricId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Current scoring schema version
pub const SCORING_SCHEMA_VERSION: &str = "vitality.scoring.v1";

/// Eight ordered breakpoints for one sub-metric and age group
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub optimal_min: f64,
    pub optimal_max: f64,
    pub acceptable_low_min: f64,
    pub acceptable_low_max: f64,
    pub acceptable_high_min: f64,
    pub acceptable_high_max: f64,
    pub poor_low_max: f64,
    pub poor_high_min: f64,
}

impl MetricRange {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        optimal_min: f64,
        optimal_max: f64,
        acceptable_low_min: f64,
        acceptable_low_max: f64,
        acceptable_high_min: f64,
        acceptable_high_max: f64,
        poor_low_max: f64,
        poor_high_min: f64,
    ) -> Self {
        Self {
            optimal_min,
            optimal_max,
            acceptable_low_min,
            acceptable_low_max,
            acceptable_high_min,
            acceptable_high_max,
            poor_low_max,
            poor_high_min,
        }
    }

    /// Check the nesting invariants. Poor bounds are not checked here; they are
    /// repaired by [`MetricRange::normalized`].
    pub fn validate(&self) -> Result<(), String> {
        let breakpoints = [
            ("optimal_min", self.optimal_min),
            ("optimal_max", self.optimal_max),
            ("acceptable_low_min", self.acceptable_low_min),
            ("acceptable_low_max", self.acceptable_low_max),
            ("acceptable_high_min", self.acceptable_high_min),
            ("acceptable_high_max", self.acceptable_high_max),
            ("poor_low_max", self.poor_low_max),
            ("poor_high_min", self.poor_high_min),
        ];
        if let Some((name, _)) = breakpoints.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("{} is not a finite number", name));
        }
        if self.optimal_min > self.optimal_max {
            return Err("optimal_min exceeds optimal_max".to_string());
        }
        if self.acceptable_low_min > self.acceptable_low_max {
            return Err("acceptable_low_min exceeds acceptable_low_max".to_string());
        }
        if self.acceptable_high_min > self.acceptable_high_max {
            return Err("acceptable_high_min exceeds acceptable_high_max".to_string());
        }
        if self.acceptable_low_min > self.optimal_min {
            return Err("acceptable_low_min lies above optimal_min".to_string());
        }
        if self.acceptable_high_max < self.optimal_max {
            return Err("acceptable_high_max lies below optimal_max".to_string());
        }
        Ok(())
    }

    /// Copy of the range with overlapping or inverted poor bounds recomputed
    /// symmetrically around the optimal bounds.
    pub fn normalized(&self) -> MetricRange {
        let mut range = *self;
        if range.poor_low_max >= range.acceptable_low_min {
            let width = range.optimal_min - range.acceptable_low_min;
            range.poor_low_max = range.acceptable_low_min - width;
        }
        if range.poor_high_min <= range.acceptable_high_max {
            let width = range.acceptable_high_max - range.optimal_max;
            range.poor_high_min = range.acceptable_high_max + width;
        }
        range
    }
}

/// One scored quantity within a pillar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubMetricDefinition {
    pub id: SubMetricId,
    /// Weight within the pillar
    pub weight: f64,
    pub direction: ScoringDirection,
    pub ranges: BTreeMap<AgeGroup, MetricRange>,
}

/// One pillar and its sub-metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarDefinition {
    pub id: PillarId,
    /// Weight within the total score
    pub weight: f64,
    pub sub_metrics: Vec<SubMetricDefinition>,
}

/// Complete scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringSchema {
    pub version: String,
    pub pillars: Vec<PillarDefinition>,
}

impl ScoringSchema {
    /// Parse and validate a schema document
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let schema: ScoringSchema = serde_json::from_str(json)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Serialize the schema to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Run every structural check; the first failure is returned
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pillars.is_empty() {
            return Err(ValidationError::Empty("pillars".to_string()));
        }

        let mut seen_pillars = BTreeSet::new();
        let mut seen_sub_metrics = BTreeSet::new();

        for pillar in &self.pillars {
            if !seen_pillars.insert(pillar.id) {
                return Err(ValidationError::Duplicate(pillar.id.as_str().to_string()));
            }
            check_weight(pillar.id.as_str(), pillar.weight)?;

            if pillar.sub_metrics.is_empty() {
                return Err(ValidationError::Empty(format!(
                    "sub_metrics of pillar {}",
                    pillar.id.as_str()
                )));
            }

            for sub in &pillar.sub_metrics {
                if !seen_sub_metrics.insert(sub.id) {
                    return Err(ValidationError::Duplicate(sub.id.as_str().to_string()));
                }
                if sub.id.pillar() != pillar.id {
                    return Err(ValidationError::WrongPillar {
                        sub_metric: sub.id.as_str().to_string(),
                        pillar: pillar.id.as_str().to_string(),
                    });
                }
                check_weight(sub.id.as_str(), sub.weight)?;

                for group in AgeGroup::ALL {
                    let range = sub.ranges.get(&group).ok_or_else(|| {
                        ValidationError::MissingBenchmark {
                            sub_metric: sub.id.as_str().to_string(),
                            age_group: group.as_str().to_string(),
                        }
                    })?;
                    range.validate().map_err(|reason| ValidationError::InvalidRange {
                        sub_metric: sub.id.as_str().to_string(),
                        age_group: group.as_str().to_string(),
                        reason,
                    })?;
                }
            }

            let sub_sum: f64 = pillar.sub_metrics.iter().map(|s| s.weight).sum();
            check_weight_sum(&format!("sub_metrics of pillar {}", pillar.id.as_str()), sub_sum)?;
        }

        let pillar_sum: f64 = self.pillars.iter().map(|p| p.weight).sum();
        check_weight_sum("pillars", pillar_sum)?;

        Ok(())
    }

    pub fn pillar(&self, id: PillarId) -> Option<&PillarDefinition> {
        self.pillars.iter().find(|p| p.id == id)
    }

    /// Built-in schema shipped with the engine
    pub fn builtin() -> Self {
        use AgeGroup::*;

        fn ranges(entries: [(AgeGroup, MetricRange); 4]) -> BTreeMap<AgeGroup, MetricRange> {
            entries.into_iter().collect()
        }
        let r = MetricRange::new;

        let sleep = PillarDefinition {
            id: PillarId::Sleep,
            weight: 0.35,
            sub_metrics: vec![
                SubMetricDefinition {
                    id: SubMetricId::SleepDuration,
                    weight: 0.5,
                    direction: ScoringDirection::OptimalRange,
                    ranges: ranges([
                        (Young, r(7.0, 9.0, 6.0, 7.0, 9.0, 10.0, 5.0, 11.0)),
                        (Middle, r(7.0, 9.0, 6.0, 7.0, 9.0, 10.0, 5.0, 11.0)),
                        (Senior, r(7.0, 8.0, 6.0, 7.0, 8.0, 9.0, 5.0, 10.0)),
                        (Elderly, r(7.0, 8.0, 5.5, 7.0, 8.0, 9.5, 4.5, 10.5)),
                    ]),
                },
                SubMetricDefinition {
                    id: SubMetricId::RestorativeSleep,
                    weight: 0.25,
                    direction: ScoringDirection::OptimalRange,
                    ranges: ranges([
                        (Young, r(40.0, 50.0, 30.0, 40.0, 50.0, 60.0, 20.0, 70.0)),
                        (Middle, r(35.0, 45.0, 25.0, 35.0, 45.0, 55.0, 15.0, 65.0)),
                        (Senior, r(30.0, 40.0, 20.0, 30.0, 40.0, 50.0, 12.0, 60.0)),
                        (Elderly, r(25.0, 35.0, 15.0, 25.0, 35.0, 45.0, 10.0, 55.0)),
                    ]),
                },
                SubMetricDefinition {
                    id: SubMetricId::SleepEfficiency,
                    weight: 0.25,
                    direction: ScoringDirection::HigherIsBetter,
                    ranges: ranges([
                        (Young, r(85.0, 95.0, 75.0, 85.0, 95.0, 100.0, 65.0, 105.0)),
                        (Middle, r(85.0, 95.0, 75.0, 85.0, 95.0, 100.0, 65.0, 105.0)),
                        (Senior, r(80.0, 90.0, 70.0, 80.0, 90.0, 100.0, 60.0, 105.0)),
                        (Elderly, r(75.0, 90.0, 65.0, 75.0, 90.0, 100.0, 55.0, 105.0)),
                    ]),
                },
            ],
        };

        let movement = PillarDefinition {
            id: PillarId::Movement,
            weight: 0.30,
            sub_metrics: vec![
                SubMetricDefinition {
                    id: SubMetricId::Steps,
                    weight: 0.5,
                    direction: ScoringDirection::HigherIsBetter,
                    ranges: ranges([
                        (Young, r(8000.0, 12000.0, 5000.0, 8000.0, 12000.0, 20000.0, 2000.0, 30000.0)),
                        (Middle, r(7000.0, 10000.0, 4500.0, 7000.0, 10000.0, 18000.0, 1500.0, 30000.0)),
                        (Senior, r(6000.0, 9000.0, 3500.0, 6000.0, 9000.0, 15000.0, 1000.0, 25000.0)),
                        (Elderly, r(4500.0, 7000.0, 2500.0, 4500.0, 7000.0, 12000.0, 800.0, 20000.0)),
                    ]),
                },
                SubMetricDefinition {
                    id: SubMetricId::MovementMinutes,
                    weight: 0.3,
                    direction: ScoringDirection::HigherIsBetter,
                    ranges: ranges([
                        (Young, r(30.0, 60.0, 15.0, 30.0, 60.0, 120.0, 5.0, 240.0)),
                        (Middle, r(30.0, 60.0, 15.0, 30.0, 60.0, 120.0, 5.0, 240.0)),
                        (Senior, r(25.0, 45.0, 10.0, 25.0, 45.0, 90.0, 3.0, 180.0)),
                        (Elderly, r(20.0, 40.0, 10.0, 20.0, 40.0, 80.0, 2.0, 160.0)),
                    ]),
                },
                SubMetricDefinition {
                    id: SubMetricId::ActiveCalories,
                    weight: 0.2,
                    direction: ScoringDirection::HigherIsBetter,
                    ranges: ranges([
                        (Young, r(400.0, 700.0, 200.0, 400.0, 700.0, 1200.0, 80.0, 2000.0)),
                        (Middle, r(350.0, 600.0, 180.0, 350.0, 600.0, 1000.0, 70.0, 1800.0)),
                        (Senior, r(300.0, 500.0, 150.0, 300.0, 500.0, 900.0, 60.0, 1500.0)),
                        (Elderly, r(200.0, 400.0, 100.0, 200.0, 400.0, 700.0, 40.0, 1200.0)),
                    ]),
                },
            ],
        };

        let stress = PillarDefinition {
            id: PillarId::Stress,
            weight: 0.35,
            sub_metrics: vec![
                SubMetricDefinition {
                    id: SubMetricId::Hrv,
                    weight: 0.4,
                    direction: ScoringDirection::HigherIsBetter,
                    ranges: ranges([
                        (Young, r(50.0, 80.0, 35.0, 50.0, 80.0, 150.0, 20.0, 250.0)),
                        (Middle, r(40.0, 65.0, 28.0, 40.0, 65.0, 120.0, 15.0, 200.0)),
                        (Senior, r(30.0, 50.0, 20.0, 30.0, 50.0, 100.0, 12.0, 180.0)),
                        (Elderly, r(25.0, 45.0, 16.0, 25.0, 45.0, 90.0, 10.0, 160.0)),
                    ]),
                },
                SubMetricDefinition {
                    id: SubMetricId::RestingHeartRate,
                    weight: 0.4,
                    direction: ScoringDirection::LowerIsBetter,
                    ranges: ranges([
                        (Young, r(50.0, 62.0, 40.0, 50.0, 62.0, 72.0, 35.0, 85.0)),
                        (Middle, r(52.0, 64.0, 42.0, 52.0, 64.0, 74.0, 35.0, 88.0)),
                        (Senior, r(54.0, 66.0, 44.0, 54.0, 66.0, 76.0, 38.0, 90.0)),
                        (Elderly, r(55.0, 68.0, 45.0, 55.0, 68.0, 78.0, 40.0, 92.0)),
                    ]),
                },
                SubMetricDefinition {
                    id: SubMetricId::BreathingRate,
                    weight: 0.2,
                    direction: ScoringDirection::OptimalRange,
                    ranges: ranges([
                        (Young, r(12.0, 16.0, 10.0, 12.0, 16.0, 20.0, 8.0, 24.0)),
                        (Middle, r(12.0, 16.0, 10.0, 12.0, 16.0, 20.0, 8.0, 24.0)),
                        (Senior, r(12.0, 18.0, 10.0, 12.0, 18.0, 22.0, 8.0, 26.0)),
                        (Elderly, r(12.0, 18.0, 10.0, 12.0, 18.0, 22.0, 8.0, 26.0)),
                    ]),
                },
            ],
        };

        ScoringSchema {
            version: SCORING_SCHEMA_VERSION.to_string(),
            pillars: vec![sleep, movement, stress],
        }
    }
}

fn check_weight(name: &str, weight: f64) -> Result<(), ValidationError> {
    if !weight.is_finite() || weight <= 0.0 {
        return Err(ValidationError::InvalidWeight {
            name: name.to_string(),
            weight,
        });
    }
    Ok(())
}

fn check_weight_sum(scope: &str, sum: f64) -> Result<(), ValidationError> {
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(ValidationError::WeightSum {
            scope: scope.to_string(),
            sum,
        });
    }
    Ok(())
}
