//! Pillar and total aggregation
//!
//! Combines sub-metric scores into pillar scores and a total score. Weights are
//! renormalized over whatever is actually available, so missing data never counts as a
//! zero. A snapshot is only produced when enough pillars carry data.

use crate::schema::{PillarDefinition, ScoringSchema};
use crate::scorer::SubMetricScorer;
use crate::types::{AgeGroup, PillarScore, SubMetricScore, SubMetricValues, VitalitySnapshot};
use tracing::debug;

/// Minimum number of pillars with data before a snapshot is emitted
pub const MIN_PILLARS_WITH_DATA: usize = 2;

/// Aggregator for pillar and total scores
pub struct Aggregator;

impl Aggregator {
    /// Score every pillar of the schema for one age group
    pub fn score_pillars(
        schema: &ScoringSchema,
        age_group: AgeGroup,
        values: &SubMetricValues,
    ) -> Vec<PillarScore> {
        let mut pillars: Vec<PillarScore> = schema
            .pillars
            .iter()
            .map(|pillar| score_pillar(pillar, age_group, values))
            .collect();
        pillars.sort_by_key(|p| p.id);
        pillars
    }

    /// Weighted average of the pillars that have data; `None` when none do
    pub fn total_score(schema: &ScoringSchema, pillars: &[PillarScore]) -> Option<u8> {
        let weighted: Vec<(f64, f64)> = pillars
            .iter()
            .filter(|p| p.has_data)
            .filter_map(|p| schema.pillar(p.id).map(|def| (def.weight, f64::from(p.score))))
            .collect();
        weighted_average(&weighted).map(round_score)
    }

    /// Full snapshot for one day, or `None` when the eligibility gate is not met
    pub fn aggregate(
        schema: &ScoringSchema,
        age: u32,
        values: &SubMetricValues,
    ) -> Option<VitalitySnapshot> {
        let age_group = AgeGroup::from_age(age);
        let pillars = Self::score_pillars(schema, age_group, values);

        let with_data = pillars.iter().filter(|p| p.has_data).count();
        if with_data < MIN_PILLARS_WITH_DATA {
            debug!(
                pillars_with_data = with_data,
                required = MIN_PILLARS_WITH_DATA,
                "Snapshot not eligible"
            );
            return None;
        }

        let total_score = Self::total_score(schema, &pillars);

        Some(VitalitySnapshot {
            age,
            age_group,
            total_score,
            pillars,
        })
    }
}

fn score_pillar(pillar: &PillarDefinition, age_group: AgeGroup, values: &SubMetricValues) -> PillarScore {
    let mut sub_metrics: Vec<SubMetricScore> = pillar
        .sub_metrics
        .iter()
        .map(|def| {
            let value = values.get(&def.id).copied();
            let score = def
                .ranges
                .get(&age_group)
                .and_then(|range| SubMetricScorer::score(value, range, def.direction));
            SubMetricScore {
                id: def.id,
                value,
                score,
                available: score.is_some(),
            }
        })
        .collect();
    sub_metrics.sort_by_key(|s| s.id);

    let weighted: Vec<(f64, f64)> = sub_metrics
        .iter()
        .filter_map(|s| {
            let weight = pillar.sub_metrics.iter().find(|d| d.id == s.id)?.weight;
            s.score.map(|score| (weight, f64::from(score)))
        })
        .collect();

    match weighted_average(&weighted) {
        Some(avg) => PillarScore {
            id: pillar.id,
            score: round_score(avg),
            has_data: true,
            sub_metrics,
        },
        None => PillarScore {
            id: pillar.id,
            score: 0,
            has_data: false,
            sub_metrics,
        },
    }
}

/// Average of `(weight, score)` pairs with weights renormalized to sum to 1.0
fn weighted_average(pairs: &[(f64, f64)]) -> Option<f64> {
    let weight_sum: f64 = pairs.iter().map(|(w, _)| w).sum();
    if pairs.is_empty() || weight_sum <= 0.0 {
        return None;
    }
    let total: f64 = pairs.iter().map(|(w, s)| (w / weight_sum) * s).sum();
    Some(total)
}

fn round_score(score: f64) -> u8 {
    score.round().clamp(0.0, 100.0) as u8
}
