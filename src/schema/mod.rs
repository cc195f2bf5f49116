//! Configuration documents
//!
//! The scoring schema and the threshold table are externally edited, versioned JSON
//! documents. Both are validated once at load; any structural failure is fatal.

mod scoring;
mod thresholds;

pub use scoring::*;
pub use thresholds::*;

use crate::error::ComputeError;
use thiserror::Error;

/// Tolerance when checking that weights sum to 1.0
pub const WEIGHT_TOLERANCE: f64 = 1e-3;

/// Structural problems found while validating a configuration document
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(String),

    #[error("{0} is defined more than once")]
    Duplicate(String),

    #[error("weight of {name} must be a positive number, got {weight}")]
    InvalidWeight { name: String, weight: f64 },

    #[error("weights of {scope} sum to {sum}, expected 1.0")]
    WeightSum { scope: String, sum: f64 },

    #[error("sub-metric {sub_metric} does not belong to pillar {pillar}")]
    WrongPillar { sub_metric: String, pillar: String },

    #[error("sub-metric {sub_metric} has no benchmark for age group {age_group}")]
    MissingBenchmark {
        sub_metric: String,
        age_group: String,
    },

    #[error("range of {sub_metric} for {age_group} is invalid: {reason}")]
    InvalidRange {
        sub_metric: String,
        age_group: String,
        reason: String,
    },

    #[error("rule for {key} is invalid: {reason}")]
    InvalidRule { key: String, reason: String },
}

impl From<ValidationError> for ComputeError {
    fn from(err: ValidationError) -> Self {
        ComputeError::InvalidConfiguration(err.to_string())
    }
}
