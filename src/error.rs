//! Error types for Synheart Vitality

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while loading configuration or running a recompute
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to fetch data: {0}")]
    FetchFailure(String),

    #[error("Failed to persist result: {0}")]
    PersistenceFailure(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Why a date (or one pattern on a date) was not computed.
///
/// Skips are reported in the recompute summary and never abort the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientData(String),
    FetchFailure(String),
    PersistenceFailure(String),
    /// A collaborator returned data that could not be decoded
    InvalidData(String),
    /// A collaborator rejected the request or its configuration
    Rejected(String),
}

impl SkipReason {
    /// Map a collaborator error onto the skip taxonomy
    pub fn from_error(err: &ComputeError) -> Self {
        match err {
            ComputeError::FetchFailure(msg) => SkipReason::FetchFailure(msg.clone()),
            ComputeError::PersistenceFailure(msg) => SkipReason::PersistenceFailure(msg.clone()),
            ComputeError::JsonError(_) | ComputeError::ParseError(_) => {
                SkipReason::InvalidData(err.to_string())
            }
            ComputeError::InvalidRequest(_) | ComputeError::InvalidConfiguration(_) => {
                SkipReason::Rejected(err.to_string())
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::InsufficientData(_) => "insufficient_data",
            SkipReason::FetchFailure(_) => "fetch_failure",
            SkipReason::PersistenceFailure(_) => "persistence_failure",
            SkipReason::InvalidData(_) => "invalid_data",
            SkipReason::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientData(detail)
            | SkipReason::FetchFailure(detail)
            | SkipReason::PersistenceFailure(detail)
            | SkipReason::InvalidData(detail)
            | SkipReason::Rejected(detail) => write!(f, "{}: {}", self.code(), detail),
        }
    }
}
