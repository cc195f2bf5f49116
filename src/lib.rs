//! Synheart Vitality - Age-adjusted vitality scoring and baseline-deviation alerting
//!
//! Vitality turns daily wearable rows into two outputs through a deterministic pipeline:
//! normalization → feature derivation → scoring → aggregation, and
//! series projection → baseline computation → threshold rules → episode tracking.
//!
//! ## Modules
//!
//! - **Scoring**: 0-100 sub-metric, pillar and total scores against age-group ranges
//! - **Patterns**: sustained drops/rises vs. personal baseline, tracked as alert episodes
//! - **Orchestration**: idempotent recompute over a date range through pluggable stores

pub mod aggregator;
pub mod baseline;
pub mod encoder;
pub mod episode;
pub mod error;
pub mod features;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod scorer;
pub mod store;
pub mod threshold;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use encoder::SnapshotEncoder;
pub use error::{ComputeError, SkipReason};
pub use pipeline::{EngineSettings, RecomputeSummary, VitalityEngine};
pub use store::{MemoryStore, MetricSource, VitalityStore};

// Configuration exports
pub use schema::{ScoringSchema, ThresholdConfig};

/// Vitality version embedded in all payloads
pub const VITALITY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for payloads
pub const PRODUCER_NAME: &str = "synheart-vitality";
