//! Payload encoding
//!
//! This module wraps engine outputs into versioned JSON payloads for downstream readers
//! (dashboards, narrative generation, delivery workers). Every payload carries producer
//! metadata and the time it was computed.

use crate::error::ComputeError;
use crate::pipeline::RecomputeSummary;
use crate::types::{AlertEpisode, SnapshotRecord, VitalitySnapshot};
use crate::{PRODUCER_NAME, VITALITY_VERSION};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current payload schema version
pub const PAYLOAD_VERSION: &str = "vitality.payload.v1";

/// Who produced a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Data availability of one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotQuality {
    /// Share of sub-metrics that had a value (0-1)
    pub coverage: f64,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub payload_version: String,
    pub producer: Producer,
    pub computed_at_utc: String,
    pub person_id: String,
    pub date: NaiveDate,
    pub quality: SnapshotQuality,
    pub snapshot: VitalitySnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodePayload {
    pub payload_version: String,
    pub producer: Producer,
    pub computed_at_utc: String,
    pub episode: AlertEpisode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub payload_version: String,
    pub producer: Producer,
    pub computed_at_utc: String,
    pub summary: RecomputeSummary,
}

/// Encoder for versioned payloads
pub struct SnapshotEncoder {
    instance_id: String,
}

impl Default for SnapshotEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    fn producer(&self) -> Producer {
        Producer {
            name: PRODUCER_NAME.to_string(),
            version: VITALITY_VERSION.to_string(),
            instance_id: self.instance_id.clone(),
        }
    }

    pub fn encode_snapshot(&self, record: &SnapshotRecord) -> SnapshotPayload {
        SnapshotPayload {
            payload_version: PAYLOAD_VERSION.to_string(),
            producer: self.producer(),
            computed_at_utc: record.computed_at.to_rfc3339(),
            person_id: record.person_id.clone(),
            date: record.date,
            quality: build_quality(&record.snapshot),
            snapshot: record.snapshot.clone(),
        }
    }

    pub fn encode_episode(&self, episode: &AlertEpisode, computed_at: DateTime<Utc>) -> EpisodePayload {
        EpisodePayload {
            payload_version: PAYLOAD_VERSION.to_string(),
            producer: self.producer(),
            computed_at_utc: computed_at.to_rfc3339(),
            episode: episode.clone(),
        }
    }

    pub fn encode_summary(&self, summary: &RecomputeSummary, computed_at: DateTime<Utc>) -> SummaryPayload {
        SummaryPayload {
            payload_version: PAYLOAD_VERSION.to_string(),
            producer: self.producer(),
            computed_at_utc: computed_at.to_rfc3339(),
            summary: summary.clone(),
        }
    }

    /// Encode a snapshot to a JSON string
    pub fn snapshot_to_json(&self, record: &SnapshotRecord) -> Result<String, ComputeError> {
        serde_json::to_string_pretty(&self.encode_snapshot(record)).map_err(ComputeError::JsonError)
    }

    /// Encode a recompute summary to a JSON string
    pub fn summary_to_json(
        &self,
        summary: &RecomputeSummary,
        computed_at: DateTime<Utc>,
    ) -> Result<String, ComputeError> {
        serde_json::to_string_pretty(&self.encode_summary(summary, computed_at))
            .map_err(ComputeError::JsonError)
    }
}

fn build_quality(snapshot: &VitalitySnapshot) -> SnapshotQuality {
    let total: usize = snapshot.pillars.iter().map(|p| p.sub_metrics.len()).sum();
    let available: usize = snapshot
        .pillars
        .iter()
        .flat_map(|p| p.sub_metrics.iter())
        .filter(|s| s.available)
        .count();
    let coverage = if total == 0 {
        0.0
    } else {
        available as f64 / total as f64
    };

    let flags = snapshot
        .pillars
        .iter()
        .filter(|p| !p.has_data)
        .map(|p| format!("missing_{}", p.id.as_str()))
        .collect();

    SnapshotQuality { coverage, flags }
}
