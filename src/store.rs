//! Collaborator boundaries and the in-memory store
//!
//! The engine reads rows and profiles through [`MetricSource`] and writes snapshots,
//! episodes and notification requests through [`VitalityStore`]. [`MemoryStore`]
//! implements both and saves/loads its whole state as JSON, which is what the CLI uses
//! for batch runs.

use crate::error::ComputeError;
use crate::types::{
    AlertEpisode, DailyRawMetrics, NotificationRequest, PatternMetric, PatternType,
    PersonProfile, SnapshotRecord,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Source of raw daily rows and profile data
pub trait MetricSource {
    /// All rows for `person_id` with `start <= date <= end`, any number per day
    fn fetch_rows(
        &self,
        person_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyRawMetrics>, ComputeError>;

    fn fetch_profile(&self, person_id: &str) -> Result<PersonProfile, ComputeError>;
}

/// Persistence for engine outputs. All writes are upserts keyed by natural identity.
pub trait VitalityStore {
    /// Insert or replace the snapshot for (person, date)
    fn upsert_snapshot(&mut self, record: SnapshotRecord) -> Result<(), ComputeError>;

    /// The single active episode for a key, if any
    fn active_episode(
        &self,
        person_id: &str,
        metric: PatternMetric,
        pattern_type: PatternType,
    ) -> Result<Option<AlertEpisode>, ComputeError>;

    /// The key's most recently evaluated episode, active or resolved
    fn latest_episode(
        &self,
        person_id: &str,
        metric: PatternMetric,
        pattern_type: PatternType,
    ) -> Result<Option<AlertEpisode>, ComputeError>;

    /// Insert or replace an episode by id
    fn upsert_episode(&mut self, episode: AlertEpisode) -> Result<(), ComputeError>;

    fn enqueue_notification(&mut self, request: NotificationRequest) -> Result<(), ComputeError>;
}

/// In-memory implementation of both collaborator traits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStore {
    #[serde(default)]
    pub rows: Vec<DailyRawMetrics>,
    #[serde(default)]
    pub profiles: Vec<PersonProfile>,
    #[serde(default)]
    pub snapshots: Vec<SnapshotRecord>,
    #[serde(default)]
    pub episodes: Vec<AlertEpisode>,
    #[serde(default)]
    pub notifications: Vec<NotificationRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state from JSON
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        serde_json::from_str(json).map_err(ComputeError::JsonError)
    }

    /// Save state to JSON
    pub fn to_json(&self) -> Result<String, ComputeError> {
        serde_json::to_string_pretty(self).map_err(ComputeError::JsonError)
    }

    pub fn add_rows(&mut self, rows: impl IntoIterator<Item = DailyRawMetrics>) {
        self.rows.extend(rows);
    }

    /// Insert or replace a profile by person id
    pub fn put_profile(&mut self, profile: PersonProfile) {
        match self.profiles.iter_mut().find(|p| p.person_id == profile.person_id) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }

    pub fn snapshot(&self, person_id: &str, date: NaiveDate) -> Option<&SnapshotRecord> {
        self.snapshots
            .iter()
            .find(|s| s.person_id == person_id && s.date == date)
    }

    /// Every episode (active or resolved) for a key, oldest start first
    pub fn episodes_for(
        &self,
        person_id: &str,
        metric: PatternMetric,
        pattern_type: PatternType,
    ) -> Vec<&AlertEpisode> {
        let mut episodes: Vec<&AlertEpisode> = self
            .episodes
            .iter()
            .filter(|e| e.matches_key(person_id, metric, pattern_type))
            .collect();
        episodes.sort_by_key(|e| e.active_since);
        episodes
    }

    /// Drain the notification queue, as a delivery worker would
    pub fn take_notifications(&mut self) -> Vec<NotificationRequest> {
        std::mem::take(&mut self.notifications)
    }
}

impl MetricSource for MemoryStore {
    fn fetch_rows(
        &self,
        person_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyRawMetrics>, ComputeError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.person_id == person_id && r.date >= start && r.date <= end)
            .cloned()
            .collect())
    }

    fn fetch_profile(&self, person_id: &str) -> Result<PersonProfile, ComputeError> {
        self.profiles
            .iter()
            .find(|p| p.person_id == person_id)
            .cloned()
            .ok_or_else(|| ComputeError::FetchFailure(format!("no profile for {}", person_id)))
    }
}

impl VitalityStore for MemoryStore {
    fn upsert_snapshot(&mut self, record: SnapshotRecord) -> Result<(), ComputeError> {
        match self
            .snapshots
            .iter_mut()
            .find(|s| s.person_id == record.person_id && s.date == record.date)
        {
            Some(existing) => *existing = record,
            None => self.snapshots.push(record),
        }
        Ok(())
    }

    fn active_episode(
        &self,
        person_id: &str,
        metric: PatternMetric,
        pattern_type: PatternType,
    ) -> Result<Option<AlertEpisode>, ComputeError> {
        Ok(self
            .episodes
            .iter()
            .find(|e| e.is_active() && e.matches_key(person_id, metric, pattern_type))
            .cloned())
    }

    fn latest_episode(
        &self,
        person_id: &str,
        metric: PatternMetric,
        pattern_type: PatternType,
    ) -> Result<Option<AlertEpisode>, ComputeError> {
        Ok(self
            .episodes
            .iter()
            .filter(|e| e.matches_key(person_id, metric, pattern_type))
            .max_by_key(|e| (e.last_evaluated_date, e.is_active()))
            .cloned())
    }

    fn upsert_episode(&mut self, episode: AlertEpisode) -> Result<(), ComputeError> {
        if episode.is_active() {
            let conflict = self.episodes.iter().any(|e| {
                e.id != episode.id
                    && e.is_active()
                    && e.matches_key(&episode.person_id, episode.metric, episode.pattern_type)
            });
            if conflict {
                return Err(ComputeError::PersistenceFailure(format!(
                    "another active episode exists for {}/{}/{}",
                    episode.person_id,
                    episode.metric.as_str(),
                    episode.pattern_type.as_str()
                )));
            }
        }
        match self.episodes.iter_mut().find(|e| e.id == episode.id) {
            Some(existing) => *existing = episode,
            None => self.episodes.push(episode),
        }
        Ok(())
    }

    fn enqueue_notification(&mut self, request: NotificationRequest) -> Result<(), ComputeError> {
        self.notifications.push(request);
        Ok(())
    }
}
