//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Vitality. [`VitalityEngine`] holds
//! the validated configuration and runs the recompute loop: merge rows, score each date,
//! evaluate every configured pattern and persist the results.

use crate::aggregator::Aggregator;
use crate::baseline::BaselineCalculator;
use crate::episode::{
    EpisodeKey, EpisodeManager, EpisodeOutcome, EpisodeTransition, PatternHistory, SeriesHistory,
};
use crate::error::{ComputeError, SkipReason};
use crate::features::FeatureDeriver;
use crate::normalizer::{MergedDays, Normalizer, DEFAULT_BACKFILL_LOOKBACK, DEFAULT_SCORING_WINDOW};
use crate::schema::{MetricThresholds, ScoringSchema, ThresholdConfig};
use crate::store::{MetricSource, VitalityStore};
use crate::threshold::{PatternEvaluation, PatternReason, ThresholdEvaluator};
use crate::types::{
    AlertEpisode, DailyRawMetrics, DailyValue, PatternMetric, PatternType, PersonProfile,
    SnapshotRecord, VitalitySnapshot,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Days of history projected for pattern evaluation
pub const DEFAULT_PATTERN_LOOKBACK: i64 = 60;
/// Upper bound for every day-count setting
pub const MAX_SETTING_DAYS: i64 = 3650;

/// Runtime knobs of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Track episodes without enqueueing notifications
    #[serde(default)]
    pub shadow_mode: bool,
    pub scoring_window_days: i64,
    pub backfill_lookback_days: i64,
    pub pattern_lookback_days: i64,
    pub walkback_days: i64,
    pub hysteresis_band: f64,
    pub baseline: BaselineCalculator,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let episodes = EpisodeManager::default();
        Self {
            shadow_mode: false,
            scoring_window_days: DEFAULT_SCORING_WINDOW,
            backfill_lookback_days: DEFAULT_BACKFILL_LOOKBACK,
            pattern_lookback_days: DEFAULT_PATTERN_LOOKBACK,
            walkback_days: episodes.walkback_days,
            hysteresis_band: episodes.hysteresis_band,
            baseline: BaselineCalculator::default(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), ComputeError> {
        let invalid = |msg: &str| Err(ComputeError::InvalidConfiguration(msg.to_string()));
        if self.scoring_window_days < 1 {
            return invalid("scoring_window_days must be at least 1");
        }
        if self.backfill_lookback_days < 0 || self.walkback_days < 0 {
            return invalid("lookbacks must not be negative");
        }
        if self.pattern_lookback_days < 1 {
            return invalid("pattern_lookback_days must be at least 1");
        }
        if !(self.hysteresis_band.is_finite() && (0.0..1.0).contains(&self.hysteresis_band)) {
            return invalid("hysteresis_band must be in [0, 1)");
        }
        if self.baseline.recent_window == 0 || self.baseline.baseline_cap == 0 {
            return invalid("baseline windows must be at least 1 day");
        }
        let as_days = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        let day_counts = [
            ("scoring_window_days", self.scoring_window_days),
            ("backfill_lookback_days", self.backfill_lookback_days),
            ("pattern_lookback_days", self.pattern_lookback_days),
            ("walkback_days", self.walkback_days),
            ("baseline.min_points", as_days(self.baseline.min_points)),
            ("baseline.recent_window", as_days(self.baseline.recent_window)),
            ("baseline.baseline_cap", as_days(self.baseline.baseline_cap)),
            ("baseline.min_baseline_days", as_days(self.baseline.min_baseline_days)),
        ];
        if let Some((name, _)) = day_counts.iter().find(|(_, days)| *days > MAX_SETTING_DAYS) {
            return Err(ComputeError::InvalidConfiguration(format!(
                "{} must be at most {} days",
                name, MAX_SETTING_DAYS
            )));
        }
        Ok(())
    }

    fn episode_manager(&self) -> EpisodeManager {
        EpisodeManager {
            walkback_days: self.walkback_days,
            hysteresis_band: self.hysteresis_band,
            shadow_mode: self.shadow_mode,
        }
    }

    /// Days of history projected before an evaluation date. Covers the walk-back so a
    /// walked-back day sees the same baseline pool it had on its own date.
    fn series_days(&self) -> Option<i64> {
        let walked = i64::try_from(self.baseline.recent_window)
            .ok()?
            .checked_add(i64::try_from(self.baseline.baseline_cap).ok()?)?
            .checked_add(self.walkback_days)?;
        Some(self.pattern_lookback_days.max(walked))
    }

    /// Days of raw history needed before the first date of a range
    fn history_days(&self) -> Option<i64> {
        let scoring = self
            .scoring_window_days
            .checked_sub(1)?
            .checked_add(self.backfill_lookback_days)?;
        Some(self.series_days()?.max(scoring))
    }
}

/// Whether a date produced a persisted snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateStatus {
    Computed,
    Skipped,
}

/// Outcome of one (metric, pattern type) on one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternResult {
    pub metric: PatternMetric,
    pub pattern_type: PatternType,
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<EpisodeTransition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    pub notifications: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

/// Outcome of one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateOutcome {
    pub date: NaiveDate,
    pub status: DateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_score: Option<u8>,
    pub patterns: Vec<PatternResult>,
}

/// Structured result of a multi-date recompute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecomputeSummary {
    pub person_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub attempted: usize,
    pub computed: usize,
    pub skipped: usize,
    pub episodes_opened: usize,
    pub episodes_resolved: usize,
    pub notifications_enqueued: usize,
    pub dates: Vec<DateOutcome>,
}

impl RecomputeSummary {
    fn new(person_id: &str, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            person_id: person_id.to_string(),
            start,
            end,
            attempted: 0,
            computed: 0,
            skipped: 0,
            episodes_opened: 0,
            episodes_resolved: 0,
            notifications_enqueued: 0,
            dates: Vec::new(),
        }
    }

    fn record(&mut self, outcome: DateOutcome) {
        self.attempted += 1;
        match outcome.status {
            DateStatus::Computed => self.computed += 1,
            DateStatus::Skipped => self.skipped += 1,
        }
        for pattern in &outcome.patterns {
            match pattern.transition {
                Some(EpisodeTransition::Appeared) => self.episodes_opened += 1,
                Some(EpisodeTransition::Resolved) => self.episodes_resolved += 1,
                _ => {}
            }
            self.notifications_enqueued += pattern.notifications;
        }
        self.dates.push(outcome);
    }

    pub fn outcome(&self, date: NaiveDate) -> Option<&DateOutcome> {
        self.dates.iter().find(|d| d.date == date)
    }
}

/// Scoring and pattern engine over a validated configuration
#[derive(Debug, Clone)]
pub struct VitalityEngine {
    schema: ScoringSchema,
    thresholds: ThresholdConfig,
    settings: EngineSettings,
}

impl VitalityEngine {
    /// Validate configuration and build the engine. Fails fast on any invalid document.
    pub fn new(
        schema: ScoringSchema,
        thresholds: ThresholdConfig,
        settings: EngineSettings,
    ) -> Result<Self, ComputeError> {
        schema.validate()?;
        thresholds.validate()?;
        settings.validate()?;
        Ok(Self {
            schema,
            thresholds,
            settings,
        })
    }

    /// Engine over the built-in schema and threshold table
    pub fn builtin(settings: EngineSettings) -> Result<Self, ComputeError> {
        Self::new(ScoringSchema::builtin(), ThresholdConfig::builtin(), settings)
    }

    pub fn schema(&self) -> &ScoringSchema {
        &self.schema
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Score one already-windowed day for a person of `age`
    pub fn score_day(&self, age: u32, row: &DailyRawMetrics) -> Option<VitalitySnapshot> {
        let values = FeatureDeriver::derive(row);
        Aggregator::aggregate(&self.schema, age, &values)
    }

    /// Evaluate one configured pattern on a series as of `date`
    pub fn evaluate_pattern(
        &self,
        metric: PatternMetric,
        pattern_type: PatternType,
        series: &[DailyValue],
        date: NaiveDate,
    ) -> Result<PatternEvaluation, ComputeError> {
        let rules = self.rules(metric, pattern_type)?;
        Ok(ThresholdEvaluator::evaluate_series(
            &self.settings.baseline,
            series,
            date,
            rules,
        ))
    }

    /// Recompute snapshots and episodes for `person_id` over `[start, end]`.
    ///
    /// Only an invalid request is an error. Fetch, persistence and data problems are
    /// recorded per date in the summary and the loop continues.
    pub fn recompute(
        &self,
        person_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        source: &dyn MetricSource,
        store: &mut dyn VitalityStore,
        now: DateTime<Utc>,
    ) -> Result<RecomputeSummary, ComputeError> {
        let person_id = person_id.trim();
        if person_id.is_empty() {
            return Err(ComputeError::InvalidRequest("person_id is empty".to_string()));
        }
        if start > end {
            return Err(ComputeError::InvalidRequest(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        let fetch_start = self
            .settings
            .history_days()
            .and_then(|days| start.checked_sub_signed(Duration::days(days)))
            .ok_or_else(|| ComputeError::InvalidRequest(format!("start {} is out of range", start)))?;

        info!(person_id, start = %start, end = %end, "Starting recompute");

        let fetched = source
            .fetch_profile(person_id)
            .and_then(|profile| Ok((profile, source.fetch_rows(person_id, fetch_start, end)?)));

        let mut summary = RecomputeSummary::new(person_id, start, end);
        match fetched {
            Ok((profile, rows)) => {
                let days = Normalizer::merge(person_id, &rows);
                debug!(person_id, rows = rows.len(), days = days.len(), "Fetched history");
                for date in date_range(start, end) {
                    let outcome = self.recompute_date(&profile, &days, date, store, now);
                    summary.record(outcome);
                }
            }
            Err(err) => {
                warn!(person_id, error = %err, "Fetch failed, skipping range");
                let reason = SkipReason::from_error(&err);
                for date in date_range(start, end) {
                    summary.record(DateOutcome {
                        date,
                        status: DateStatus::Skipped,
                        skip_reason: Some(reason.clone()),
                        total_score: None,
                        patterns: Vec::new(),
                    });
                }
            }
        }

        info!(
            person_id,
            attempted = summary.attempted,
            computed = summary.computed,
            skipped = summary.skipped,
            episodes_opened = summary.episodes_opened,
            episodes_resolved = summary.episodes_resolved,
            notifications = summary.notifications_enqueued,
            "Recompute finished"
        );
        Ok(summary)
    }

    fn recompute_date(
        &self,
        profile: &PersonProfile,
        days: &MergedDays,
        date: NaiveDate,
        store: &mut dyn VitalityStore,
        now: DateTime<Utc>,
    ) -> DateOutcome {
        let (status, skip_reason, total_score) = match self.score_date(profile, days, date, store, now) {
            Ok(snapshot) => (DateStatus::Computed, None, snapshot.total_score),
            Err(reason) => {
                match &reason {
                    SkipReason::InsufficientData(detail) => {
                        debug!(person_id = %profile.person_id, date = %date, detail = %detail, "Snapshot skipped")
                    }
                    other => {
                        warn!(person_id = %profile.person_id, date = %date, reason = %other, "Snapshot skipped")
                    }
                }
                (DateStatus::Skipped, Some(reason), None)
            }
        };

        let mut keys: Vec<&MetricThresholds> = self.thresholds.metrics.iter().collect();
        keys.sort_by_key(|m| (m.metric, m.pattern_type));
        let patterns = keys
            .into_iter()
            .map(|rules| self.evaluate_date_pattern(profile, days, rules, date, store, now))
            .collect();

        DateOutcome {
            date,
            status,
            skip_reason,
            total_score,
            patterns,
        }
    }

    fn score_date(
        &self,
        profile: &PersonProfile,
        days: &MergedDays,
        date: NaiveDate,
        store: &mut dyn VitalityStore,
        now: DateTime<Utc>,
    ) -> Result<VitalitySnapshot, SkipReason> {
        let age = profile.age_on(date).ok_or_else(|| {
            SkipReason::InsufficientData("profile has no age or date of birth".to_string())
        })?;

        let windowed = Normalizer::window(
            days,
            &profile.person_id,
            date,
            self.settings.scoring_window_days,
            self.settings.backfill_lookback_days,
        );
        let snapshot = self.score_day(age, &windowed.row).ok_or_else(|| {
            SkipReason::InsufficientData("fewer than 2 pillars with data".to_string())
        })?;

        store
            .upsert_snapshot(SnapshotRecord {
                person_id: profile.person_id.clone(),
                date,
                snapshot: snapshot.clone(),
                computed_at: now,
            })
            .map_err(|e| SkipReason::from_error(&e))?;
        Ok(snapshot)
    }

    fn evaluate_date_pattern(
        &self,
        profile: &PersonProfile,
        days: &MergedDays,
        rules: &MetricThresholds,
        date: NaiveDate,
        store: &mut dyn VitalityStore,
        now: DateTime<Utc>,
    ) -> PatternResult {
        let mut result = PatternResult {
            metric: rules.metric,
            pattern_type: rules.pattern_type,
            triggered: false,
            deviation: None,
            transition: None,
            episode_id: None,
            level: None,
            notifications: 0,
            skip_reason: None,
        };

        let series_start = self
            .settings
            .series_days()
            .and_then(|d| date.checked_sub_signed(Duration::days(d)))
            .unwrap_or(NaiveDate::MIN);
        let series = FeatureDeriver::series(days, rules.metric, series_start, date);
        let mut history = SeriesHistory::new(&self.settings.baseline, &series, rules);

        let applied = self.advance_episode(profile, rules, date, &mut history, store, now);
        let today = history.pattern_on(date);
        result.triggered = today.triggered;
        result.deviation = today.deviation;

        match applied {
            Ok(outcome) => {
                result.transition = Some(outcome.transition);
                result.notifications = outcome.notifications.len();
                if outcome.transition != EpisodeTransition::Stale {
                    if let Some(episode) = &outcome.episode {
                        result.episode_id = Some(episode.id);
                        result.level = Some(episode.current_level);
                    }
                }
                if let PatternReason::InsufficientData { detail } = &today.reason {
                    if outcome.transition == EpisodeTransition::Quiet {
                        result.skip_reason = Some(SkipReason::InsufficientData(detail.to_string()));
                    }
                }
            }
            Err(err) => {
                warn!(
                    person_id = %profile.person_id,
                    date = %date,
                    metric = rules.metric.as_str(),
                    error = %err,
                    "Pattern evaluation skipped"
                );
                result.skip_reason = Some(SkipReason::from_error(&err));
            }
        }
        result
    }

    /// Run the episode state machine for one key and persist what changed
    fn advance_episode(
        &self,
        profile: &PersonProfile,
        rules: &MetricThresholds,
        date: NaiveDate,
        history: &mut SeriesHistory<'_>,
        store: &mut dyn VitalityStore,
        now: DateTime<Utc>,
    ) -> Result<EpisodeOutcome, ComputeError> {
        let latest = store.latest_episode(&profile.person_id, rules.metric, rules.pattern_type)?;
        let prior = latest.clone();
        let recipients = profile.recipients();
        let key = EpisodeKey {
            person_id: &profile.person_id,
            metric: rules.metric,
            pattern_type: rules.pattern_type,
            recipients: &recipients,
        };
        let outcome = self
            .settings
            .episode_manager()
            .evaluate(&key, latest, date, history, now);

        if let Some(old) = &outcome.superseded {
            store.upsert_episode(old.clone())?;
        }
        if let (true, Some(episode)) = (outcome.changed, &outcome.episode) {
            if !outcome.notifications.is_empty() {
                // The notified level is only committed once every request is queued, so a
                // failed enqueue is retried on the next run instead of being deduped away.
                let mut staged = episode.clone();
                let (level, at) = prior
                    .filter(|p| p.id == episode.id)
                    .map_or((None, None), |p| (p.last_notified_level, p.last_notified_at));
                staged.last_notified_level = level;
                staged.last_notified_at = at;
                store.upsert_episode(staged)?;
                for request in &outcome.notifications {
                    store.enqueue_notification(request.clone())?;
                }
            }
            store.upsert_episode(episode.clone())?;
        }
        Ok(outcome)
    }

    /// Suppress notifications for the active episode of a key until `until`
    pub fn snooze_episode(
        &self,
        store: &mut dyn VitalityStore,
        person_id: &str,
        metric: PatternMetric,
        pattern_type: PatternType,
        until: DateTime<Utc>,
    ) -> Result<AlertEpisode, ComputeError> {
        let mut episode = self.require_active(store, person_id, metric, pattern_type)?;
        EpisodeManager::snooze(&mut episode, until)?;
        store.upsert_episode(episode.clone())?;
        info!(episode_id = %episode.id, until = %until, "Episode snoozed");
        Ok(episode)
    }

    /// Suppress all further notifications for the active episode of a key
    pub fn dismiss_episode(
        &self,
        store: &mut dyn VitalityStore,
        person_id: &str,
        metric: PatternMetric,
        pattern_type: PatternType,
        at: DateTime<Utc>,
    ) -> Result<AlertEpisode, ComputeError> {
        let mut episode = self.require_active(store, person_id, metric, pattern_type)?;
        EpisodeManager::dismiss(&mut episode, at)?;
        store.upsert_episode(episode.clone())?;
        info!(episode_id = %episode.id, "Episode dismissed");
        Ok(episode)
    }

    fn require_active(
        &self,
        store: &dyn VitalityStore,
        person_id: &str,
        metric: PatternMetric,
        pattern_type: PatternType,
    ) -> Result<AlertEpisode, ComputeError> {
        store
            .active_episode(person_id, metric, pattern_type)?
            .ok_or_else(|| {
                ComputeError::InvalidRequest(format!(
                    "no active {} {} episode for {}",
                    metric.as_str(),
                    pattern_type.as_str(),
                    person_id
                ))
            })
    }

    fn rules(
        &self,
        metric: PatternMetric,
        pattern_type: PatternType,
    ) -> Result<&MetricThresholds, ComputeError> {
        self.thresholds.rules_for(metric, pattern_type).ok_or_else(|| {
            ComputeError::InvalidRequest(format!(
                "no thresholds configured for {} {}",
                metric.as_str(),
                pattern_type.as_str()
            ))
        })
    }
}

/// Inclusive, ascending calendar range
fn date_range(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    std::iter::successors(Some(start), |d| d.succ_opt()).take_while(move |d| *d <= end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{NotificationRequest, PillarId, RawField};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap() + Duration::days(n - 1)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 1, 3, 0, 0).unwrap()
    }

    fn engine() -> VitalityEngine {
        VitalityEngine::builtin(EngineSettings::default()).unwrap()
    }

    fn profile(person_id: &str, recipients: &[&str]) -> PersonProfile {
        PersonProfile {
            person_id: person_id.to_string(),
            age: Some(34),
            birth_date: None,
            recipient_ids: recipients.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Sleep and steps for days `1..=n`, with sleep overridden per day by `sleep`
    fn store_with(n: i64, sleep: impl Fn(i64) -> f64) -> MemoryStore {
        let mut store = MemoryStore::new();
        store.put_profile(profile("p1", &["caregiver"]));
        store.add_rows((1..=n).map(|d| {
            DailyRawMetrics::new("p1", day(d))
                .with(RawField::SleepMinutes, sleep(d))
                .with(RawField::Steps, 9000.0)
        }));
        store
    }

    struct FailingSource;

    impl MetricSource for FailingSource {
        fn fetch_rows(
            &self,
            _person_id: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<DailyRawMetrics>, ComputeError> {
            Err(ComputeError::FetchFailure("connection refused".to_string()))
        }

        fn fetch_profile(&self, person_id: &str) -> Result<PersonProfile, ComputeError> {
            Ok(profile(person_id, &[]))
        }
    }

    /// Store whose writes can be made to fail
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_snapshot_on: Option<NaiveDate>,
        fail_episodes: bool,
        fail_enqueue: bool,
    }

    impl VitalityStore for FlakyStore {
        fn upsert_snapshot(&mut self, record: SnapshotRecord) -> Result<(), ComputeError> {
            if self.fail_snapshot_on == Some(record.date) {
                return Err(ComputeError::PersistenceFailure("snapshot table locked".to_string()));
            }
            self.inner.upsert_snapshot(record)
        }

        fn active_episode(
            &self,
            person_id: &str,
            metric: PatternMetric,
            pattern_type: PatternType,
        ) -> Result<Option<AlertEpisode>, ComputeError> {
            self.inner.active_episode(person_id, metric, pattern_type)
        }

        fn latest_episode(
            &self,
            person_id: &str,
            metric: PatternMetric,
            pattern_type: PatternType,
        ) -> Result<Option<AlertEpisode>, ComputeError> {
            self.inner.latest_episode(person_id, metric, pattern_type)
        }

        fn upsert_episode(&mut self, episode: AlertEpisode) -> Result<(), ComputeError> {
            if self.fail_episodes {
                return Err(ComputeError::PersistenceFailure("episode table locked".to_string()));
            }
            self.inner.upsert_episode(episode)
        }

        fn enqueue_notification(&mut self, request: NotificationRequest) -> Result<(), ComputeError> {
            if self.fail_enqueue {
                return Err(ComputeError::PersistenceFailure("queue down".to_string()));
            }
            self.inner.enqueue_notification(request)
        }
    }

    #[test]
    fn test_settings_day_counts_are_bounded() {
        for settings in [
            EngineSettings {
                backfill_lookback_days: i64::MAX / 4,
                ..Default::default()
            },
            EngineSettings {
                scoring_window_days: MAX_SETTING_DAYS + 1,
                ..Default::default()
            },
            EngineSettings {
                walkback_days: i64::MAX,
                ..Default::default()
            },
            EngineSettings {
                baseline: BaselineCalculator {
                    baseline_cap: usize::MAX,
                    ..Default::default()
                },
                ..Default::default()
            },
        ] {
            assert!(matches!(
                VitalityEngine::builtin(settings),
                Err(ComputeError::InvalidConfiguration(_))
            ));
        }

        let widest = EngineSettings {
            scoring_window_days: MAX_SETTING_DAYS,
            backfill_lookback_days: MAX_SETTING_DAYS,
            ..Default::default()
        };
        let engine = VitalityEngine::builtin(widest).unwrap();
        let source = store_with(3, |_| 480.0);
        let mut store = MemoryStore::new();
        let summary = engine
            .recompute("p1", day(3), day(3), &source, &mut store, now())
            .unwrap();
        assert_eq!(summary.computed, 1);
    }

    #[test]
    fn test_history_covers_walkback() {
        let settings = EngineSettings::default();
        assert_eq!(settings.series_days(), Some(64));
        assert_eq!(settings.history_days(), Some(64));

        // A short pattern lookback must not truncate the baseline of walked-back days
        let settings = EngineSettings {
            pattern_lookback_days: 9,
            ..Default::default()
        };
        let engine = VitalityEngine::builtin(settings).unwrap();
        let source = store_with(20, |d| if d <= 10 { 480.0 } else { 300.0 });
        let mut store = MemoryStore::new();

        engine
            .recompute("p1", day(20), day(20), &source, &mut store, now())
            .unwrap();

        let episode = store
            .active_episode("p1", PatternMetric::SleepMinutes, PatternType::DropVsBaseline)
            .unwrap()
            .unwrap();
        // Day 11 is the last false day; day 12's recent window starts on day 10
        assert_eq!(episode.active_since, day(10));
        assert_eq!(episode.consecutive_true_days, 11);
        assert_eq!(episode.current_level, 7);
    }

    #[test]
    fn test_failed_enqueue_is_retried() {
        let engine = engine();
        let source = store_with(10, |d| if d <= 7 { 480.0 } else { 300.0 });
        let mut store = FlakyStore {
            fail_enqueue: true,
            ..Default::default()
        };

        let failed = engine
            .recompute("p1", day(10), day(10), &source, &mut store, now())
            .unwrap();
        let sleep = failed
            .outcome(day(10))
            .unwrap()
            .patterns
            .iter()
            .find(|p| p.metric == PatternMetric::SleepMinutes)
            .cloned()
            .unwrap();
        assert_eq!(sleep.skip_reason.as_ref().map(|r| r.code()), Some("persistence_failure"));
        assert!(store.inner.notifications.is_empty());
        let stored = store
            .active_episode("p1", PatternMetric::SleepMinutes, PatternType::DropVsBaseline)
            .unwrap()
            .unwrap();
        assert_eq!(stored.last_notified_level, None);

        store.fail_enqueue = false;
        let retried = engine
            .recompute("p1", day(10), day(10), &source, &mut store, now())
            .unwrap();
        assert_eq!(retried.notifications_enqueued, 1);
        assert_eq!(store.inner.notifications.len(), 1);
        assert_eq!(store.inner.notifications[0].level, 3);
        assert_eq!(store.inner.episodes.len(), 1);
        assert_eq!(store.inner.episodes[0].last_notified_level, Some(3));
        assert_eq!(store.inner.episodes[0].last_notified_at, Some(now()));
    }

    #[test]
    fn test_failed_snapshot_write_skips_only_that_date() {
        let engine = engine();
        let source = store_with(10, |_| 480.0);
        let mut store = FlakyStore {
            fail_snapshot_on: Some(day(9)),
            ..Default::default()
        };

        let summary = engine
            .recompute("p1", day(8), day(10), &source, &mut store, now())
            .unwrap();

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.computed, 2);
        assert_eq!(summary.skipped, 1);
        let failed = summary.outcome(day(9)).unwrap();
        assert_eq!(failed.status, DateStatus::Skipped);
        assert_eq!(
            failed.skip_reason,
            Some(SkipReason::PersistenceFailure("snapshot table locked".to_string()))
        );
        // Patterns still ran on the failed date
        assert_eq!(failed.patterns.len(), engine.thresholds().metrics.len());

        assert_eq!(summary.outcome(day(10)).unwrap().status, DateStatus::Computed);
        assert!(store.inner.snapshot("p1", day(8)).is_some());
        assert!(store.inner.snapshot("p1", day(9)).is_none());
        assert!(store.inner.snapshot("p1", day(10)).is_some());
    }

    #[test]
    fn test_failed_episode_write_is_recorded_per_pattern() {
        let engine = engine();
        let source = store_with(10, |d| if d <= 7 { 480.0 } else { 300.0 });
        let mut store = FlakyStore {
            fail_episodes: true,
            ..Default::default()
        };

        let summary = engine
            .recompute("p1", day(9), day(10), &source, &mut store, now())
            .unwrap();

        assert_eq!(summary.computed, 2);
        assert_eq!(summary.episodes_opened, 0);
        for date in [day(9), day(10)] {
            let sleep = summary
                .outcome(date)
                .unwrap()
                .patterns
                .iter()
                .find(|p| p.metric == PatternMetric::SleepMinutes)
                .cloned()
                .unwrap();
            assert!(sleep.triggered);
            assert_eq!(sleep.skip_reason.as_ref().map(|r| r.code()), Some("persistence_failure"));
        }
        assert!(store.inner.episodes.is_empty());
        assert!(store.inner.notifications.is_empty());

        // Once writes recover, the next run opens the episode and notifies
        store.fail_episodes = false;
        let recovered = engine
            .recompute("p1", day(10), day(10), &source, &mut store, now())
            .unwrap();
        assert_eq!(recovered.episodes_opened, 1);
        assert_eq!(store.inner.notifications.len(), 1);
    }

    #[test]
    fn test_invalid_requests_are_rejected() {
        let engine = engine();
        let source = MemoryStore::new();
        let mut store = MemoryStore::new();

        let empty = engine.recompute("  ", day(1), day(2), &source, &mut store, now());
        assert!(matches!(empty, Err(ComputeError::InvalidRequest(_))));

        let inverted = engine.recompute("p1", day(5), day(2), &source, &mut store, now());
        assert!(matches!(inverted, Err(ComputeError::InvalidRequest(_))));
    }

    #[test]
    fn test_invalid_settings_fail_at_construction() {
        let settings = EngineSettings {
            hysteresis_band: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            VitalityEngine::builtin(settings),
            Err(ComputeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_score_day_requires_two_pillars() {
        let engine = engine();
        let steps_only = DailyRawMetrics::new("p1", day(1)).with(RawField::Steps, 15000.0);
        assert!(engine.score_day(30, &steps_only).is_none());

        let with_sleep = steps_only.with(RawField::SleepMinutes, 480.0);
        let snapshot = engine.score_day(30, &with_sleep).unwrap();
        assert_eq!(snapshot.pillar(PillarId::Sleep).unwrap().score, 90);
        assert_eq!(snapshot.pillar(PillarId::Movement).unwrap().score, 100);
    }

    #[test]
    fn test_recompute_scores_and_records_insufficient_dates() {
        let engine = engine();
        let mut source = MemoryStore::new();
        source.put_profile(profile("p1", &[]));
        source.add_rows(vec![
            DailyRawMetrics::new("p1", day(1)).with(RawField::Steps, 9000.0),
            DailyRawMetrics::new("p1", day(2))
                .with(RawField::Steps, 9000.0)
                .with(RawField::SleepMinutes, 480.0),
        ]);
        let mut store = MemoryStore::new();

        let summary = engine
            .recompute("p1", day(1), day(2), &source, &mut store, now())
            .unwrap();

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.computed, 1);
        assert_eq!(summary.skipped, 1);
        let first = summary.outcome(day(1)).unwrap();
        assert_eq!(first.status, DateStatus::Skipped);
        assert_eq!(first.skip_reason.as_ref().map(|r| r.code()), Some("insufficient_data"));
        assert!(store.snapshot("p1", day(1)).is_none());
        assert!(store.snapshot("p1", day(2)).is_some());
        // One pattern result per configured key, each short of history
        assert_eq!(first.patterns.len(), engine.thresholds().metrics.len());
        assert!(first.patterns.iter().all(|p| !p.triggered));
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let engine = engine();
        let source = store_with(10, |d| if d <= 7 { 480.0 } else { 300.0 });
        let mut store = MemoryStore::new();

        engine
            .recompute("p1", day(10), day(10), &source, &mut store, now())
            .unwrap();
        let first_snapshot = store.snapshot("p1", day(10)).unwrap().clone();
        let first_episodes = store.episodes.clone();

        let summary = engine
            .recompute("p1", day(10), day(10), &source, &mut store, now())
            .unwrap();

        assert_eq!(store.snapshot("p1", day(10)).unwrap(), &first_snapshot);
        assert_eq!(store.snapshots.len(), 1);
        assert_eq!(store.episodes, first_episodes);
        assert_eq!(store.episodes.len(), 1);
        assert_eq!(store.notifications.len(), 1);
        assert_eq!(summary.notifications_enqueued, 0);
    }

    #[test]
    fn test_sleep_drop_opens_episode_and_notifies_caregiver() {
        let engine = engine();
        let source = store_with(10, |d| if d <= 7 { 480.0 } else { 300.0 });
        let mut store = MemoryStore::new();

        let summary = engine
            .recompute("p1", day(1), day(10), &source, &mut store, now())
            .unwrap();

        assert_eq!(summary.episodes_opened, 1);
        let episodes = store.episodes_for("p1", PatternMetric::SleepMinutes, PatternType::DropVsBaseline);
        assert_eq!(episodes.len(), 1);
        assert!(episodes[0].is_active());
        // First true on day 9, whose recent window starts on day 7
        assert_eq!(episodes[0].active_since, day(7));

        let notifications = store.take_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].recipient_id, "caregiver");
        assert_eq!(notifications[0].subject_person_id, "p1");
        assert_eq!(notifications[0].level, 3);
    }

    #[test]
    fn test_shadow_mode_tracks_without_notifying() {
        let settings = EngineSettings {
            shadow_mode: true,
            ..Default::default()
        };
        let engine = VitalityEngine::builtin(settings).unwrap();
        let source = store_with(10, |d| if d <= 7 { 480.0 } else { 300.0 });
        let mut store = MemoryStore::new();

        engine
            .recompute("p1", day(1), day(10), &source, &mut store, now())
            .unwrap();
        assert_eq!(store.episodes.len(), 1);
        assert!(store.notifications.is_empty());
    }

    #[test]
    fn test_fetch_failure_skips_every_date() {
        let engine = engine();
        let mut store = MemoryStore::new();
        let summary = engine
            .recompute("p1", day(1), day(3), &FailingSource, &mut store, now())
            .unwrap();

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.skipped, 3);
        assert!(summary.dates.iter().all(|d| d.skip_reason
            == Some(SkipReason::FetchFailure("connection refused".to_string()))));
        assert!(store.snapshots.is_empty());
    }

    #[test]
    fn test_snooze_and_dismiss_require_active_episode() {
        let engine = engine();
        let source = store_with(10, |d| if d <= 7 { 480.0 } else { 300.0 });
        let mut store = MemoryStore::new();

        let missing = engine.snooze_episode(
            &mut store,
            "p1",
            PatternMetric::SleepMinutes,
            PatternType::DropVsBaseline,
            now(),
        );
        assert!(matches!(missing, Err(ComputeError::InvalidRequest(_))));

        engine
            .recompute("p1", day(1), day(10), &source, &mut store, now())
            .unwrap();
        let snoozed = engine
            .snooze_episode(
                &mut store,
                "p1",
                PatternMetric::SleepMinutes,
                PatternType::DropVsBaseline,
                now() + Duration::days(3),
            )
            .unwrap();
        assert_eq!(snoozed.snoozed_until, Some(now() + Duration::days(3)));

        let dismissed = engine
            .dismiss_episode(
                &mut store,
                "p1",
                PatternMetric::SleepMinutes,
                PatternType::DropVsBaseline,
                now(),
            )
            .unwrap();
        assert_eq!(dismissed.dismissed_at, Some(now()));
        assert_eq!(store.episodes[0].dismissed_at, Some(now()));
    }

    #[test]
    fn test_evaluate_pattern_unknown_key() {
        let mut thresholds = ThresholdConfig::builtin();
        thresholds
            .metrics
            .retain(|m| m.metric != PatternMetric::BreathingRate);
        let engine = VitalityEngine::new(ScoringSchema::builtin(), thresholds, EngineSettings::default()).unwrap();
        let result = engine.evaluate_pattern(
            PatternMetric::BreathingRate,
            PatternType::RiseVsBaseline,
            &[],
            day(1),
        );
        assert!(matches!(result, Err(ComputeError::InvalidRequest(_))));
    }
}
