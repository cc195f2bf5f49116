//! Episode lifecycle management
//!
//! Tracks one continuous run of a pattern per (person, metric, pattern type) key. An
//! episode appears when a pattern turns true, escalates while it stays true, and resolves
//! only after a run of clean days. Notification requests are emitted on strict level
//! escalation.

use crate::baseline::BaselineCalculator;
use crate::error::ComputeError;
use crate::schema::MetricThresholds;
use crate::threshold::{PatternEvaluation, ThresholdEvaluator};
use crate::types::{
    AlertEpisode, DailyValue, EpisodeResolution, EpisodeStatus, NotificationRequest,
    PatternMetric, PatternType, Severity,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Maximum days walked back when locating an episode start
pub const DEFAULT_WALKBACK_DAYS: i64 = 40;
/// Relative deviation band a day must sit in to count as clean
pub const DEFAULT_HYSTERESIS_BAND: f64 = 0.05;

/// Escalation level for a run length in days
pub fn level_for_days(days: u32) -> u32 {
    match days {
        d if d >= 21 => 21,
        d if d >= 14 => 14,
        d if d >= 7 => 7,
        _ => 3,
    }
}

/// Clean days required to resolve an episode at `level`
pub fn clean_days_required(level: u32) -> u32 {
    if level >= 14 {
        3
    } else {
        2
    }
}

/// Pattern state on arbitrary past dates, used for walk-back and clean-day checks
pub trait PatternHistory {
    fn pattern_on(&mut self, date: NaiveDate) -> PatternEvaluation;
}

/// History backed by one metric's daily series, memoizing each date's evaluation
pub struct SeriesHistory<'a> {
    calculator: &'a BaselineCalculator,
    series: &'a [DailyValue],
    thresholds: &'a MetricThresholds,
    cache: BTreeMap<NaiveDate, PatternEvaluation>,
}

impl<'a> SeriesHistory<'a> {
    pub fn new(
        calculator: &'a BaselineCalculator,
        series: &'a [DailyValue],
        thresholds: &'a MetricThresholds,
    ) -> Self {
        Self {
            calculator,
            series,
            thresholds,
            cache: BTreeMap::new(),
        }
    }
}

impl PatternHistory for SeriesHistory<'_> {
    fn pattern_on(&mut self, date: NaiveDate) -> PatternEvaluation {
        let (calculator, series, thresholds) = (self.calculator, self.series, self.thresholds);
        self.cache
            .entry(date)
            .or_insert_with(|| ThresholdEvaluator::evaluate_series(calculator, series, date, thresholds))
            .clone()
    }
}

/// Identity and delivery context for one episode evaluation
#[derive(Debug, Clone)]
pub struct EpisodeKey<'a> {
    pub person_id: &'a str,
    pub metric: PatternMetric,
    pub pattern_type: PatternType,
    /// Notification recipients, already resolved from the profile
    pub recipients: &'a [String],
}

/// What happened to the episode on one evaluation date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeTransition {
    /// No active episode and pattern false
    Quiet,
    Appeared,
    Persisted,
    /// Pattern false but not enough clean days to resolve
    Held,
    Resolved,
    /// Evaluation date precedes the episode's last evaluation
    Stale,
}

/// Result of one episode evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeOutcome {
    pub transition: EpisodeTransition,
    /// Episode state after evaluation, if an episode is involved
    pub episode: Option<AlertEpisode>,
    /// Previously active episode replaced by a new start date
    pub superseded: Option<AlertEpisode>,
    pub notifications: Vec<NotificationRequest>,
    /// Whether `episode` differs from what was loaded and needs an upsert
    pub changed: bool,
}

impl EpisodeOutcome {
    fn unchanged(transition: EpisodeTransition, episode: Option<AlertEpisode>) -> Self {
        Self {
            transition,
            episode,
            superseded: None,
            notifications: Vec::new(),
            changed: false,
        }
    }
}

/// State machine for alert episodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeManager {
    pub walkback_days: i64,
    pub hysteresis_band: f64,
    /// Track episodes without enqueueing notifications
    pub shadow_mode: bool,
}

impl Default for EpisodeManager {
    fn default() -> Self {
        Self {
            walkback_days: DEFAULT_WALKBACK_DAYS,
            hysteresis_band: DEFAULT_HYSTERESIS_BAND,
            shadow_mode: false,
        }
    }
}

impl EpisodeManager {
    /// Advance the episode for `key` to `date`.
    ///
    /// `latest` is the key's most recently evaluated episode, active or resolved. Dates
    /// before its last evaluation are stale and leave state untouched, so replaying a
    /// range converges instead of reopening finished episodes.
    pub fn evaluate(
        &self,
        key: &EpisodeKey<'_>,
        latest: Option<AlertEpisode>,
        date: NaiveDate,
        history: &mut dyn PatternHistory,
        now: DateTime<Utc>,
    ) -> EpisodeOutcome {
        if let Some(episode) = &latest {
            if date < episode.last_evaluated_date {
                debug!(
                    episode_id = %episode.id,
                    date = %date,
                    last_evaluated = %episode.last_evaluated_date,
                    "Skipping stale episode evaluation"
                );
                return EpisodeOutcome::unchanged(EpisodeTransition::Stale, latest);
            }
        }
        let existing = latest.filter(|e| e.is_active());

        let today = history.pattern_on(date);
        if today.triggered {
            self.on_true(key, existing, &today, history, now)
        } else {
            match existing {
                Some(episode) => self.on_false(episode, date, history),
                None => EpisodeOutcome::unchanged(EpisodeTransition::Quiet, None),
            }
        }
    }

    fn on_true(
        &self,
        key: &EpisodeKey<'_>,
        existing: Option<AlertEpisode>,
        today: &PatternEvaluation,
        history: &mut dyn PatternHistory,
        now: DateTime<Utc>,
    ) -> EpisodeOutcome {
        let date = today.date;
        let (walked_start, hit_cap) = self.find_active_since(today, history);

        let mut superseded = None;
        let (mut episode, transition) = match existing {
            Some(current)
                if current.active_since == walked_start
                    || (hit_cap && current.active_since < walked_start) =>
            {
                (current, EpisodeTransition::Persisted)
            }
            Some(mut current) => {
                info!(
                    episode_id = %current.id,
                    person_id = key.person_id,
                    metric = key.metric.as_str(),
                    old_start = %current.active_since,
                    new_start = %walked_start,
                    "Episode superseded"
                );
                current.status = EpisodeStatus::Resolved;
                current.resolution = Some(EpisodeResolution::Superseded);
                current.resolved_on = Some(date);
                current.last_evaluated_date = date;
                superseded = Some(current);
                (new_episode(key, walked_start, date), EpisodeTransition::Appeared)
            }
            None => (new_episode(key, walked_start, date), EpisodeTransition::Appeared),
        };
        let before = (transition == EpisodeTransition::Persisted).then(|| episode.clone());

        let days = (date - episode.active_since).num_days() + 1;
        episode.consecutive_true_days = u32::try_from(days.max(1)).unwrap_or(u32::MAX);
        episode.current_level = level_for_days(episode.consecutive_true_days);
        episode.severity = Severity::from_level(episode.current_level);
        episode.last_evaluated_date = date;
        if let Some(computation) = &today.computation {
            episode.baseline_value = Some(computation.baseline_avg);
            episode.recent_value = Some(computation.recent_avg);
        }
        episode.deviation = today.deviation;

        let notifications = self.notify(key, &mut episode, date, now);

        if transition == EpisodeTransition::Appeared {
            info!(
                episode_id = %episode.id,
                person_id = key.person_id,
                metric = key.metric.as_str(),
                pattern = key.pattern_type.as_str(),
                active_since = %episode.active_since,
                level = episode.current_level,
                "Episode appeared"
            );
        } else if before.as_ref().map(|b| b.current_level) != Some(episode.current_level) {
            info!(
                episode_id = %episode.id,
                level = episode.current_level,
                severity = episode.severity.as_str(),
                "Episode escalated"
            );
        }

        let changed = before.as_ref() != Some(&episode);
        EpisodeOutcome {
            transition,
            episode: Some(episode),
            superseded,
            notifications,
            changed,
        }
    }

    fn on_false(
        &self,
        mut episode: AlertEpisode,
        date: NaiveDate,
        history: &mut dyn PatternHistory,
    ) -> EpisodeOutcome {
        let before = episode.clone();
        let required = clean_days_required(episode.current_level);
        let all_clean = (0..i64::from(required)).all(|back| {
            history
                .pattern_on(date - Duration::days(back))
                .is_clean(self.hysteresis_band)
        });

        episode.last_evaluated_date = date;
        let transition = if all_clean {
            episode.status = EpisodeStatus::Resolved;
            episode.resolution = Some(EpisodeResolution::Cleared);
            episode.resolved_on = Some(date);
            info!(
                episode_id = %episode.id,
                person_id = %episode.person_id,
                metric = episode.metric.as_str(),
                clean_days = required,
                "Episode resolved"
            );
            EpisodeTransition::Resolved
        } else {
            debug!(
                episode_id = %episode.id,
                date = %date,
                required_clean_days = required,
                "Episode held active"
            );
            EpisodeTransition::Held
        };

        let changed = episode != before;
        EpisodeOutcome {
            transition,
            episode: Some(episode),
            superseded: None,
            notifications: Vec::new(),
            changed,
        }
    }

    /// Walk back from the evaluation date while the pattern stays true. Returns the
    /// earliest recent-window start seen and whether the lookback cap stopped the walk.
    fn find_active_since(
        &self,
        today: &PatternEvaluation,
        history: &mut dyn PatternHistory,
    ) -> (NaiveDate, bool) {
        let recent_start = |ev: &PatternEvaluation| {
            ev.computation
                .as_ref()
                .map_or(ev.date, |c| c.recent_start)
        };

        let mut earliest = recent_start(today);
        let mut day = today.date;
        loop {
            let prev = day - Duration::days(1);
            if (today.date - prev).num_days() > self.walkback_days {
                return (earliest, true);
            }
            let evaluation = history.pattern_on(prev);
            if !evaluation.triggered {
                return (earliest, false);
            }
            earliest = earliest.min(recent_start(&evaluation));
            day = prev;
        }
    }

    fn notify(
        &self,
        key: &EpisodeKey<'_>,
        episode: &mut AlertEpisode,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Vec<NotificationRequest> {
        if episode.current_level <= episode.last_notified_level.unwrap_or(0) {
            return Vec::new();
        }
        if self.shadow_mode {
            debug!(episode_id = %episode.id, level = episode.current_level, "Shadow mode, notification suppressed");
            return Vec::new();
        }
        if episode.dismissed_at.is_some() || episode.snoozed_until.map_or(false, |until| until > now) {
            debug!(episode_id = %episode.id, level = episode.current_level, "Episode muted, notification suppressed");
            return Vec::new();
        }

        episode.last_notified_level = Some(episode.current_level);
        episode.last_notified_at = Some(now);

        key.recipients
            .iter()
            .map(|recipient| NotificationRequest {
                recipient_id: recipient.clone(),
                subject_person_id: key.person_id.to_string(),
                metric: key.metric,
                pattern_type: key.pattern_type,
                level: episode.current_level,
                severity: episode.severity,
                episode_id: episode.id,
                episode_start: episode.active_since,
                evaluation_date: date,
            })
            .collect()
    }

    /// Suppress notifications for an active episode until `until`
    pub fn snooze(episode: &mut AlertEpisode, until: DateTime<Utc>) -> Result<(), ComputeError> {
        ensure_active(episode)?;
        episode.snoozed_until = Some(until);
        Ok(())
    }

    /// Suppress all further notifications for an active episode
    pub fn dismiss(episode: &mut AlertEpisode, at: DateTime<Utc>) -> Result<(), ComputeError> {
        ensure_active(episode)?;
        episode.dismissed_at = Some(at);
        Ok(())
    }
}

fn ensure_active(episode: &AlertEpisode) -> Result<(), ComputeError> {
    if episode.is_active() {
        Ok(())
    } else {
        Err(ComputeError::InvalidRequest(format!(
            "episode {} is not active",
            episode.id
        )))
    }
}

fn new_episode(key: &EpisodeKey<'_>, active_since: NaiveDate, date: NaiveDate) -> AlertEpisode {
    AlertEpisode {
        id: Uuid::new_v4(),
        person_id: key.person_id.to_string(),
        metric: key.metric,
        pattern_type: key.pattern_type,
        status: EpisodeStatus::Active,
        active_since,
        last_evaluated_date: date,
        consecutive_true_days: 1,
        current_level: 3,
        severity: Severity::Watch,
        last_notified_level: None,
        last_notified_at: None,
        snoozed_until: None,
        dismissed_at: None,
        resolved_on: None,
        resolution: None,
        baseline_value: None,
        recent_value: None,
        deviation: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::Insufficiency;
    use crate::schema::ThresholdRule;
    use crate::threshold::PatternReason;
    use crate::types::BaselineComputation;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap() + Duration::days(n - 1)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 6, 0, 0).unwrap()
    }

    /// Scripted history: `(triggered, deviation)` per date, insufficient otherwise
    struct Scripted(BTreeMap<NaiveDate, (bool, f64)>);

    impl Scripted {
        fn new() -> Self {
            Scripted(BTreeMap::new())
        }

        fn set(mut self, from: i64, to: i64, triggered: bool, deviation: f64) -> Self {
            for n in from..=to {
                self.0.insert(day(n), (triggered, deviation));
            }
            self
        }
    }

    impl PatternHistory for Scripted {
        fn pattern_on(&mut self, date: NaiveDate) -> PatternEvaluation {
            match self.0.get(&date) {
                Some(&(triggered, deviation)) => {
                    let computation = BaselineComputation {
                        baseline_avg: 480.0,
                        recent_avg: 480.0 * (1.0 + deviation),
                        baseline_days: 7,
                        recent_days: 3,
                        baseline_start: date - Duration::days(9),
                        baseline_end: date - Duration::days(3),
                        recent_start: date - Duration::days(2),
                        recent_end: date,
                    };
                    PatternEvaluation {
                        date,
                        triggered,
                        reason: if triggered {
                            PatternReason::RuleMatched {
                                rule: ThresholdRule::PercentDropAtLeast(0.2),
                            }
                        } else {
                            PatternReason::BelowThreshold
                        },
                        deviation: Some(deviation),
                        computation: Some(computation),
                    }
                }
                None => PatternEvaluation {
                    date,
                    triggered: false,
                    reason: PatternReason::InsufficientData {
                        detail: Insufficiency::TooFewPoints { have: 0, need: 7 },
                    },
                    deviation: None,
                    computation: None,
                },
            }
        }
    }

    fn recipients() -> Vec<String> {
        vec!["p1".to_string()]
    }

    fn key(recipients: &[String]) -> EpisodeKey<'_> {
        EpisodeKey {
            person_id: "p1",
            metric: PatternMetric::SleepMinutes,
            pattern_type: PatternType::DropVsBaseline,
            recipients,
        }
    }

    fn active(active_since: NaiveDate, last: NaiveDate, level: u32, notified: Option<u32>) -> AlertEpisode {
        let mut episode = new_episode(&key(&recipients()), active_since, last);
        episode.current_level = level;
        episode.severity = Severity::from_level(level);
        episode.consecutive_true_days = ((last - active_since).num_days() + 1) as u32;
        episode.last_notified_level = notified;
        episode
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(level_for_days(1), 3);
        assert_eq!(level_for_days(6), 3);
        assert_eq!(level_for_days(7), 7);
        assert_eq!(level_for_days(13), 7);
        assert_eq!(level_for_days(14), 14);
        assert_eq!(level_for_days(20), 14);
        assert_eq!(level_for_days(21), 21);
        assert_eq!(level_for_days(90), 21);
    }

    #[test]
    fn test_pattern_appears_with_walked_back_start() {
        let recipients = recipients();
        let mut history = Scripted::new().set(1, 9, false, 0.0).set(10, 10, true, -0.25);
        let outcome = EpisodeManager::default().evaluate(&key(&recipients), None, day(10), &mut history, now());

        assert_eq!(outcome.transition, EpisodeTransition::Appeared);
        assert!(outcome.changed);
        let episode = outcome.episode.unwrap();
        assert_eq!(episode.active_since, day(8));
        assert_eq!(episode.consecutive_true_days, 3);
        assert_eq!(episode.current_level, 3);
        assert_eq!(episode.severity, Severity::Watch);
        assert_eq!(episode.deviation, Some(-0.25));
        assert_eq!(outcome.notifications.len(), 1);
        assert_eq!(outcome.notifications[0].level, 3);
        assert_eq!(outcome.notifications[0].episode_start, day(8));
        assert_eq!(episode.last_notified_level, Some(3));
    }

    #[test]
    fn test_seven_days_true_is_attention() {
        let recipients = recipients();
        // True on days 6..=10, so the earliest recent window starts on day 4
        let mut history = Scripted::new().set(1, 5, false, 0.0).set(6, 10, true, -0.3);
        let outcome = EpisodeManager::default().evaluate(&key(&recipients), None, day(10), &mut history, now());

        let episode = outcome.episode.unwrap();
        assert_eq!(episode.active_since, day(4));
        assert_eq!(episode.consecutive_true_days, 7);
        assert_eq!(episode.current_level, 7);
        assert_eq!(episode.severity, Severity::Attention);
    }

    #[test]
    fn test_twenty_one_days_true_is_critical() {
        let recipients = recipients();
        let mut history = Scripted::new().set(1, 2, false, 0.0).set(3, 30, true, -0.3);
        let existing = active(day(1), day(29), 14, Some(14));
        let outcome = EpisodeManager::default().evaluate(
            &key(&recipients),
            Some(existing.clone()),
            day(30),
            &mut history,
            now(),
        );

        assert_eq!(outcome.transition, EpisodeTransition::Persisted);
        let episode = outcome.episode.unwrap();
        assert_eq!(episode.id, existing.id);
        assert_eq!(episode.consecutive_true_days, 30);
        assert_eq!(episode.current_level, 21);
        assert_eq!(episode.severity, Severity::Critical);
        assert_eq!(outcome.notifications.len(), 1);
    }

    #[test]
    fn test_same_level_does_not_renotify() {
        let recipients = recipients();
        // Run started day 1 (first true evaluation day 3); day 9 is 9 days in -> level 7
        let mut history = Scripted::new().set(3, 9, true, -0.3);
        let existing = active(day(1), day(8), 7, Some(7));
        let outcome = EpisodeManager::default().evaluate(
            &key(&recipients),
            Some(existing),
            day(9),
            &mut history,
            now(),
        );
        assert_eq!(outcome.episode.unwrap().current_level, 7);
        assert!(outcome.notifications.is_empty());
    }

    #[test]
    fn test_escalation_to_fourteen_notifies_once() {
        let recipients = vec!["caregiver-a".to_string(), "caregiver-b".to_string()];
        let mut history = Scripted::new().set(3, 14, true, -0.3);
        let existing = active(day(1), day(13), 7, Some(7));
        let outcome = EpisodeManager::default().evaluate(
            &key(&recipients),
            Some(existing),
            day(14),
            &mut history,
            now(),
        );
        let episode = outcome.episode.unwrap();
        assert_eq!(episode.current_level, 14);
        assert_eq!(episode.last_notified_level, Some(14));
        // Exactly one request per recipient for the new level
        assert_eq!(outcome.notifications.len(), 2);
        assert!(outcome.notifications.iter().all(|n| n.level == 14));
        assert_eq!(outcome.notifications[0].recipient_id, "caregiver-a");
        assert_eq!(outcome.notifications[0].subject_person_id, "p1");
    }

    #[test]
    fn test_shadow_mode_suppresses_without_advancing() {
        let recipients = recipients();
        let manager = EpisodeManager {
            shadow_mode: true,
            ..Default::default()
        };
        let mut history = Scripted::new().set(10, 10, true, -0.3);
        let outcome = manager.evaluate(&key(&recipients), None, day(10), &mut history, now());
        assert!(outcome.notifications.is_empty());
        let episode = outcome.episode.unwrap();
        assert!(episode.is_active());
        assert_eq!(episode.last_notified_level, None);
    }

    #[test]
    fn test_snoozed_episode_notifies_after_snooze_lapses() {
        let recipients = recipients();
        let mut history = Scripted::new().set(3, 14, true, -0.3);
        let mut existing = active(day(1), day(13), 7, Some(7));
        EpisodeManager::snooze(&mut existing, now() + Duration::days(1)).unwrap();

        let manager = EpisodeManager::default();
        let muted = manager.evaluate(&key(&recipients), Some(existing.clone()), day(14), &mut history, now());
        assert!(muted.notifications.is_empty());
        assert_eq!(muted.episode.as_ref().unwrap().last_notified_level, Some(7));

        let later = now() + Duration::days(2);
        let outcome = manager.evaluate(&key(&recipients), muted.episode, day(14), &mut history, later);
        assert_eq!(outcome.notifications.len(), 1);
    }

    #[test]
    fn test_dismissed_episode_stays_silent() {
        let recipients = recipients();
        let mut history = Scripted::new().set(3, 14, true, -0.3);
        let mut existing = active(day(1), day(13), 7, Some(7));
        EpisodeManager::dismiss(&mut existing, now()).unwrap();
        let outcome = EpisodeManager::default().evaluate(&key(&recipients), Some(existing), day(14), &mut history, now());
        assert_eq!(outcome.episode.unwrap().current_level, 14);
        assert!(outcome.notifications.is_empty());
    }

    #[test]
    fn test_snooze_rejects_resolved_episode() {
        let mut episode = active(day(1), day(5), 3, Some(3));
        episode.status = EpisodeStatus::Resolved;
        assert!(matches!(
            EpisodeManager::snooze(&mut episode, now()),
            Err(ComputeError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_level_21_needs_three_clean_days() {
        let recipients = recipients();
        let manager = EpisodeManager::default();
        let existing = active(day(1), day(30), 21, Some(21));

        // Two clean days (31, 32) are not enough at level 21
        let mut history = Scripted::new()
            .set(3, 30, true, -0.3)
            .set(31, 32, false, -0.02);
        let held = manager.evaluate(&key(&recipients), Some(existing.clone()), day(32), &mut history, now());
        assert_eq!(held.transition, EpisodeTransition::Held);
        let held_episode = held.episode.unwrap();
        assert!(held_episode.is_active());
        assert_eq!(held_episode.last_evaluated_date, day(32));

        // A third clean day resolves it
        let mut history = Scripted::new()
            .set(3, 30, true, -0.3)
            .set(31, 33, false, 0.01);
        let resolved = manager.evaluate(&key(&recipients), Some(held_episode), day(33), &mut history, now());
        assert_eq!(resolved.transition, EpisodeTransition::Resolved);
        let episode = resolved.episode.unwrap();
        assert_eq!(episode.status, EpisodeStatus::Resolved);
        assert_eq!(episode.resolution, Some(EpisodeResolution::Cleared));
        assert_eq!(episode.resolved_on, Some(day(33)));
        assert!(resolved.notifications.is_empty());
    }

    #[test]
    fn test_low_level_resolves_after_two_clean_days() {
        let recipients = recipients();
        let existing = active(day(8), day(10), 3, Some(3));
        let mut history = Scripted::new().set(10, 10, true, -0.3).set(11, 12, false, 0.0);
        let outcome = EpisodeManager::default().evaluate(&key(&recipients), Some(existing), day(12), &mut history, now());
        assert_eq!(outcome.transition, EpisodeTransition::Resolved);
    }

    #[test]
    fn test_false_day_outside_band_holds_episode() {
        let recipients = recipients();
        let existing = active(day(8), day(10), 3, Some(3));
        // Day 11 is false but 10% below baseline: not clean
        let mut history = Scripted::new()
            .set(10, 10, true, -0.3)
            .set(11, 11, false, -0.10)
            .set(12, 12, false, 0.0);
        let outcome = EpisodeManager::default().evaluate(&key(&recipients), Some(existing), day(12), &mut history, now());
        assert_eq!(outcome.transition, EpisodeTransition::Held);
        assert!(outcome.episode.unwrap().is_active());
    }

    #[test]
    fn test_insufficient_day_is_not_clean() {
        let recipients = recipients();
        let existing = active(day(8), day(10), 3, Some(3));
        // Day 11 has no evaluation data
        let mut history = Scripted::new().set(10, 10, true, -0.3).set(12, 12, false, 0.0);
        let outcome = EpisodeManager::default().evaluate(&key(&recipients), Some(existing), day(12), &mut history, now());
        assert_eq!(outcome.transition, EpisodeTransition::Held);
    }

    #[test]
    fn test_restart_after_gap_supersedes_old_episode() {
        let recipients = recipients();
        let existing = active(day(1), day(10), 7, Some(7));
        // Run broke on day 11 (held, not clean); a new run starts on day 12
        let mut history = Scripted::new()
            .set(3, 10, true, -0.3)
            .set(11, 11, false, -0.1)
            .set(12, 12, true, -0.3);
        let outcome = EpisodeManager::default().evaluate(
            &key(&recipients),
            Some(existing.clone()),
            day(12),
            &mut history,
            now(),
        );

        assert_eq!(outcome.transition, EpisodeTransition::Appeared);
        let old = outcome.superseded.unwrap();
        assert_eq!(old.id, existing.id);
        assert_eq!(old.status, EpisodeStatus::Resolved);
        assert_eq!(old.resolution, Some(EpisodeResolution::Superseded));
        let new = outcome.episode.unwrap();
        assert_ne!(new.id, existing.id);
        assert_eq!(new.active_since, day(10));
        assert_eq!(outcome.notifications.len(), 1);
    }

    #[test]
    fn test_walkback_cap_keeps_older_episode() {
        let recipients = recipients();
        let existing = active(day(1), day(59), 21, Some(21));
        let mut history = Scripted::new().set(3, 60, true, -0.3);
        let outcome = EpisodeManager::default().evaluate(
            &key(&recipients),
            Some(existing.clone()),
            day(60),
            &mut history,
            now(),
        );
        assert_eq!(outcome.transition, EpisodeTransition::Persisted);
        let episode = outcome.episode.unwrap();
        assert_eq!(episode.id, existing.id);
        assert_eq!(episode.active_since, day(1));
        assert_eq!(episode.consecutive_true_days, 60);
        assert!(outcome.superseded.is_none());
    }

    #[test]
    fn test_reevaluating_same_date_is_idempotent() {
        let recipients = recipients();
        let manager = EpisodeManager::default();
        let mut history = Scripted::new().set(1, 9, false, 0.0).set(10, 10, true, -0.25);
        let first = manager.evaluate(&key(&recipients), None, day(10), &mut history, now());
        let second = manager.evaluate(&key(&recipients), first.episode.clone(), day(10), &mut history, now());

        assert_eq!(second.transition, EpisodeTransition::Persisted);
        assert!(!second.changed);
        assert!(second.notifications.is_empty());
        assert_eq!(second.episode, first.episode);
    }

    #[test]
    fn test_stale_evaluation_leaves_episode_untouched() {
        let recipients = recipients();
        let existing = active(day(1), day(20), 14, Some(14));
        let mut history = Scripted::new().set(3, 20, true, -0.3);
        let outcome = EpisodeManager::default().evaluate(&key(&recipients), Some(existing.clone()), day(12), &mut history, now());
        assert_eq!(outcome.transition, EpisodeTransition::Stale);
        assert!(!outcome.changed);
        assert_eq!(outcome.episode, Some(existing));
    }

    #[test]
    fn test_resolved_episode_blocks_replay_of_older_dates() {
        let recipients = recipients();
        let mut resolved = active(day(8), day(12), 3, Some(3));
        resolved.status = EpisodeStatus::Resolved;
        resolved.resolution = Some(EpisodeResolution::Cleared);
        resolved.resolved_on = Some(day(12));

        let mut history = Scripted::new().set(1, 9, false, 0.0).set(10, 10, true, -0.3);
        let replay = EpisodeManager::default().evaluate(&key(&recipients), Some(resolved.clone()), day(10), &mut history, now());
        assert_eq!(replay.transition, EpisodeTransition::Stale);
        assert!(replay.notifications.is_empty());

        // A later run is a new episode
        let mut history = Scripted::new().set(13, 15, false, 0.0).set(16, 16, true, -0.3);
        let fresh = EpisodeManager::default().evaluate(&key(&recipients), Some(resolved.clone()), day(16), &mut history, now());
        assert_eq!(fresh.transition, EpisodeTransition::Appeared);
        assert!(fresh.superseded.is_none());
        assert_ne!(fresh.episode.unwrap().id, resolved.id);
    }

    #[test]
    fn test_series_history_drives_real_evaluation() {
        let thresholds = MetricThresholds {
            metric: PatternMetric::SleepMinutes,
            pattern_type: PatternType::DropVsBaseline,
            rules: vec![ThresholdRule::PercentDropAtLeast(0.25)],
        };
        let mut values: Vec<DailyValue> = (1..=7).map(|n| DailyValue::new(day(n), 480.0)).collect();
        values.extend((8..=10).map(|n| DailyValue::new(day(n), 360.0)));
        let calculator = BaselineCalculator::default();
        let mut history = SeriesHistory::new(&calculator, &values, &thresholds);
        let recipients = recipients();

        let outcome = EpisodeManager::default().evaluate(&key(&recipients), None, day(10), &mut history, now());
        let episode = outcome.episode.unwrap();
        assert_eq!(episode.active_since, day(8));
        assert_eq!(episode.baseline_value, Some(480.0));
        assert_eq!(episode.recent_value, Some(360.0));
    }
}
