//! Core types for the Synheart Vitality engine
//!
//! This module defines the data structures that flow through the scoring and pattern
//! stages: raw daily rows, derived sub-metric values, snapshots, daily series, alert
//! episodes and notification requests.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Age bucket used to select person-appropriate scoring ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeGroup {
    Young,
    Middle,
    Senior,
    Elderly,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 4] = [
        AgeGroup::Young,
        AgeGroup::Middle,
        AgeGroup::Senior,
        AgeGroup::Elderly,
    ];

    /// Resolve the age group for an age in whole years
    pub fn from_age(age: u32) -> Self {
        match age {
            0..=39 => AgeGroup::Young,
            40..=59 => AgeGroup::Middle,
            60..=74 => AgeGroup::Senior,
            _ => AgeGroup::Elderly,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeGroup::Young => "young",
            AgeGroup::Middle => "middle",
            AgeGroup::Senior => "senior",
            AgeGroup::Elderly => "elderly",
        }
    }
}

/// Age in whole years on `on` for someone born on `birth_date`
pub fn age_on(birth_date: NaiveDate, on: NaiveDate) -> Option<u32> {
    if on < birth_date {
        return None;
    }
    let mut years = on.year() - birth_date.year();
    if (on.month(), on.day()) < (birth_date.month(), birth_date.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

/// Top-level wellness category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PillarId {
    Sleep,
    Movement,
    Stress,
}

impl PillarId {
    pub const ALL: [PillarId; 3] = [PillarId::Sleep, PillarId::Movement, PillarId::Stress];

    pub fn as_str(&self) -> &'static str {
        match self {
            PillarId::Sleep => "sleep",
            PillarId::Movement => "movement",
            PillarId::Stress => "stress",
        }
    }
}

/// Individually scored quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubMetricId {
    /// Total sleep (hours)
    SleepDuration,
    /// Deep + REM share of total sleep (percent)
    RestorativeSleep,
    /// Sleep / time in bed (percent)
    SleepEfficiency,
    Steps,
    MovementMinutes,
    ActiveCalories,
    /// Heart rate variability (ms)
    Hrv,
    /// Resting heart rate (bpm)
    RestingHeartRate,
    /// Breaths per minute
    BreathingRate,
}

impl SubMetricId {
    pub const ALL: [SubMetricId; 9] = [
        SubMetricId::SleepDuration,
        SubMetricId::RestorativeSleep,
        SubMetricId::SleepEfficiency,
        SubMetricId::Steps,
        SubMetricId::MovementMinutes,
        SubMetricId::ActiveCalories,
        SubMetricId::Hrv,
        SubMetricId::RestingHeartRate,
        SubMetricId::BreathingRate,
    ];

    /// The pillar this sub-metric belongs to
    pub fn pillar(&self) -> PillarId {
        match self {
            SubMetricId::SleepDuration
            | SubMetricId::RestorativeSleep
            | SubMetricId::SleepEfficiency => PillarId::Sleep,
            SubMetricId::Steps | SubMetricId::MovementMinutes | SubMetricId::ActiveCalories => {
                PillarId::Movement
            }
            SubMetricId::Hrv | SubMetricId::RestingHeartRate | SubMetricId::BreathingRate => {
                PillarId::Stress
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubMetricId::SleepDuration => "sleep_duration",
            SubMetricId::RestorativeSleep => "restorative_sleep",
            SubMetricId::SleepEfficiency => "sleep_efficiency",
            SubMetricId::Steps => "steps",
            SubMetricId::MovementMinutes => "movement_minutes",
            SubMetricId::ActiveCalories => "active_calories",
            SubMetricId::Hrv => "hrv",
            SubMetricId::RestingHeartRate => "resting_heart_rate",
            SubMetricId::BreathingRate => "breathing_rate",
        }
    }
}

/// How a raw value maps onto the score curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringDirection {
    OptimalRange,
    HigherIsBetter,
    LowerIsBetter,
}

/// Nullable numeric fields of a daily raw row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawField {
    SleepMinutes,
    TimeInBedMinutes,
    DeepSleepMinutes,
    RemSleepMinutes,
    LightSleepMinutes,
    AwakeMinutes,
    SleepEfficiencyPct,
    Steps,
    MovementMinutes,
    ActiveCalories,
    HrvRmssdMs,
    HrvSdnnMs,
    RestingHrBpm,
    BreathingRate,
}

impl RawField {
    pub const ALL: [RawField; 14] = [
        RawField::SleepMinutes,
        RawField::TimeInBedMinutes,
        RawField::DeepSleepMinutes,
        RawField::RemSleepMinutes,
        RawField::LightSleepMinutes,
        RawField::AwakeMinutes,
        RawField::SleepEfficiencyPct,
        RawField::Steps,
        RawField::MovementMinutes,
        RawField::ActiveCalories,
        RawField::HrvRmssdMs,
        RawField::HrvSdnnMs,
        RawField::RestingHrBpm,
        RawField::BreathingRate,
    ];
}

/// One (person, day, source) row of already-normalized metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRawMetrics {
    pub person_id: String,
    pub date: NaiveDate,
    /// Source device or integration that produced the row
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub sleep_minutes: Option<f64>,
    #[serde(default)]
    pub time_in_bed_minutes: Option<f64>,
    #[serde(default)]
    pub deep_sleep_minutes: Option<f64>,
    #[serde(default)]
    pub rem_sleep_minutes: Option<f64>,
    #[serde(default)]
    pub light_sleep_minutes: Option<f64>,
    #[serde(default)]
    pub awake_minutes: Option<f64>,
    /// Sleep efficiency (percentage, 0-100)
    #[serde(default)]
    pub sleep_efficiency_pct: Option<f64>,
    #[serde(default)]
    pub steps: Option<f64>,
    #[serde(default)]
    pub movement_minutes: Option<f64>,
    #[serde(default)]
    pub active_calories: Option<f64>,
    #[serde(default)]
    pub hrv_rmssd_ms: Option<f64>,
    #[serde(default)]
    pub hrv_sdnn_ms: Option<f64>,
    #[serde(default)]
    pub resting_hr_bpm: Option<f64>,
    /// Breaths per minute
    #[serde(default)]
    pub breathing_rate: Option<f64>,
}

fn default_source() -> String {
    "unknown".to_string()
}

impl DailyRawMetrics {
    /// Create an empty row for a person and day
    pub fn new(person_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            person_id: person_id.into(),
            date,
            source: default_source(),
            sleep_minutes: None,
            time_in_bed_minutes: None,
            deep_sleep_minutes: None,
            rem_sleep_minutes: None,
            light_sleep_minutes: None,
            awake_minutes: None,
            sleep_efficiency_pct: None,
            steps: None,
            movement_minutes: None,
            active_calories: None,
            hrv_rmssd_ms: None,
            hrv_sdnn_ms: None,
            resting_hr_bpm: None,
            breathing_rate: None,
        }
    }

    pub fn get(&self, field: RawField) -> Option<f64> {
        match field {
            RawField::SleepMinutes => self.sleep_minutes,
            RawField::TimeInBedMinutes => self.time_in_bed_minutes,
            RawField::DeepSleepMinutes => self.deep_sleep_minutes,
            RawField::RemSleepMinutes => self.rem_sleep_minutes,
            RawField::LightSleepMinutes => self.light_sleep_minutes,
            RawField::AwakeMinutes => self.awake_minutes,
            RawField::SleepEfficiencyPct => self.sleep_efficiency_pct,
            RawField::Steps => self.steps,
            RawField::MovementMinutes => self.movement_minutes,
            RawField::ActiveCalories => self.active_calories,
            RawField::HrvRmssdMs => self.hrv_rmssd_ms,
            RawField::HrvSdnnMs => self.hrv_sdnn_ms,
            RawField::RestingHrBpm => self.resting_hr_bpm,
            RawField::BreathingRate => self.breathing_rate,
        }
    }

    pub fn set(&mut self, field: RawField, value: Option<f64>) {
        let slot = match field {
            RawField::SleepMinutes => &mut self.sleep_minutes,
            RawField::TimeInBedMinutes => &mut self.time_in_bed_minutes,
            RawField::DeepSleepMinutes => &mut self.deep_sleep_minutes,
            RawField::RemSleepMinutes => &mut self.rem_sleep_minutes,
            RawField::LightSleepMinutes => &mut self.light_sleep_minutes,
            RawField::AwakeMinutes => &mut self.awake_minutes,
            RawField::SleepEfficiencyPct => &mut self.sleep_efficiency_pct,
            RawField::Steps => &mut self.steps,
            RawField::MovementMinutes => &mut self.movement_minutes,
            RawField::ActiveCalories => &mut self.active_calories,
            RawField::HrvRmssdMs => &mut self.hrv_rmssd_ms,
            RawField::HrvSdnnMs => &mut self.hrv_sdnn_ms,
            RawField::RestingHrBpm => &mut self.resting_hr_bpm,
            RawField::BreathingRate => &mut self.breathing_rate,
        };
        *slot = value;
    }

    /// Builder-style setter, mostly useful in tests and fixtures
    pub fn with(mut self, field: RawField, value: f64) -> Self {
        self.set(field, Some(value));
        self
    }

    /// True when no field carries a value
    pub fn is_empty(&self) -> bool {
        RawField::ALL.iter().all(|f| self.get(*f).is_none())
    }
}

/// Derived per-sub-metric input values for one scoring day
pub type SubMetricValues = BTreeMap<SubMetricId, f64>;

/// Score for one sub-metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubMetricScore {
    pub id: SubMetricId,
    /// Raw input value, if any
    pub value: Option<f64>,
    /// 0-100 score, absent when no value was available
    pub score: Option<u8>,
    pub available: bool,
}

/// Score for one pillar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarScore {
    pub id: PillarId,
    /// 0-100; 0 with `has_data == false` when nothing was available
    pub score: u8,
    pub has_data: bool,
    pub sub_metrics: Vec<SubMetricScore>,
}

/// Age-adjusted wellness score for one person and day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalitySnapshot {
    pub age: u32,
    pub age_group: AgeGroup,
    /// 0-100, absent when no pillar had data
    pub total_score: Option<u8>,
    pub pillars: Vec<PillarScore>,
}

impl VitalitySnapshot {
    pub fn pillar(&self, id: PillarId) -> Option<&PillarScore> {
        self.pillars.iter().find(|p| p.id == id)
    }
}

/// Persisted snapshot keyed by (person, date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub person_id: String,
    pub date: NaiveDate,
    pub snapshot: VitalitySnapshot,
    pub computed_at: DateTime<Utc>,
}

/// One day's value of one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyValue {
    pub date: NaiveDate,
    pub value: f64,
}

impl DailyValue {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// Metric tracked by the pattern engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternMetric {
    SleepMinutes,
    Steps,
    HrvMs,
    RestingHr,
    MovementMinutes,
    BreathingRate,
}

impl PatternMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternMetric::SleepMinutes => "sleep_minutes",
            PatternMetric::Steps => "steps",
            PatternMetric::HrvMs => "hrv_ms",
            PatternMetric::RestingHr => "resting_hr",
            PatternMetric::MovementMinutes => "movement_minutes",
            PatternMetric::BreathingRate => "breathing_rate",
        }
    }
}

/// Direction of a sustained deviation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    DropVsBaseline,
    RiseVsBaseline,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::DropVsBaseline => "drop_vs_baseline",
            PatternType::RiseVsBaseline => "rise_vs_baseline",
        }
    }
}

/// Baseline vs. recent averages for one metric as of one evaluation date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineComputation {
    pub baseline_avg: f64,
    pub recent_avg: f64,
    pub baseline_days: usize,
    pub recent_days: usize,
    pub baseline_start: NaiveDate,
    pub baseline_end: NaiveDate,
    pub recent_start: NaiveDate,
    pub recent_end: NaiveDate,
}

impl BaselineComputation {
    /// Relative deviation `(recent - baseline) / baseline`; absent for a zero baseline
    pub fn deviation(&self) -> Option<f64> {
        if self.baseline_avg == 0.0 {
            None
        } else {
            Some((self.recent_avg - self.baseline_avg) / self.baseline_avg)
        }
    }
}

/// Lifecycle status of an alert episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Active,
    Resolved,
}

/// Why an episode left the active state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeResolution {
    /// Hysteresis cleared the signal
    Cleared,
    /// Replaced by a newer episode with a different start date
    Superseded,
}

/// Severity band derived from escalation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Watch,
    Attention,
    Critical,
}

impl Severity {
    pub fn from_level(level: u32) -> Self {
        match level {
            0..=6 => Severity::Watch,
            7..=13 => Severity::Attention,
            _ => Severity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Watch => "watch",
            Severity::Attention => "attention",
            Severity::Critical => "critical",
        }
    }
}

/// One continuous run of a pattern being true for a person, metric and pattern type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEpisode {
    pub id: Uuid,
    pub person_id: String,
    pub metric: PatternMetric,
    pub pattern_type: PatternType,
    pub status: EpisodeStatus,
    pub active_since: NaiveDate,
    pub last_evaluated_date: NaiveDate,
    pub consecutive_true_days: u32,
    pub current_level: u32,
    pub severity: Severity,
    #[serde(default)]
    pub last_notified_level: Option<u32>,
    #[serde(default)]
    pub last_notified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snoozed_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dismissed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_on: Option<NaiveDate>,
    #[serde(default)]
    pub resolution: Option<EpisodeResolution>,
    /// Baseline average that justified the current state
    pub baseline_value: Option<f64>,
    /// Recent average that justified the current state
    pub recent_value: Option<f64>,
    /// Relative deviation of recent vs. baseline (fraction, `-0.25` = 25% drop)
    pub deviation: Option<f64>,
}

impl AlertEpisode {
    pub fn is_active(&self) -> bool {
        self.status == EpisodeStatus::Active
    }

    /// Whether the key (person, metric, pattern type) matches
    pub fn matches_key(&self, person_id: &str, metric: PatternMetric, pattern: PatternType) -> bool {
        self.person_id == person_id && self.metric == metric && self.pattern_type == pattern
    }
}

/// Request for the external delivery worker (delivery itself is out of scope)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub recipient_id: String,
    pub subject_person_id: String,
    pub metric: PatternMetric,
    pub pattern_type: PatternType,
    pub level: u32,
    pub severity: Severity,
    pub episode_id: Uuid,
    pub episode_start: NaiveDate,
    pub evaluation_date: NaiveDate,
}

/// Profile data needed to resolve the age group and notification recipients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonProfile {
    pub person_id: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    /// Caregivers to notify; the person themself when empty
    #[serde(default)]
    pub recipient_ids: Vec<String>,
}

impl PersonProfile {
    /// Age as of `on`; date of birth wins over a stored age
    pub fn age_on(&self, on: NaiveDate) -> Option<u32> {
        match self.birth_date {
            Some(dob) => age_on(dob, on),
            None => self.age,
        }
    }

    pub fn recipients(&self) -> Vec<String> {
        if self.recipient_ids.is_empty() {
            vec![self.person_id.clone()]
        } else {
            self.recipient_ids.clone()
        }
    }
}
