//! Cohort builder: turns observations into per-group duration/event series.
//!
//! Invalid observations are dropped and reported as [`Exclusion`]s; the
//! builder never fails on bad data. An empty [`CohortSet`] means "no data"
//! and must not be handed to an estimator.

use std::collections::hash_map::{Entry, HashMap};

use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::record::{CareLevel, EntryRecord, FileStatus, PatientId, SurvivalRecord};
use crate::{GroupOrder, SurvivalConfig};

/// Source of an event flag: a stored boolean or a file status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventIndicator {
    Flag(bool),
    Status(FileStatus),
}

impl From<bool> for EventIndicator {
    fn from(flag: bool) -> Self {
        Self::Flag(flag)
    }
}

impl From<FileStatus> for EventIndicator {
    fn from(status: FileStatus) -> Self {
        Self::Status(status)
    }
}

impl From<Option<FileStatus>> for EventIndicator {
    fn from(status: Option<FileStatus>) -> Self {
        Self::Status(status.unwrap_or(FileStatus::Unknown))
    }
}

impl From<&str> for EventIndicator {
    fn from(raw: &str) -> Self {
        Self::Status(FileStatus::from_code(raw))
    }
}

/// True only for death. Every other status, known or not, is censored.
pub fn derive_event(source: impl Into<EventIndicator>) -> bool {
    match source.into() {
        EventIndicator::Flag(flag) => flag,
        EventIndicator::Status(status) => status == FileStatus::ClosedDied,
    }
}

/// Whole days from `entry` to `followup`. Negative when the dates are swapped.
pub fn derive_duration(entry: NaiveDate, followup: NaiveDate) -> i64 {
    followup.signed_duration_since(entry).num_days()
}

/// One patient episode as seen by the estimator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub subject: PatientId,
    pub duration_days: Option<i64>,
    pub event_occurred: bool,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub care_level: Option<CareLevel>,
}

impl Observation {
    pub fn new(subject: PatientId, duration_days: Option<i64>, event_occurred: bool) -> Self {
        Self {
            subject,
            duration_days,
            event_occurred,
            diagnosis: None,
            care_level: None,
        }
    }

    pub fn with_diagnosis(mut self, diagnosis: impl Into<String>) -> Self {
        self.diagnosis = Some(diagnosis.into());
        self
    }

    pub fn with_care_level(mut self, level: CareLevel) -> Self {
        self.care_level = Some(level);
        self
    }

    pub fn from_entry(record: &EntryRecord) -> Self {
        Self::new(
            record.patient,
            Some(record.duration_days()),
            derive_event(record.event_occurred),
        )
    }

    pub fn from_record(record: &SurvivalRecord) -> Self {
        Self {
            subject: record.patient,
            duration_days: record.days_in_care.map(i64::from),
            event_occurred: derive_event(record.file_status),
            diagnosis: Some(record.diagnosis.clone()),
            care_level: record.level_of_care,
        }
    }
}

/// Why an observation was left out of every cohort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    MissingDuration,
    NegativeDuration { days: i64 },
    MissingGroupKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exclusion {
    pub subject: PatientId,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// Named group of valid observations, analysed as one curve.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Cohort {
    pub label: String,
    observations: Vec<Observation>,
}

impl Cohort {
    fn new(label: String) -> Self {
        Self {
            label,
            observations: Vec::new(),
        }
    }

    /// Members in input order. Each carries a non-negative duration.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn deaths(&self) -> usize {
        self.observations
            .iter()
            .filter(|obs| obs.event_occurred)
            .count()
    }

    pub fn to_series(&self) -> SurvivalSeries {
        to_series(self)
    }
}

/// Estimator input: aligned durations and event flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurvivalSeries {
    pub label: String,
    pub durations: Vec<f64>,
    pub events: Vec<bool>,
}

impl SurvivalSeries {
    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }
}

/// Projects a cohort onto its duration and event columns.
pub fn to_series(group: &Cohort) -> SurvivalSeries {
    let (durations, events) = group
        .observations
        .iter()
        .filter_map(|obs| {
            obs.duration_days
                .map(|days| (days as f64, obs.event_occurred))
        })
        .unzip();

    SurvivalSeries {
        label: group.label.clone(),
        durations,
        events,
    }
}

/// Result of one builder run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CohortSet {
    pub groups: Vec<Cohort>,
    pub excluded: Vec<Exclusion>,
}

impl CohortSet {
    /// True when no group survived; callers must treat this as "no data".
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&Cohort> {
        self.groups.iter().find(|group| group.label == label)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.groups.iter().map(|group| group.label.as_str()).collect()
    }

    /// Number of observations placed in some group.
    pub fn member_count(&self) -> usize {
        self.groups.iter().map(Cohort::len).sum()
    }

    pub fn series(&self) -> Vec<SurvivalSeries> {
        self.groups.iter().map(to_series).collect()
    }
}

/// Stratification applied by [`build_cohort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Overall,
    Diagnosis,
    CareLevel,
}

/// Builds the cohorts for one stratification.
pub fn build_cohort(
    observations: &[Observation],
    group_by: GroupBy,
    config: &SurvivalConfig,
) -> CohortSet {
    match group_by {
        GroupBy::Overall => build_overall(observations, &config.overall_label),
        GroupBy::Diagnosis => build_cohort_by(observations, diagnosis_key, config.group_order),
        GroupBy::CareLevel => build_cohort_by(
            observations,
            |obs| obs.care_level.map(|level| level.code().to_string()),
            config.group_order,
        ),
    }
}

/// Single cohort holding every valid observation.
pub(crate) fn build_overall(observations: &[Observation], label: &str) -> CohortSet {
    build_cohort_by(observations, |_| Some(label.to_string()), GroupOrder::FirstSeen)
}

/// Partitions valid observations by `key`. A `None` key excludes the
/// observation.
pub fn build_cohort_by<F>(observations: &[Observation], key: F, order: GroupOrder) -> CohortSet
where
    F: Fn(&Observation) -> Option<String>,
{
    let mut set = CohortSet::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for obs in observations {
        if let Err(reason) = check_duration(obs) {
            set.excluded.push(Exclusion {
                subject: obs.subject,
                reason,
            });
            continue;
        }

        let Some(label) = key(obs) else {
            set.excluded.push(Exclusion {
                subject: obs.subject,
                reason: ExclusionReason::MissingGroupKey,
            });
            continue;
        };

        let slot = match index.entry(label) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                set.groups.push(Cohort::new(entry.key().clone()));
                *entry.insert(set.groups.len() - 1)
            }
        };
        set.groups[slot].observations.push(obs.clone());
    }

    if order == GroupOrder::Lexicographic {
        set.groups.sort_by(|a, b| a.label.cmp(&b.label));
    }

    debug!(
        "built {} cohort(s) from {} observation(s), {} excluded",
        set.groups.len(),
        observations.len(),
        set.excluded.len()
    );

    set
}

fn check_duration(obs: &Observation) -> Result<i64, ExclusionReason> {
    match obs.duration_days {
        None => Err(ExclusionReason::MissingDuration),
        Some(days) if days < 0 => {
            warn!(
                "excluding patient {}: negative duration of {days} day(s), check the record dates",
                obs.subject
            );
            Err(ExclusionReason::NegativeDuration { days })
        }
        Some(days) => Ok(days),
    }
}

fn diagnosis_key(obs: &Observation) -> Option<String> {
    obs.diagnosis
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
