//! Survival analysis pipeline around an external estimator.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cohort::{build_cohort, build_overall, CohortSet, GroupBy, Observation, SurvivalSeries};
use crate::record::{EntryRecord, SurvivalRecord};
use crate::{Result, SurvivalConfig};

/// One step of a survival function.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CurvePoint {
    pub time: f64,
    pub probability: f64,
}

/// Stepwise survival function for one cohort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurvivalCurve {
    pub label: String,
    pub points: Vec<CurvePoint>,
}

impl SurvivalCurve {
    pub fn new(label: impl Into<String>, points: Vec<CurvePoint>) -> Self {
        Self {
            label: label.into(),
            points,
        }
    }

    /// Value of the step function at `time`; 1.0 before the first step.
    pub fn probability_at(&self, time: f64) -> f64 {
        self.points
            .iter()
            .take_while(|point| point.time <= time)
            .last()
            .map_or(1.0, |point| point.probability)
    }
}

/// Fits a survival curve to one series, e.g. a Kaplan–Meier estimator.
///
/// Never called with an empty series.
pub trait SurvivalEstimator {
    fn fit(&self, series: &SurvivalSeries) -> Result<SurvivalCurve>;
}

impl<F> SurvivalEstimator for F
where
    F: Fn(&SurvivalSeries) -> Result<SurvivalCurve>,
{
    fn fit(&self, series: &SurvivalSeries) -> Result<SurvivalCurve> {
        self(series)
    }
}

/// Headline counts over the usable survival records.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CohortSummary {
    pub total_cases: usize,
    pub death_cases: usize,
    /// `1 - deaths / total`; absent when there are no cases.
    pub survival_rate: Option<f64>,
}

impl CohortSummary {
    pub fn from_set(set: &CohortSet) -> Self {
        let total_cases = set.member_count();
        let death_cases = set.groups.iter().map(|group| group.deaths()).sum();
        let survival_rate = if total_cases == 0 {
            None
        } else {
            Some(1.0 - death_cases as f64 / total_cases as f64)
        };

        Self {
            total_cases,
            death_cases,
            survival_rate,
        }
    }
}

/// Which part of the analysis a cohort set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    EntrySurvival,
    Overall,
    Diagnosis,
    CareLevel,
}

/// Cohorts ready for fitting.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreparedAnalysis {
    pub has_data: bool,
    pub message: Option<String>,
    /// Built from entry/follow-up records.
    pub entry_survival: CohortSet,
    pub overall: CohortSet,
    pub by_diagnosis: CohortSet,
    pub by_care_level: CohortSet,
    pub summary: CohortSummary,
}

impl PreparedAnalysis {
    pub fn sections(&self) -> [(Section, &CohortSet); 4] {
        [
            (Section::EntrySurvival, &self.entry_survival),
            (Section::Overall, &self.overall),
            (Section::Diagnosis, &self.by_diagnosis),
            (Section::CareLevel, &self.by_care_level),
        ]
    }
}

/// Builds every cohort the report shows. Entry records and survival records
/// are analysed independently; either may be empty.
pub fn prepare(
    entries: &[EntryRecord],
    records: &[SurvivalRecord],
    config: &SurvivalConfig,
) -> PreparedAnalysis {
    let entry_obs: Vec<Observation> = entries.iter().map(Observation::from_entry).collect();
    let record_obs: Vec<Observation> = records.iter().map(Observation::from_record).collect();

    let entry_survival = build_overall(&entry_obs, &config.entry_label);
    let overall = build_cohort(&record_obs, GroupBy::Overall, config);
    let by_diagnosis = build_cohort(&record_obs, GroupBy::Diagnosis, config);
    let by_care_level = build_cohort(&record_obs, GroupBy::CareLevel, config);
    let summary = CohortSummary::from_set(&overall);

    let has_data = !entry_survival.is_empty() || !overall.is_empty();
    debug!(
        "prepared analysis: {} entry record(s), {} survival record(s), has_data={has_data}",
        entries.len(),
        records.len()
    );

    PreparedAnalysis {
        has_data,
        message: (!has_data).then(|| config.no_data_message.clone()),
        entry_survival,
        overall,
        by_diagnosis,
        by_care_level,
        summary,
    }
}

/// Fitted curves per section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub has_data: bool,
    pub message: Option<String>,
    pub entry_survival: Vec<SurvivalCurve>,
    pub overall: Vec<SurvivalCurve>,
    pub by_diagnosis: Vec<SurvivalCurve>,
    pub by_care_level: Vec<SurvivalCurve>,
    pub summary: CohortSummary,
}

/// Fits one curve per prepared cohort. Does not touch the estimator when
/// there is no data.
pub fn analyze<E>(prepared: &PreparedAnalysis, estimator: &E) -> Result<AnalysisReport>
where
    E: SurvivalEstimator + ?Sized,
{
    let mut report = AnalysisReport {
        has_data: prepared.has_data,
        message: prepared.message.clone(),
        summary: prepared.summary,
        ..AnalysisReport::default()
    };

    if !prepared.has_data {
        return Ok(report);
    }

    for (section, set) in prepared.sections() {
        let curves = fit_all(set, estimator)?;
        match section {
            Section::EntrySurvival => report.entry_survival = curves,
            Section::Overall => report.overall = curves,
            Section::Diagnosis => report.by_diagnosis = curves,
            Section::CareLevel => report.by_care_level = curves,
        }
    }

    Ok(report)
}

fn fit_all<E>(set: &CohortSet, estimator: &E) -> Result<Vec<SurvivalCurve>>
where
    E: SurvivalEstimator + ?Sized,
{
    set.groups
        .iter()
        .filter(|group| !group.is_empty())
        .map(|group| estimator.fit(&group.to_series()))
        .collect()
}
