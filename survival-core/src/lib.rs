//! Core model and cohort preparation for hospice survival analysis.
//!
//! Records come in two kinds: a simple entry/follow-up record and a richer
//! diagnosis/status record. Both are turned into [`Observation`]s, grouped
//! into cohorts by [`build_cohort`], and projected into duration/event series
//! that an external [`SurvivalEstimator`] can fit.

use serde::{Deserialize, Serialize};

pub mod analysis;
pub mod cohort;
pub mod directory;
pub mod record;

pub use analysis::{
    analyze, prepare, AnalysisReport, CohortSummary, CurvePoint, PreparedAnalysis, Section,
    SurvivalCurve, SurvivalEstimator,
};
pub use cohort::{
    build_cohort, build_cohort_by, derive_duration, derive_event, to_series, Cohort, CohortSet,
    EventIndicator, Exclusion, ExclusionReason, GroupBy, Observation, SurvivalSeries,
};
pub use directory::{InMemoryDirectory, PatientDirectory};
pub use record::{
    CareLevel, EntryRecord, FileStatus, Patient, PatientId, PlaceOfDeath, SurvivalRecord,
    MAX_DIAGNOSIS_LEN,
};

/// How grouped cohorts are ordered in the output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupOrder {
    /// Order in which each key is first seen in the input.
    #[default]
    FirstSeen,
    /// Sorted by label.
    Lexicographic,
}

/// Settings for cohort preparation and reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurvivalConfig {
    /// Label of the ungrouped cohort built from survival records.
    pub overall_label: String,
    /// Label of the cohort built from entry/follow-up records.
    pub entry_label: String,
    pub group_order: GroupOrder,
    /// Shown instead of curves when nothing survives validation.
    pub no_data_message: String,
}

impl Default for SurvivalConfig {
    fn default() -> Self {
        Self {
            overall_label: "Overall".to_string(),
            entry_label: "Patient Survival".to_string(),
            group_order: GroupOrder::FirstSeen,
            no_data_message: "No survival data available. Please add data first.".to_string(),
        }
    }
}

/// Config overrides read from a file; missing fields keep their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub overall_label: Option<String>,
    #[serde(default)]
    pub entry_label: Option<String>,
    #[serde(default)]
    pub group_order: Option<GroupOrder>,
    #[serde(default)]
    pub no_data_message: Option<String>,
}

impl From<PartialConfig> for SurvivalConfig {
    fn from(cfg: PartialConfig) -> Self {
        let mut base = SurvivalConfig::default();
        if let Some(label) = cfg.overall_label {
            base.overall_label = label;
        }
        if let Some(label) = cfg.entry_label {
            base.entry_label = label;
        }
        if let Some(order) = cfg.group_order {
            base.group_order = order;
        }
        if let Some(message) = cfg.no_data_message {
            base.no_data_message = message;
        }
        base
    }
}

/// Errors raised by record handling and analysis.
///
/// Data-quality problems inside the cohort builder are never errors; they
/// show up as [`Exclusion`]s instead.
#[derive(Debug, thiserror::Error)]
pub enum SurvivalError {
    #[error("invalid record: {0}")]
    Validation(String),
    #[error("could not read input: {0}")]
    Parse(String),
    #[error("estimator failed: {0}")]
    Estimator(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SurvivalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults_for_missing_fields() {
        let partial: PartialConfig =
            serde_json::from_str(r#"{"group_order": "lexicographic"}"#).unwrap();
        let config = SurvivalConfig::from(partial);

        assert_eq!(config.group_order, GroupOrder::Lexicographic);
        assert_eq!(config.overall_label, "Overall");
        assert_eq!(config.entry_label, "Patient Survival");
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = SurvivalConfig {
            overall_label: "All patients".to_string(),
            ..SurvivalConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SurvivalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
