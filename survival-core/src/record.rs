//! Persisted hospice records and their categorical fields.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cohort::{derive_duration, derive_event};
use crate::{Result, SurvivalError};

/// Longest diagnosis text a record may carry.
pub const MAX_DIAGNOSIS_LEN: usize = 200;

/// Numeric patient identifier, as assigned by the demographics store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct PatientId(pub u64);

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Demographic stub needed to resolve sheet rows and label exports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Patient {
    pub id: PatientId,
    pub referral_number: String,
    pub name: String,
}

/// Where the file stands. Anything unrecognised reads as `Unknown`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Active,
    ClosedDied,
    ClosedRecovered,
    ClosedTransferred,
    ClosedLost,
    #[serde(other)]
    Unknown,
}

impl FileStatus {
    /// Total mapping from a raw status string.
    ///
    /// Accepts stored codes (`closed_died`), sheet spellings (`Closed Died`)
    /// and display labels (`Closed - Died`).
    pub fn from_code(raw: &str) -> Self {
        match normalize_code(raw).as_str() {
            "active" => Self::Active,
            "closed_died" => Self::ClosedDied,
            "closed_recovered" => Self::ClosedRecovered,
            "closed_transferred" => Self::ClosedTransferred,
            "closed_lost" | "closed_lost_to_follow_up" => Self::ClosedLost,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::ClosedDied => "closed_died",
            Self::ClosedRecovered => "closed_recovered",
            Self::ClosedTransferred => "closed_transferred",
            Self::ClosedLost => "closed_lost",
            Self::Unknown => "unknown",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::ClosedDied => "Closed - Died",
            Self::ClosedRecovered => "Closed - Recovered",
            Self::ClosedTransferred => "Closed - Transferred",
            Self::ClosedLost => "Closed - Lost to Follow Up",
            Self::Unknown => "Unknown",
        }
    }
}

/// Place of death.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaceOfDeath {
    Home,
    Hospital,
    Other,
}

impl PlaceOfDeath {
    pub fn from_code(raw: &str) -> Option<Self> {
        match normalize_code(raw).as_str() {
            "home" => Some(Self::Home),
            "hospital" => Some(Self::Hospital),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Home => "Home",
            Self::Hospital => "Hospital",
            Self::Other => "Other",
        }
    }
}

/// Level of care the patient receives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CareLevel {
    Low,
    Medium,
    High,
}

impl CareLevel {
    pub fn from_code(raw: &str) -> Option<Self> {
        match normalize_code(raw).as_str() {
            "low" | "low_care" => Some(Self::Low),
            "medium" | "medium_care" => Some(Self::Medium),
            "high" | "high_care" => Some(Self::High),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low Care",
            Self::Medium => "Medium Care",
            Self::High => "High Care",
        }
    }
}

/// Admission/follow-up record, one per patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryRecord {
    pub patient: PatientId,
    /// Date of hospice admission.
    pub entry_date: NaiveDate,
    pub last_followup: NaiveDate,
    /// True if death occurred, false if censored.
    #[serde(default)]
    pub event_occurred: bool,
    /// Additional risk factors, e.g. `pain_level`.
    #[serde(default)]
    pub covariates: BTreeMap<String, f64>,
}

impl EntryRecord {
    pub fn new(patient: PatientId, entry_date: NaiveDate, last_followup: NaiveDate) -> Self {
        Self {
            patient,
            entry_date,
            last_followup,
            event_occurred: false,
            covariates: BTreeMap::new(),
        }
    }

    /// Signed days from admission to last follow-up.
    pub fn duration_days(&self) -> i64 {
        derive_duration(self.entry_date, self.last_followup)
    }
}

/// Diagnosis/status record kept by the hospice team.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurvivalRecord {
    pub patient: PatientId,
    pub diagnosis: String,
    #[serde(default)]
    pub days_in_care: Option<u32>,
    #[serde(default)]
    pub pod: Option<PlaceOfDeath>,
    /// Date of death.
    #[serde(default)]
    pub dod: Option<NaiveDate>,
    pub date_case_registered: NaiveDate,
    #[serde(default)]
    pub file_status: FileStatus,
    #[serde(default)]
    pub level_of_care: Option<CareLevel>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SurvivalRecord {
    pub fn new(
        patient: PatientId,
        diagnosis: impl Into<String>,
        date_case_registered: NaiveDate,
        file_status: FileStatus,
    ) -> Self {
        Self {
            patient,
            diagnosis: diagnosis.into(),
            days_in_care: None,
            pod: None,
            dod: None,
            date_case_registered,
            file_status,
            level_of_care: None,
            notes: None,
        }
    }

    /// Checks the rules a record must satisfy before it is saved.
    pub fn validate(&self) -> Result<()> {
        if self.diagnosis.chars().count() > MAX_DIAGNOSIS_LEN {
            return Err(SurvivalError::Validation(format!(
                "diagnosis is longer than {MAX_DIAGNOSIS_LEN} characters"
            )));
        }

        if self.file_status == FileStatus::ClosedDied && self.dod.is_none() {
            return Err(SurvivalError::Validation(
                "date of death is required when status is 'Closed - Died'".to_string(),
            ));
        }

        Ok(())
    }

    pub fn event_occurred(&self) -> bool {
        derive_event(self.file_status)
    }
}

impl fmt::Display for SurvivalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} ({})",
            self.patient,
            self.diagnosis,
            self.file_status.code()
        )
    }
}

/// Lowercases and collapses every run of non-alphanumerics into `_`.
fn normalize_code(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}
