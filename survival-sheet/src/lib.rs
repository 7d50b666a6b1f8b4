//! Spreadsheet import and export for hospice survival records.
//!
//! Sheets arrive either as CSV with a header row or as a JSON array of
//! objects keyed by the same column names. Rows that cannot be matched to a
//! patient are skipped and reported; they never abort the batch.

use std::collections::HashMap;
use std::io;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use survival_core::{
    CareLevel, FileStatus, PatientDirectory, PatientId, PlaceOfDeath, Result, SurvivalError,
    SurvivalRecord,
};

pub const COL_REF_NUMBER: &str = "Ref Number";
pub const COL_DIAGNOSIS: &str = "Diagnosis";
pub const COL_DAYS_IN_CARE: &str = "DaysInCare";
pub const COL_POD: &str = "Pod";
pub const COL_DOD: &str = "Dod";
pub const COL_REGISTERED: &str = "DateCaseRegistered";
pub const COL_FILE_STATUS: &str = "FileStatus";
pub const COL_LEVEL_OF_CARE: &str = "Levelofcare";

/// Column order of exported sheets.
pub const EXPORT_HEADERS: [&str; 8] = [
    "Patient ID",
    "Patient Name",
    "Diagnosis",
    "Days in Care",
    "Place of Death",
    "Date of Death",
    "Status",
    "Level of Care",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d.%m.%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Settings for one import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Registration date used when a row has none.
    pub today: NaiveDate,
}

impl ImportOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            today: Local::now().date_naive(),
        }
    }
}

/// Why a sheet row was not imported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    MissingReference,
    UnknownPatient { reference: String },
    InvalidValue { column: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based data row, header excluded.
    pub row: usize,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Result of one import run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImportOutcome {
    /// One record per patient; later rows replace earlier ones.
    pub records: Vec<SurvivalRecord>,
    /// Rows applied, counting repeated patients each time.
    pub imported: usize,
    pub skipped: Vec<SkippedRow>,
}

/// Import a CSV sheet.
pub fn import_csv_str<D>(
    data: &str,
    directory: &D,
    options: &ImportOptions,
) -> Result<ImportOutcome>
where
    D: PatientDirectory + ?Sized,
{
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(data.as_bytes());

    let headers = reader
        .headers()
        .map_err(|err| SurvivalError::Parse(err.to_string()))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| SurvivalError::Parse(err.to_string()))?;
        rows.push(SheetRow::from_pairs(
            headers.iter().zip(record.iter()).map(|(h, v)| (h, v.to_string())),
        ));
    }

    Ok(import_rows(rows, directory, options))
}

/// Import a JSON sheet from a string.
pub fn import_json_str<D>(
    data: &str,
    directory: &D,
    options: &ImportOptions,
) -> Result<ImportOutcome>
where
    D: PatientDirectory + ?Sized,
{
    let value: Value =
        serde_json::from_str(data).map_err(|err| SurvivalError::Parse(err.to_string()))?;
    import_json_value(&value, directory, options)
}

/// Import a JSON sheet: an array of objects keyed by column name.
pub fn import_json_value<D>(
    sheet: &Value,
    directory: &D,
    options: &ImportOptions,
) -> Result<ImportOutcome>
where
    D: PatientDirectory + ?Sized,
{
    let entries = sheet
        .as_array()
        .ok_or_else(|| SurvivalError::Parse("expected a JSON array of rows".to_string()))?;

    let mut rows = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let Some(object) = entry.as_object() else {
            return Err(SurvivalError::Parse(format!(
                "row {} is not a JSON object",
                idx + 1
            )));
        };
        rows.push(SheetRow::from_pairs(
            object
                .iter()
                .filter_map(|(key, value)| cell_text(value).map(|text| (key.as_str(), text))),
        ));
    }

    Ok(import_rows(rows, directory, options))
}

/// Update-or-create `incoming` into `existing`, keyed by patient.
pub fn merge_records(
    existing: Vec<SurvivalRecord>,
    incoming: Vec<SurvivalRecord>,
) -> Vec<SurvivalRecord> {
    let mut book = RecordBook::default();
    for record in existing.into_iter().chain(incoming) {
        book.upsert(record);
    }
    book.records
}

/// Validate `record`, then upsert it into `existing`.
pub fn add_record(
    existing: Vec<SurvivalRecord>,
    record: SurvivalRecord,
) -> Result<Vec<SurvivalRecord>> {
    record.validate()?;
    info!("saving survival record {record}");
    Ok(merge_records(existing, vec![record]))
}

/// Write records as CSV with the fixed export header.
pub fn write_csv<W, D>(writer: W, records: &[SurvivalRecord], directory: &D) -> Result<()>
where
    W: io::Write,
    D: PatientDirectory + ?Sized,
{
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(EXPORT_HEADERS).map_err(csv_error)?;

    for record in records {
        let name = directory
            .get(record.patient)
            .map(|patient| patient.name.as_str())
            .unwrap_or_default();

        out.write_record([
            record.patient.to_string().as_str(),
            name,
            record.diagnosis.as_str(),
            record
                .days_in_care
                .map(|days| days.to_string())
                .unwrap_or_default()
                .as_str(),
            record.pod.map(PlaceOfDeath::label).unwrap_or_default(),
            record
                .dod
                .map(|dod| dod.format("%Y-%m-%d").to_string())
                .unwrap_or_default()
                .as_str(),
            record.file_status.label(),
            record.level_of_care.map(CareLevel::label).unwrap_or_default(),
        ])
        .map_err(csv_error)?;
    }

    out.flush()
        .map_err(|err| SurvivalError::Other(err.to_string()))
}

/// Export records to a CSV string.
pub fn export_csv_string<D>(records: &[SurvivalRecord], directory: &D) -> Result<String>
where
    D: PatientDirectory + ?Sized,
{
    let mut buffer = Vec::new();
    write_csv(&mut buffer, records, directory)?;
    String::from_utf8(buffer).map_err(|err| SurvivalError::Other(err.to_string()))
}

/// Cells of one sheet row, keyed by trimmed header. Blank cells are absent.
#[derive(Debug, Default)]
struct SheetRow {
    cells: HashMap<String, String>,
}

impl SheetRow {
    fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let cells = pairs
            .into_iter()
            .filter_map(|(header, value)| {
                let value = value.trim();
                (!value.is_empty()).then(|| (header.trim().to_string(), value.to_string()))
            })
            .collect();
        Self { cells }
    }

    fn cell(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(String::as_str)
    }
}

#[derive(Default)]
struct RecordBook {
    records: Vec<SurvivalRecord>,
    index: HashMap<PatientId, usize>,
}

impl RecordBook {
    fn upsert(&mut self, record: SurvivalRecord) {
        match self.index.get(&record.patient).copied() {
            Some(slot) => self.records[slot] = record,
            None => {
                self.index.insert(record.patient, self.records.len());
                self.records.push(record);
            }
        }
    }
}

fn import_rows<D>(rows: Vec<SheetRow>, directory: &D, options: &ImportOptions) -> ImportOutcome
where
    D: PatientDirectory + ?Sized,
{
    let mut book = RecordBook::default();
    let mut outcome = ImportOutcome::default();

    for (idx, row) in rows.iter().enumerate() {
        match read_row(row, directory, options) {
            Ok(record) => {
                book.upsert(record);
                outcome.imported += 1;
            }
            Err(reason) => {
                warn!("skipping sheet row {}: {reason:?}", idx + 1);
                outcome.skipped.push(SkippedRow {
                    row: idx + 1,
                    reason,
                });
            }
        }
    }

    info!(
        "imported {} row(s) into {} record(s), skipped {}",
        outcome.imported,
        book.records.len(),
        outcome.skipped.len()
    );

    outcome.records = book.records;
    outcome
}

fn read_row<D>(
    row: &SheetRow,
    directory: &D,
    options: &ImportOptions,
) -> std::result::Result<SurvivalRecord, SkipReason>
where
    D: PatientDirectory + ?Sized,
{
    let reference = row
        .cell(COL_REF_NUMBER)
        .ok_or(SkipReason::MissingReference)?;

    let patient = directory
        .find_by_referral(reference)
        .ok_or_else(|| SkipReason::UnknownPatient {
            reference: reference.to_string(),
        })?;

    let days_in_care = match row.cell(COL_DAYS_IN_CARE) {
        None => None,
        Some(raw) => Some(parse_days(raw).ok_or_else(|| SkipReason::InvalidValue {
            column: COL_DAYS_IN_CARE.to_string(),
            value: raw.to_string(),
        })?),
    };

    Ok(SurvivalRecord {
        patient: patient.id,
        diagnosis: row.cell(COL_DIAGNOSIS).unwrap_or_default().to_string(),
        days_in_care,
        pod: row.cell(COL_POD).and_then(PlaceOfDeath::from_code),
        dod: row.cell(COL_DOD).and_then(parse_sheet_date),
        date_case_registered: row
            .cell(COL_REGISTERED)
            .and_then(parse_sheet_date)
            .unwrap_or(options.today),
        file_status: row
            .cell(COL_FILE_STATUS)
            .map(FileStatus::from_code)
            .unwrap_or_default(),
        level_of_care: row.cell(COL_LEVEL_OF_CARE).and_then(CareLevel::from_code),
        notes: None,
    })
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Whole non-negative day counts; spreadsheets often hand these over as `12.0`.
fn parse_days(raw: &str) -> Option<u32> {
    if let Ok(days) = raw.parse::<i64>() {
        return u32::try_from(days).ok();
    }

    let value = raw.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value >= 0.0 && value <= f64::from(u32::MAX) {
        Some(value as u32)
    } else {
        None
    }
}

/// Lenient date parsing; anything unreadable becomes `None`.
fn parse_sheet_date(raw: &str) -> Option<NaiveDate> {
    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
    {
        return Some(date);
    }

    if let Some(datetime) = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    {
        return Some(datetime.date());
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .ok()
}

fn csv_error(err: csv::Error) -> SurvivalError {
    SurvivalError::Other(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use survival_core::{InMemoryDirectory, Patient};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::from(vec![
            Patient {
                id: PatientId(1),
                referral_number: "HSP-001".to_string(),
                name: "Ada Obi".to_string(),
            },
            Patient {
                id: PatientId(2),
                referral_number: "HSP-002".to_string(),
                name: "Ben Kato".to_string(),
            },
        ])
    }

    fn options() -> ImportOptions {
        ImportOptions::new(date(2024, 6, 1))
    }

    #[test]
    fn parses_day_counts() {
        assert_eq!(parse_days("12"), Some(12));
        assert_eq!(parse_days("12.0"), Some(12));
        assert_eq!(parse_days("12.5"), None);
        assert_eq!(parse_days("-3"), None);
        assert_eq!(parse_days("soon"), None);
    }

    #[test]
    fn parses_common_sheet_dates() {
        let expected = Some(date(2024, 3, 5));
        assert_eq!(parse_sheet_date("2024-03-05"), expected);
        assert_eq!(parse_sheet_date("05/03/2024"), expected);
        assert_eq!(parse_sheet_date("2024/03/05"), expected);
        assert_eq!(parse_sheet_date("05.03.2024"), expected);
        assert_eq!(parse_sheet_date("2024-03-05 00:00:00"), expected);
        assert_eq!(parse_sheet_date("2024-03-05T10:30:00Z"), expected);
        assert_eq!(parse_sheet_date("March fifth"), None);
    }

    #[test]
    fn later_rows_replace_earlier_ones_for_the_same_patient() {
        let sheet = "Ref Number,Diagnosis,DaysInCare,FileStatus\n\
                     HSP-001,Cancer,10,Active\n\
                     HSP-001,Cancer,14,Closed Died\n";
        let outcome = import_csv_str(sheet, &directory(), &options()).unwrap();

        assert_eq!(outcome.imported, 2);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].days_in_care, Some(14));
        assert_eq!(outcome.records[0].file_status, FileStatus::ClosedDied);
    }

    #[test]
    fn defaults_fill_missing_cells() {
        let sheet = "Ref Number,Diagnosis,DaysInCare,Pod,Dod,\
                     DateCaseRegistered,FileStatus,Levelofcare\n\
                     HSP-002,,,,,,,\n";
        let outcome = import_csv_str(sheet, &directory(), &options()).unwrap();
        let record = &outcome.records[0];

        assert_eq!(record.diagnosis, "");
        assert_eq!(record.days_in_care, None);
        assert_eq!(record.pod, None);
        assert_eq!(record.dod, None);
        assert_eq!(record.date_case_registered, date(2024, 6, 1));
        assert_eq!(record.file_status, FileStatus::Active);
        assert_eq!(record.level_of_care, None);
    }

    #[test]
    fn unresolvable_rows_are_skipped_not_fatal() {
        let sheet = "Ref Number,Diagnosis,DaysInCare\n\
                     HSP-999,Cancer,3\n\
                     ,COPD,4\n\
                     HSP-001,COPD,-4\n\
                     HSP-002,COPD,4\n";
        let outcome = import_csv_str(sheet, &directory(), &options()).unwrap();

        assert_eq!(outcome.imported, 1);
        assert_eq!(
            outcome.skipped,
            vec![
                SkippedRow {
                    row: 1,
                    reason: SkipReason::UnknownPatient {
                        reference: "HSP-999".to_string()
                    },
                },
                SkippedRow {
                    row: 2,
                    reason: SkipReason::MissingReference,
                },
                SkippedRow {
                    row: 3,
                    reason: SkipReason::InvalidValue {
                        column: COL_DAYS_IN_CARE.to_string(),
                        value: "-4".to_string(),
                    },
                },
            ]
        );
    }

    #[test]
    fn sheet_without_reference_column_skips_every_row() {
        let sheet = "Diagnosis,DaysInCare\nCancer,3\nCOPD,5\n";
        let outcome = import_csv_str(sheet, &directory(), &options()).unwrap();

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.skipped.len(), 2);
    }

    #[test]
    fn json_rows_accept_numbers_and_nulls() {
        let sheet = r#"[
            {"Ref Number": "HSP-001", "Diagnosis": "Cancer", "DaysInCare": 21.0,
             "Pod": "Hospital", "Dod": "2024-02-10", "FileStatus": "closed_died",
             "Levelofcare": null}
        ]"#;
        let outcome = import_json_str(sheet, &directory(), &options()).unwrap();
        let record = &outcome.records[0];

        assert_eq!(record.days_in_care, Some(21));
        assert_eq!(record.pod, Some(PlaceOfDeath::Hospital));
        assert_eq!(record.dod, Some(date(2024, 2, 10)));
        assert_eq!(record.level_of_care, None);
        assert!(record.event_occurred());
    }

    #[test]
    fn json_sheet_must_be_an_array_of_objects() {
        let err = import_json_str(r#"{"rows": []}"#, &directory(), &options()).unwrap_err();
        assert!(matches!(err, SurvivalError::Parse(_)));

        let err = import_json_str("[1, 2]", &directory(), &options()).unwrap_err();
        assert!(matches!(err, SurvivalError::Parse(_)));
    }

    #[test]
    fn merge_updates_existing_records_in_place() {
        let existing = vec![
            SurvivalRecord::new(PatientId(1), "Cancer", date(2024, 1, 1), FileStatus::Active),
            SurvivalRecord::new(PatientId(2), "COPD", date(2024, 1, 2), FileStatus::Active),
        ];
        let incoming = vec![SurvivalRecord::new(
            PatientId(1),
            "Cancer",
            date(2024, 1, 1),
            FileStatus::ClosedRecovered,
        )];

        let merged = merge_records(existing, incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].file_status, FileStatus::ClosedRecovered);
        assert_eq!(merged[1].patient, PatientId(2));
    }

    #[test]
    fn added_record_is_validated_before_it_is_saved() {
        let existing = vec![SurvivalRecord::new(
            PatientId(1),
            "Cancer",
            date(2024, 1, 1),
            FileStatus::Active,
        )];
        let died = SurvivalRecord::new(
            PatientId(1),
            "Cancer",
            date(2024, 1, 1),
            FileStatus::ClosedDied,
        );

        let err = add_record(existing.clone(), died.clone()).unwrap_err();
        assert!(matches!(err, SurvivalError::Validation(_)));

        let died = SurvivalRecord {
            dod: Some(date(2024, 2, 1)),
            days_in_care: Some(31),
            ..died
        };
        let saved = add_record(existing, died).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].file_status, FileStatus::ClosedDied);
        assert_eq!(saved[0].dod, Some(date(2024, 2, 1)));
    }

    #[test]
    fn added_record_for_a_new_patient_is_appended() {
        let existing = vec![SurvivalRecord::new(
            PatientId(1),
            "Cancer",
            date(2024, 1, 1),
            FileStatus::Active,
        )];
        let record =
            SurvivalRecord::new(PatientId(2), "COPD", date(2024, 3, 1), FileStatus::Active);

        let saved = add_record(existing, record).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].patient, PatientId(2));
    }

    #[test]
    fn export_leaves_optional_cells_empty() {
        let record =
            SurvivalRecord::new(PatientId(2), "COPD", date(2024, 1, 2), FileStatus::ClosedLost);
        let csv = export_csv_string(&[record], &directory()).unwrap();

        assert_eq!(
            csv,
            "Patient ID,Patient Name,Diagnosis,Days in Care,Place of Death,Date of Death,Status,Level of Care\n\
             2,Ben Kato,COPD,,,,Closed - Lost to Follow Up,\n"
        );
    }
}
