use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use log::info;
use survival_core::{
    prepare, CareLevel, EntryRecord, FileStatus, InMemoryDirectory, PartialConfig, PatientId,
    PlaceOfDeath, SurvivalConfig, SurvivalRecord,
};
use survival_sheet::{
    add_record, import_csv_str, import_json_str, merge_records, write_csv, ImportOptions,
};

#[derive(Parser, Debug)]
#[command(
    name = "survival-cli",
    about = "Import, export and prepare hospice survival records."
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a CSV or JSON sheet into a records file.
    Import {
        /// Sheet to import (`.json` is read as JSON, anything else as CSV).
        #[arg(short, long)]
        sheet: PathBuf,
        /// JSON list of patients used to resolve reference numbers.
        #[arg(short, long)]
        patients: PathBuf,
        /// Existing records to update; defaults to the output file if present.
        #[arg(short, long)]
        records: Option<PathBuf>,
        /// Where to write the merged records.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Add or update one patient's survival record.
    Add(AddArgs),
    /// Export records to a CSV sheet.
    Export {
        #[arg(short, long)]
        records: PathBuf,
        #[arg(short, long)]
        patients: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the prepared cohorts as JSON.
    Cohorts {
        /// Survival records file.
        #[arg(short, long)]
        records: Option<PathBuf>,
        /// Entry/follow-up records file.
        #[arg(short, long)]
        entries: Option<PathBuf>,
        /// JSON config overrides.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print only the duration/event series.
        #[arg(long)]
        series: bool,
    },
}

#[derive(clap::Args, Debug)]
struct AddArgs {
    /// Records file to update; created if missing.
    #[arg(short, long)]
    records: PathBuf,
    #[arg(long)]
    patient: u64,
    #[arg(long)]
    diagnosis: String,
    #[arg(long)]
    days_in_care: Option<u32>,
    /// Place of death: home, hospital or other.
    #[arg(long, value_parser = parse_place_of_death)]
    pod: Option<PlaceOfDeath>,
    /// Date of death (YYYY-MM-DD); required for `closed_died`.
    #[arg(long)]
    dod: Option<NaiveDate>,
    /// Registration date; defaults to today.
    #[arg(long)]
    registered: Option<NaiveDate>,
    #[arg(long, default_value = "active", value_parser = parse_file_status)]
    status: FileStatus,
    /// Level of care: low, medium or high.
    #[arg(long, value_parser = parse_care_level)]
    care_level: Option<CareLevel>,
    #[arg(long)]
    notes: Option<String>,
}

impl AddArgs {
    fn to_record(&self, today: NaiveDate) -> SurvivalRecord {
        SurvivalRecord {
            patient: PatientId(self.patient),
            diagnosis: self.diagnosis.trim().to_string(),
            days_in_care: self.days_in_care,
            pod: self.pod,
            dod: self.dod,
            date_case_registered: self.registered.unwrap_or(today),
            file_status: self.status,
            level_of_care: self.care_level,
            notes: self.notes.clone(),
        }
    }
}

fn parse_file_status(raw: &str) -> Result<FileStatus, String> {
    match FileStatus::from_code(raw) {
        FileStatus::Unknown => Err(format!("unknown file status '{raw}'")),
        status => Ok(status),
    }
}

fn parse_place_of_death(raw: &str) -> Result<PlaceOfDeath, String> {
    PlaceOfDeath::from_code(raw).ok_or_else(|| format!("unknown place of death '{raw}'"))
}

fn parse_care_level(raw: &str) -> Result<CareLevel, String> {
    CareLevel::from_code(raw).ok_or_else(|| format!("unknown level of care '{raw}'"))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Import {
            sheet,
            patients,
            records,
            output,
        } => run_import(&sheet, &patients, records.as_deref(), &output),
        Command::Add(args) => run_add(&args),
        Command::Export {
            records,
            patients,
            output,
        } => run_export(&records, &patients, &output),
        Command::Cohorts {
            records,
            entries,
            config,
            series,
        } => run_cohorts(records.as_deref(), entries.as_deref(), config.as_deref(), series),
    }
}

fn run_import(
    sheet: &Path,
    patients: &Path,
    records: Option<&Path>,
    output: &Path,
) -> anyhow::Result<()> {
    let directory = load_directory(patients)?;
    let data = read_file(sheet)?;
    let options = ImportOptions::default();

    let is_json = sheet
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let outcome = if is_json {
        import_json_str(&data, &directory, &options)
    } else {
        import_csv_str(&data, &directory, &options)
    }
    .with_context(|| format!("Could not import sheet {:?}", sheet))?;

    let existing_path = records.or_else(|| output.exists().then_some(output));
    let existing: Vec<SurvivalRecord> = match existing_path {
        Some(path) => load_json(path)?,
        None => Vec::new(),
    };

    let merged = merge_records(existing, outcome.records);
    write_json(output, &merged)?;

    println!(
        "Imported rows: {}\nSkipped rows: {}\nRecords on file: {}",
        outcome.imported,
        outcome.skipped.len(),
        merged.len()
    );
    for skipped in &outcome.skipped {
        println!("  row {}: {:?}", skipped.row, skipped.reason);
    }

    Ok(())
}

fn run_add(args: &AddArgs) -> anyhow::Result<()> {
    let existing: Vec<SurvivalRecord> = if args.records.exists() {
        load_json(&args.records)?
    } else {
        Vec::new()
    };

    let record = args.to_record(Local::now().date_naive());
    let saved = add_record(existing, record).context("Record was not saved")?;
    write_json(&args.records, &saved)?;

    println!("Records on file: {}", saved.len());
    Ok(())
}

fn run_export(records: &Path, patients: &Path, output: &Path) -> anyhow::Result<()> {
    let directory = load_directory(patients)?;
    let records: Vec<SurvivalRecord> = load_json(records)?;

    let file = fs::File::create(output)
        .with_context(|| format!("Could not create file {:?}", output))?;
    write_csv(file, &records, &directory)
        .with_context(|| format!("Could not write sheet {:?}", output))?;

    info!("exported {} record(s) to {:?}", records.len(), output);
    Ok(())
}

fn run_cohorts(
    records: Option<&Path>,
    entries: Option<&Path>,
    config: Option<&Path>,
    series_only: bool,
) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => SurvivalConfig::from(load_json::<PartialConfig>(path)?),
        None => SurvivalConfig::default(),
    };
    let records: Vec<SurvivalRecord> = match records {
        Some(path) => load_json(path)?,
        None => Vec::new(),
    };
    let entries: Vec<EntryRecord> = match entries {
        Some(path) => load_json(path)?,
        None => Vec::new(),
    };

    let prepared = prepare(&entries, &records, &config);

    let rendered = if series_only {
        let series: serde_json::Map<String, serde_json::Value> = prepared
            .sections()
            .into_iter()
            .map(|(section, set)| -> serde_json::Result<(String, serde_json::Value)> {
                let key = serde_json::to_value(section)?
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                Ok((key, serde_json::to_value(set.series())?))
            })
            .collect::<serde_json::Result<_>>()?;
        serde_json::to_string_pretty(&series)?
    } else {
        serde_json::to_string_pretty(&prepared)?
    };

    println!("{rendered}");
    Ok(())
}

fn load_directory(path: &Path) -> anyhow::Result<InMemoryDirectory> {
    load_json(path)
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = read_file(path)?;
    serde_json::from_str(&data).with_context(|| format!("Invalid JSON in {:?}", path))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let data = serde_json::to_string_pretty(value)?;
    fs::write(path, data).with_context(|| format!("Could not write file {:?}", path))
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("Could not read file {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use survival_core::SurvivalError;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn parse_add(extra: &[&str]) -> Result<AddArgs, clap::Error> {
        let base = [
            "survival-cli",
            "add",
            "--records",
            "records.json",
            "--patient",
            "7",
            "--diagnosis",
            "COPD",
        ];
        let args = Args::try_parse_from(base.iter().chain(extra))?;
        match args.command {
            Command::Add(add) => Ok(add),
            other => panic!("expected add, got {other:?}"),
        }
    }

    #[test]
    fn died_without_date_of_death_is_not_saved() {
        let args = parse_add(&["--status", "Closed - Died"]).unwrap();
        let record = args.to_record(date(2024, 6, 1));

        let err = add_record(Vec::new(), record).unwrap_err();
        assert!(matches!(err, SurvivalError::Validation(_)));
    }

    #[test]
    fn valid_record_is_merged_over_the_existing_one() {
        let existing = vec![SurvivalRecord::new(
            PatientId(7),
            "COPD",
            date(2024, 1, 10),
            FileStatus::Active,
        )];
        let args = parse_add(&[
            "--status",
            "closed_died",
            "--dod",
            "2024-03-01",
            "--days-in-care",
            "51",
            "--registered",
            "2024-01-10",
            "--care-level",
            "High Care",
        ])
        .unwrap();

        let saved = add_record(existing, args.to_record(date(2024, 6, 1))).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].file_status, FileStatus::ClosedDied);
        assert_eq!(saved[0].dod, Some(date(2024, 3, 1)));
        assert_eq!(saved[0].days_in_care, Some(51));
        assert_eq!(saved[0].level_of_care, Some(CareLevel::High));
    }

    #[test]
    fn registration_defaults_to_today() {
        let record = parse_add(&[]).unwrap().to_record(date(2024, 6, 1));
        assert_eq!(record.date_case_registered, date(2024, 6, 1));
        assert_eq!(record.file_status, FileStatus::Active);
    }

    #[test]
    fn negative_days_and_unknown_codes_are_rejected_by_the_parser() {
        assert!(parse_add(&["--days-in-care=-3"]).is_err());
        assert!(parse_add(&["--status", "discharged"]).is_err());
        assert!(parse_add(&["--care-level", "intensive"]).is_err());
    }
}
