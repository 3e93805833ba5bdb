//! Per-file health report, used to find out why a log contributes nothing.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::clean::parse_timestamp;
use crate::load::{load_batch, LoadError, SourceBatch};
use crate::numeric::coerce_field;
use crate::Params;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InspectionStatus {
    Loaded,
    Missing,
    Failed { reason: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct FileInspection {
    pub path: PathBuf,
    pub status: InspectionStatus,
    pub rows: usize,
    pub columns: Vec<String>,
    pub missing_required: Vec<String>,
    pub invalid_numeric: Vec<(String, usize)>,
    pub complete_rows: usize,
    pub timestamp_failures: usize,
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_timestamp: Option<NaiveDateTime>,
    /// Adjacent rows whose timestamp goes backwards.
    pub out_of_order: usize,
}

impl FileInspection {
    fn empty(path: &Path, status: InspectionStatus) -> Self {
        Self {
            path: path.to_path_buf(),
            status,
            rows: 0,
            columns: Vec::new(),
            missing_required: Vec::new(),
            invalid_numeric: Vec::new(),
            complete_rows: 0,
            timestamp_failures: 0,
            first_timestamp: None,
            last_timestamp: None,
            out_of_order: 0,
        }
    }

    /// True when this file would contribute rows to a comparison run.
    pub fn is_usable(&self) -> bool {
        self.status == InspectionStatus::Loaded
            && self.missing_required.is_empty()
            && self.complete_rows > 0
    }

    pub fn render_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FileInspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FILE: {}", self.path.display())?;
        match &self.status {
            InspectionStatus::Missing => return writeln!(f, "  status: missing"),
            InspectionStatus::Failed { reason } => {
                return writeln!(f, "  status: failed ({})", reason)
            }
            InspectionStatus::Loaded => writeln!(f, "  status: loaded")?,
        }
        writeln!(f, "  rows: {}", self.rows)?;
        writeln!(f, "  complete_rows: {}", self.complete_rows)?;
        writeln!(f, "  columns: {}", self.columns.join(", "))?;
        if !self.missing_required.is_empty() {
            writeln!(f, "  missing_required: {}", self.missing_required.join(", "))?;
        }
        if !self.invalid_numeric.is_empty() {
            writeln!(f, "  invalid_numeric:")?;
            for (column, count) in &self.invalid_numeric {
                writeln!(f, "    - {}: {}", column, count)?;
            }
        }
        writeln!(f, "  timestamp_failures: {}", self.timestamp_failures)?;
        if let (Some(first), Some(last)) = (self.first_timestamp, self.last_timestamp) {
            writeln!(f, "  first: {}", first)?;
            writeln!(f, "  last: {}", last)?;
            writeln!(
                f,
                "  timespan_s: {:.1}",
                (last - first).num_milliseconds() as f64 / 1000.0
            )?;
        }
        if self.out_of_order > 0 {
            writeln!(f, "  out_of_order: {}", self.out_of_order)?;
        }
        Ok(())
    }
}

pub fn inspect_file(path: &Path, params: &Params) -> FileInspection {
    match load_batch(path) {
        Ok(batch) => inspect_batch(&batch, params),
        Err(LoadError::Missing(_)) => FileInspection::empty(path, InspectionStatus::Missing),
        Err(err) => FileInspection::empty(
            path,
            InspectionStatus::Failed {
                reason: err.to_string(),
            },
        ),
    }
}

pub fn inspect_batch(batch: &SourceBatch, params: &Params) -> FileInspection {
    let names = &params.columns;
    let mut report = FileInspection::empty(&batch.source, InspectionStatus::Loaded);
    report.rows = batch.len();
    report.columns = batch.schema.columns().to_vec();
    report.missing_required = names
        .required()
        .iter()
        .filter(|name| !batch.schema.contains(name))
        .map(|name| name.to_string())
        .collect();

    let numeric_columns = names.numeric();
    let mut invalid = [0usize; 6];
    let mut previous: Option<NaiveDateTime> = None;

    for row in &batch.rows {
        let mut complete = true;
        for (count, column) in invalid.iter_mut().zip(numeric_columns) {
            if coerce_field(row.get(column)).is_missing() {
                *count += 1;
                complete = false;
            }
        }
        if complete {
            report.complete_rows += 1;
        }

        let raw_ts = row.get(&names.timestamp).unwrap_or_default();
        match parse_timestamp(raw_ts, &params.timestamp_format) {
            Ok(ts) => {
                if previous.is_some_and(|p| ts < p) {
                    report.out_of_order += 1;
                }
                previous = Some(ts);
                report.first_timestamp = Some(report.first_timestamp.map_or(ts, |f| f.min(ts)));
                report.last_timestamp = Some(report.last_timestamp.map_or(ts, |l| l.max(ts)));
            }
            Err(_) => report.timestamp_failures += 1,
        }
    }

    report.invalid_numeric = numeric_columns
        .iter()
        .zip(invalid)
        .filter(|(_, count)| *count > 0)
        .map(|(column, count)| (column.to_string(), count))
        .collect();
    report
}
