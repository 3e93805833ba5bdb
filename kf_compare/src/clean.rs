//! Validation and cleaning of the merged dataset.
//!
//! The merged rows are still untyped strings. Cleaning checks the column set,
//! coerces the six numeric columns, drops incomplete rows, parses timestamps
//! and finally sorts chronologically, producing typed [`CleanRow`]s.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::geo::LatLon;
use crate::merge::MergedDataset;
use crate::numeric::{coerce_field, Numeric};
use crate::{ColumnNames, KfError, Params};

/// Number of timestamp values quoted when the format does not match.
const TIMESTAMP_SAMPLE_LEN: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CleanRow {
    pub timestamp: NaiveDateTime,
    pub raw: LatLon,
    pub raw_speed: f64,
    pub filtered: LatLon,
    pub filtered_speed: f64,
}

impl CleanRow {
    fn from_fields(timestamp: NaiveDateTime, v: [f64; 6]) -> Self {
        Self {
            timestamp,
            raw: LatLon::new(v[0], v[1]),
            raw_speed: v[2],
            filtered: LatLon::new(v[3], v[4]),
            filtered_speed: v[5],
        }
    }
}

/// Rows with all fields valid, sorted by timestamp (ties keep merge order).
#[derive(Clone, Debug, Default)]
pub struct CleanDataset {
    rows: Vec<CleanRow>,
}

impl CleanDataset {
    pub fn rows(&self) -> &[CleanRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<CleanRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        Some((self.rows.first()?.timestamp, self.rows.last()?.timestamp))
    }
}

/// Ensure every required column exists in the union and in every source file.
pub fn check_columns(merged: &MergedDataset, columns: &ColumnNames) -> Result<(), KfError> {
    let missing: Vec<String> = columns
        .required()
        .iter()
        .filter(|name| !merged.has_column(name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(KfError::MissingColumns {
            missing,
            available: merged.columns.clone(),
        });
    }

    for (file, schema) in &merged.sources {
        if let Some(column) = columns.required().iter().find(|name| !schema.contains(name)) {
            return Err(KfError::PartialColumnCoverage {
                column: column.to_string(),
                file: file.clone(),
            });
        }
    }
    Ok(())
}

/// Longest fraction accepted after the seconds; the logs write microseconds.
const MAX_FRACTION_DIGITS: usize = 6;

#[derive(Error, Debug)]
pub enum TimestampError {
    #[error(transparent)]
    Parse(#[from] chrono::ParseError),
    #[error("expected '.' followed by 1 to 6 fraction digits after the seconds")]
    Fraction,
}

/// Parse one timestamp after trimming surrounding whitespace.
///
/// chrono treats a trailing `%.f` as optional and reads up to nine digits;
/// here it requires a fraction of one to six digits.
pub fn parse_timestamp(raw: &str, format: &str) -> Result<NaiveDateTime, TimestampError> {
    let raw = raw.trim();
    if format.ends_with("%.f") && !has_fraction(raw) {
        return Err(TimestampError::Fraction);
    }
    Ok(NaiveDateTime::parse_from_str(raw, format)?)
}

fn has_fraction(raw: &str) -> bool {
    match raw.rsplit_once('.') {
        Some((_, digits)) => {
            (1..=MAX_FRACTION_DIGITS).contains(&digits.len())
                && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Parse a whole timestamp column; a single mismatch rejects the column.
pub fn parse_timestamp_column(
    raw: &[String],
    column: &str,
    format: &str,
) -> Result<Vec<NaiveDateTime>, KfError> {
    raw.iter()
        .map(|value| {
            parse_timestamp(value, format).map_err(|err| KfError::TimestampFormat {
                column: column.to_string(),
                expected: format.to_string(),
                offending: value.clone(),
                reason: err.to_string(),
                samples: raw.iter().take(TIMESTAMP_SAMPLE_LEN).cloned().collect(),
            })
        })
        .collect()
}

fn complete(values: [Numeric; 6]) -> Option<[f64; 6]> {
    let mut out = [0.0; 6];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = value.value()?;
    }
    Some(out)
}

/// Turn the merged raw rows into a sorted, fully numeric dataset.
pub fn clean_dataset(
    merged: MergedDataset,
    params: &Params,
    diagnostics: &mut Diagnostics,
) -> Result<CleanDataset, KfError> {
    let names = &params.columns;
    check_columns(&merged, names)?;

    let numeric_columns = names.numeric();
    let initial = merged.len();
    let mut invalid = [0usize; 6];
    let mut raw_timestamps = Vec::with_capacity(initial);
    let mut values = Vec::with_capacity(initial);

    for row in &merged.rows {
        let coerced = numeric_columns.map(|column| coerce_field(row.get(column)));
        for (count, value) in invalid.iter_mut().zip(coerced.iter()) {
            if value.is_missing() {
                *count += 1;
            }
        }
        if let Some(fields) = complete(coerced) {
            raw_timestamps.push(row.get(&names.timestamp).unwrap_or_default().to_string());
            values.push(fields);
        }
    }
    drop(merged);

    let dropped = initial - values.len();
    if dropped > 0 {
        let invalid_by_column = numeric_columns
            .iter()
            .zip(invalid)
            .filter(|(_, count)| *count > 0)
            .map(|(column, count)| (column.to_string(), count))
            .collect();
        diagnostics.push(Diagnostic::RowsDropped {
            dropped,
            remaining: values.len(),
            invalid_by_column,
        });
    }
    if values.is_empty() {
        return Err(KfError::NoValidRows { dropped });
    }

    let timestamps =
        parse_timestamp_column(&raw_timestamps, &names.timestamp, &params.timestamp_format)?;

    let mut rows: Vec<CleanRow> = timestamps
        .into_iter()
        .zip(values)
        .map(|(timestamp, fields)| CleanRow::from_fields(timestamp, fields))
        .collect();
    // sort_by_key is stable
    rows.sort_by_key(|row| row.timestamp);

    Ok(CleanDataset { rows })
}
