//! Raw GPS vs. Kalman-filtered telemetry comparison.
//!
//! Loads several semicolon-delimited vehicle logs, merges them into one
//! chronologically ordered dataset and derives, per row, the distance between
//! the raw and filtered positions and the difference between the two speeds.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod clean;
pub mod diagnostics;
pub mod geo;
pub mod inspect;
pub mod load;
pub mod merge;
pub mod metrics;
pub mod numeric;

pub use clean::{clean_dataset, parse_timestamp, CleanDataset, CleanRow, TimestampError};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use geo::{haversine_distance, LatLon, EARTH_RADIUS_M};
pub use inspect::{inspect_file, FileInspection, InspectionStatus};
pub use load::{load_batch, load_batches, LoadError, RawRow, SourceBatch};
pub use merge::{merge_batches, MergedDataset};
pub use metrics::{
    derive_metrics, AnalyzedRow, Comparison, ComparisonSeries, MetricSummary, RowMetrics,
};
pub use numeric::{coerce_numeric, Numeric};

/// Log files read when no explicit list is given.
pub const DEFAULT_INPUTS: [&str; 4] = [
    "2024-09-30_1_vehicle.csv",
    "2024-09-30_2_vehicle.csv",
    "2024-09-30_3_vehicle.csv",
    "2024-09-30_4_vehicle.csv",
];

/// `YYYY-MM-DD HH:MM:SS.ffffff`; the fraction must have one to six digits.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Error, Debug)]
pub enum KfError {
    #[error("no data loaded: none of the {} input files exists or is readable", .attempted.len())]
    NoBatchesLoaded { attempted: Vec<PathBuf> },
    #[error("missing required columns {missing:?}; available columns: {available:?}")]
    MissingColumns {
        missing: Vec<String>,
        available: Vec<String>,
    },
    #[error("required column '{column}' is absent from {}", .file.display())]
    PartialColumnCoverage { column: String, file: PathBuf },
    #[error("no valid data remaining after cleaning ({dropped} rows dropped)")]
    NoValidRows { dropped: usize },
    #[error(
        "timestamp column '{column}' does not match format '{expected}': \
         '{offending}' ({reason}); first values: {samples:?}"
    )]
    TimestampFormat {
        column: String,
        expected: String,
        offending: String,
        reason: String,
        samples: Vec<String>,
    },
}

/// Names of the columns the pipeline reads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnNames {
    pub timestamp: String,
    pub raw_lat: String,
    pub raw_lon: String,
    pub raw_speed: String,
    pub filtered_lat: String,
    pub filtered_lon: String,
    pub filtered_speed: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            timestamp: "#DateLog".to_string(),
            raw_lat: "LatGps".to_string(),
            raw_lon: "LonGps".to_string(),
            raw_speed: "SpeedGps".to_string(),
            filtered_lat: "Latitude".to_string(),
            filtered_lon: "Longitude".to_string(),
            filtered_speed: "Speed".to_string(),
        }
    }
}

impl ColumnNames {
    /// Every column that must be present, timestamp first.
    pub fn required(&self) -> [&str; 7] {
        [
            self.timestamp.as_str(),
            self.raw_lat.as_str(),
            self.raw_lon.as_str(),
            self.raw_speed.as_str(),
            self.filtered_lat.as_str(),
            self.filtered_lon.as_str(),
            self.filtered_speed.as_str(),
        ]
    }

    /// The six numeric columns, in `CleanRow` field order.
    pub fn numeric(&self) -> [&str; 6] {
        [
            self.raw_lat.as_str(),
            self.raw_lon.as_str(),
            self.raw_speed.as_str(),
            self.filtered_lat.as_str(),
            self.filtered_lon.as_str(),
            self.filtered_speed.as_str(),
        ]
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Params {
    pub inputs: Vec<PathBuf>,
    pub columns: ColumnNames,
    pub timestamp_format: String,
    pub parallel_load: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            inputs: DEFAULT_INPUTS.iter().map(PathBuf::from).collect(),
            columns: ColumnNames::default(),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            parallel_load: true,
        }
    }
}

/// Load, merge, clean and analyze `params.inputs`.
///
/// Non-fatal events (skipped files, dropped rows) are appended to
/// `diagnostics` even when the run ultimately fails.
pub fn run_pipeline(params: &Params, diagnostics: &mut Diagnostics) -> Result<Comparison, KfError> {
    let batches = load_batches(&params.inputs, params.parallel_load, diagnostics)?;
    let merged = merge_batches(batches);
    diagnostics.push(Diagnostic::Merged {
        batches: merged.sources.len(),
        rows: merged.len(),
    });
    let cleaned = clean_dataset(merged, params, diagnostics)?;
    Ok(derive_metrics(cleaned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_use_fixed_inputs() {
        let params = Params::default();
        assert_eq!(params.inputs.len(), 4);
        assert_eq!(params.inputs[0], PathBuf::from("2024-09-30_1_vehicle.csv"));
        assert_eq!(params.columns.required()[0], "#DateLog");
        assert_eq!(params.columns.numeric()[5], "Speed");
    }

    #[test]
    fn missing_columns_message_names_both_sides() {
        let err = KfError::MissingColumns {
            missing: vec!["Speed".into()],
            available: vec!["#DateLog".into(), "LatGps".into()],
        };
        let text = err.to_string();
        assert!(text.contains("[\"Speed\"]"));
        assert!(text.contains("LatGps"));
    }
}
