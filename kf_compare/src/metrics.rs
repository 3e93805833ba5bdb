//! Per-row divergence between the raw GPS and the filtered stream.

use chrono::NaiveDateTime;
use ndarray::Array1;
use serde::Serialize;

use crate::clean::{CleanDataset, CleanRow};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RowMetrics {
    /// Great-circle distance between raw and filtered position, meters.
    pub positional_divergence_m: f64,
    /// Filtered speed minus raw speed.
    pub speed_divergence: f64,
}

impl RowMetrics {
    pub fn for_row(row: &CleanRow) -> Self {
        Self {
            positional_divergence_m: row.raw.distance_to(&row.filtered),
            speed_divergence: row.filtered_speed - row.raw_speed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalyzedRow {
    #[serde(flatten)]
    pub row: CleanRow,
    #[serde(flatten)]
    pub metrics: RowMetrics,
}

/// Cleaned rows in chronological order, each with its derived metrics.
#[derive(Clone, Debug, Default)]
pub struct Comparison {
    pub rows: Vec<AnalyzedRow>,
}

impl Comparison {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn series(&self) -> ComparisonSeries {
        ComparisonSeries::from_rows(&self.rows)
    }
}

pub fn derive_metrics(dataset: CleanDataset) -> Comparison {
    let rows = dataset
        .into_rows()
        .into_iter()
        .map(|row| {
            let metrics = RowMetrics::for_row(&row);
            AnalyzedRow { row, metrics }
        })
        .collect();
    Comparison { rows }
}

/// Column-oriented view of a [`Comparison`], as consumed by the chart.
#[derive(Clone, Debug)]
pub struct ComparisonSeries {
    pub timestamps: Vec<NaiveDateTime>,
    pub filtered_speed: Array1<f64>,
    pub raw_speed: Array1<f64>,
    pub speed_divergence: Array1<f64>,
    pub positional_divergence: Array1<f64>,
}

impl ComparisonSeries {
    pub fn from_rows(rows: &[AnalyzedRow]) -> Self {
        Self {
            timestamps: rows.iter().map(|r| r.row.timestamp).collect(),
            filtered_speed: rows.iter().map(|r| r.row.filtered_speed).collect(),
            raw_speed: rows.iter().map(|r| r.row.raw_speed).collect(),
            speed_divergence: rows.iter().map(|r| r.metrics.speed_divergence).collect(),
            positional_divergence: rows
                .iter()
                .map(|r| r.metrics.positional_divergence_m)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        self.timestamps.first().copied()
    }

    /// Seconds elapsed since the first timestamp, one entry per row.
    pub fn offsets_seconds(&self) -> Array1<f64> {
        let Some(base) = self.start() else {
            return Array1::zeros(0);
        };
        self.timestamps
            .iter()
            .map(|t| seconds_between(base, *t))
            .collect()
    }

    pub fn span_seconds(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => seconds_between(*first, *last),
            _ => 0.0,
        }
    }

    pub fn summary(&self) -> MetricSummary {
        let abs_speed = self.speed_divergence.mapv(f64::abs);
        let squares = self.speed_divergence.mapv(|v| v * v);
        MetricSummary {
            rows: self.len(),
            span_s: self.span_seconds(),
            mean_positional_divergence_m: self.positional_divergence.mean().unwrap_or(0.0),
            max_positional_divergence_m: max_or_zero(&self.positional_divergence),
            mean_speed_divergence: self.speed_divergence.mean().unwrap_or(0.0),
            rms_speed_divergence: squares.mean().unwrap_or(0.0).sqrt(),
            max_abs_speed_divergence: max_or_zero(&abs_speed),
        }
    }
}

fn seconds_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

fn max_or_zero(values: &Array1<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricSummary {
    pub rows: usize,
    pub span_s: f64,
    pub mean_positional_divergence_m: f64,
    pub max_positional_divergence_m: f64,
    pub mean_speed_divergence: f64,
    pub rms_speed_divergence: f64,
    pub max_abs_speed_divergence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::LatLon;
    use chrono::NaiveDate;

    fn at(second: u32, micro: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 9, 30)
            .unwrap()
            .and_hms_micro_opt(10, 0, second, micro)
            .unwrap()
    }

    fn row(
        second: u32,
        raw: LatLon,
        raw_speed: f64,
        filtered: LatLon,
        filtered_speed: f64,
    ) -> CleanRow {
        CleanRow {
            timestamp: at(second, 0),
            raw,
            raw_speed,
            filtered,
            filtered_speed,
        }
    }

    #[test]
    fn identical_positions_have_zero_divergence() {
        let p = LatLon::new(48.2082, 16.3738);
        let metrics = RowMetrics::for_row(&row(0, p, 10.0, p, 12.5));
        assert_eq!(metrics.positional_divergence_m, 0.0);
        assert_eq!(metrics.speed_divergence, 2.5);
    }

    #[test]
    fn speed_divergence_is_signed() {
        let p = LatLon::new(0.0, 0.0);
        let metrics = RowMetrics::for_row(&row(0, p, 12.0, p, 9.5));
        assert_eq!(metrics.speed_divergence, -2.5);
    }

    #[test]
    fn summary_aggregates_columns() {
        let p = LatLon::new(0.0, 0.0);
        let q = LatLon::new(0.0, 0.001);
        let comparison = Comparison {
            rows: vec![
                AnalyzedRow {
                    row: row(0, p, 10.0, p, 11.0),
                    metrics: RowMetrics::for_row(&row(0, p, 10.0, p, 11.0)),
                },
                AnalyzedRow {
                    row: row(2, p, 10.0, q, 7.0),
                    metrics: RowMetrics::for_row(&row(2, p, 10.0, q, 7.0)),
                },
            ],
        };
        let series = comparison.series();
        assert_eq!(series.len(), 2);
        assert_eq!(series.offsets_seconds().to_vec(), vec![0.0, 2.0]);

        let summary = series.summary();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.span_s, 2.0);
        assert_eq!(summary.mean_speed_divergence, -1.0);
        assert_eq!(summary.max_abs_speed_divergence, 3.0);
        assert!((summary.rms_speed_divergence - 5.0_f64.sqrt()).abs() < 1e-12);
        assert!((summary.max_positional_divergence_m - 111.195).abs() < 0.5);
    }

    #[test]
    fn sub_second_offsets_keep_microseconds() {
        let series = ComparisonSeries {
            timestamps: vec![at(0, 0), at(0, 250_000), at(1, 500)],
            filtered_speed: Array1::zeros(3),
            raw_speed: Array1::zeros(3),
            speed_divergence: Array1::zeros(3),
            positional_divergence: Array1::zeros(3),
        };
        let offsets = series.offsets_seconds();
        assert_eq!(offsets[1], 0.25);
        assert!((offsets[2] - 1.0005).abs() < 1e-12);
    }

    #[test]
    fn empty_series_summarizes_to_zero() {
        let summary = Comparison::default().series().summary();
        assert_eq!(summary.rows, 0);
        assert_eq!(summary.max_positional_divergence_m, 0.0);
        assert_eq!(summary.rms_speed_divergence, 0.0);
    }
}
