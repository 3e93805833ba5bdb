//! Reading semicolon-delimited telemetry logs into untyped batches.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord, Trim};
use rayon::prelude::*;
use thiserror::Error;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::KfError;

pub const DELIMITER: u8 = b';';

/// Failure to turn one file into a batch. Never fatal on its own.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("file not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{} has no header row", .0.display())]
    NoHeader(PathBuf),
    #[error(
        "{}: line {line} has {found} fields but the header declares {expected}",
        .path.display()
    )]
    RaggedRow {
        path: PathBuf,
        line: u64,
        expected: usize,
        found: usize,
    },
}

impl LoadError {
    pub fn is_missing(&self) -> bool {
        matches!(self, LoadError::Missing(_))
    }

    pub fn path(&self) -> &Path {
        match self {
            LoadError::Missing(path) | LoadError::NoHeader(path) => path,
            LoadError::Io { path, .. }
            | LoadError::Csv { path, .. }
            | LoadError::RaggedRow { path, .. } => path,
        }
    }
}

/// Column names of one source file, in header order.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(columns: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(columns.len());
        for (pos, name) in columns.iter().enumerate() {
            index.entry(name.clone()).or_insert(pos);
        }
        Self { columns, index }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }
}

/// One data row as raw strings, addressed by column name.
#[derive(Debug, Clone)]
pub struct RawRow {
    schema: Arc<Schema>,
    record: StringRecord,
}

impl RawRow {
    pub fn new(schema: Arc<Schema>, record: StringRecord) -> Self {
        Self { schema, record }
    }

    /// Raw value of `column`; `None` when the column is unknown to this row's
    /// file or the row was shorter than its header.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.schema
            .position(column)
            .and_then(|pos| self.record.get(pos))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: PathBuf,
    pub schema: Arc<Schema>,
    pub rows: Vec<RawRow>,
}

impl SourceBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Load one file from disk.
pub fn load_batch(path: &Path) -> Result<SourceBatch, LoadError> {
    if !path.exists() {
        return Err(LoadError::Missing(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_batch(path.to_path_buf(), file)
}

/// Parse a batch from any reader; `source` only labels the result and errors.
pub fn read_batch<R: Read>(source: PathBuf, reader: R) -> Result<SourceBatch, LoadError> {
    let mut csv_reader = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader.headers().map_err(|e| csv_error(&source, e))?;
    if headers.is_empty() || headers.iter().all(str::is_empty) {
        return Err(LoadError::NoHeader(source));
    }
    let schema = Arc::new(Schema::new(headers.iter().map(str::to_string).collect()));
    let expected = schema.columns().len();

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result.map_err(|e| csv_error(&source, e))?;
        if record.len() > expected {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            return Err(LoadError::RaggedRow {
                path: source,
                line,
                expected,
                found: record.len(),
            });
        }
        rows.push(RawRow::new(Arc::clone(&schema), record));
    }

    Ok(SourceBatch {
        source,
        schema,
        rows,
    })
}

fn csv_error(path: &Path, err: csv::Error) -> LoadError {
    LoadError::Csv {
        path: path.to_path_buf(),
        source: err,
    }
}

/// Load every path in list order, skipping missing or unreadable files.
///
/// Files are parsed in parallel when `parallel` is set; results and
/// diagnostics are still reported in list order. Fails only when nothing
/// could be loaded.
pub fn load_batches(
    paths: &[PathBuf],
    parallel: bool,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<SourceBatch>, KfError> {
    let results: Vec<Result<SourceBatch, LoadError>> = if parallel {
        paths.par_iter().map(|path| load_batch(path)).collect()
    } else {
        paths.iter().map(|path| load_batch(path)).collect()
    };

    let mut batches = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(batch) => {
                diagnostics.push(Diagnostic::BatchLoaded {
                    path: batch.source.clone(),
                    rows: batch.len(),
                });
                batches.push(batch);
            }
            Err(LoadError::Missing(path)) => {
                diagnostics.push(Diagnostic::FileMissing { path });
            }
            Err(err) => {
                diagnostics.push(Diagnostic::LoadFailed {
                    path: err.path().to_path_buf(),
                    reason: err.to_string(),
                });
            }
        }
    }

    if batches.is_empty() {
        return Err(KfError::NoBatchesLoaded {
            attempted: paths.to_vec(),
        });
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_from(text: &str) -> Result<SourceBatch, LoadError> {
        read_batch(PathBuf::from("inline.csv"), text.as_bytes())
    }

    #[test]
    fn header_and_rows_are_kept_as_strings() {
        let batch = batch_from("#DateLog; LatGps; Speed\n2024-09-30 10:00:00.000000; 48,2; 12.5\n")
            .unwrap();
        assert_eq!(batch.schema.columns(), &["#DateLog", "LatGps", "Speed"]);
        assert_eq!(batch.len(), 1);
        let row = &batch.rows[0];
        assert_eq!(row.get("#DateLog"), Some("2024-09-30 10:00:00.000000"));
        assert_eq!(row.get("LatGps"), Some("48,2"));
        assert_eq!(row.get("Speed"), Some("12.5"));
        assert_eq!(row.get("Unknown"), None);
    }

    #[test]
    fn short_rows_read_as_absent_fields() {
        let batch = batch_from("a;b;c\n1;2\n").unwrap();
        assert_eq!(batch.rows[0].get("b"), Some("2"));
        assert_eq!(batch.rows[0].get("c"), None);
    }

    #[test]
    fn long_rows_fail_the_file() {
        let err = batch_from("a;b\n1;2\n1;2;3\n").unwrap_err();
        match err {
            LoadError::RaggedRow {
                line,
                expected,
                found,
                ..
            } => {
                assert_eq!(line, 3);
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_input_has_no_header() {
        assert!(matches!(batch_from(""), Err(LoadError::NoHeader(_))));
    }

    #[test]
    fn invalid_utf8_is_a_parse_failure() {
        let bytes: &[u8] = b"a;b\n\xff\xfe;1\n";
        let err = read_batch(PathBuf::from("bad.csv"), bytes).unwrap_err();
        assert!(matches!(err, LoadError::Csv { .. }));
        assert!(!err.is_missing());
    }

    #[test]
    fn missing_path_is_classified() {
        let err = load_batch(Path::new("definitely/not/here.csv")).unwrap_err();
        assert!(err.is_missing());
    }

    #[test]
    fn duplicate_headers_resolve_to_first() {
        let schema = Schema::new(vec!["x".into(), "y".into(), "x".into()]);
        assert_eq!(schema.position("x"), Some(0));
        assert_eq!(schema.position("y"), Some(1));
    }
}
