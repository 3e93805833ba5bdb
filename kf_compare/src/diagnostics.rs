//! Non-fatal events collected while the pipeline runs.
//!
//! Stages push into a shared [`Diagnostics`] instead of printing, so callers
//! decide how (and whether) to surface them.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    FileMissing {
        path: PathBuf,
    },
    LoadFailed {
        path: PathBuf,
        reason: String,
    },
    BatchLoaded {
        path: PathBuf,
        rows: usize,
    },
    Merged {
        batches: usize,
        rows: usize,
    },
    RowsDropped {
        dropped: usize,
        remaining: usize,
        invalid_by_column: Vec<(String, usize)>,
    },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::FileMissing { .. }
            | Diagnostic::LoadFailed { .. }
            | Diagnostic::RowsDropped { .. } => Severity::Warning,
            Diagnostic::BatchLoaded { .. } | Diagnostic::Merged { .. } => Severity::Info,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::FileMissing { path } => {
                write!(f, "file not found: {}, skipping", path.display())
            }
            Diagnostic::LoadFailed { path, reason } => {
                write!(f, "could not load {}: {}, skipping", path.display(), reason)
            }
            Diagnostic::BatchLoaded { path, rows } => {
                write!(f, "loaded {} ({} rows)", path.display(), rows)
            }
            Diagnostic::Merged { batches, rows } => {
                write!(f, "combined {} files, {} rows total", batches, rows)
            }
            Diagnostic::RowsDropped {
                dropped,
                remaining,
                invalid_by_column,
            } => {
                write!(
                    f,
                    "dropped {} rows with missing/invalid coordinate or speed values ({} remain)",
                    dropped, remaining
                )?;
                if !invalid_by_column.is_empty() {
                    let parts: Vec<String> = invalid_by_column
                        .iter()
                        .map(|(column, count)| format!("{}={}", column, count))
                        .collect();
                    write!(f, "; invalid values per column: {}", parts.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity() == Severity::Warning)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total rows removed by cleaning, zero if nothing was dropped.
    pub fn rows_dropped(&self) -> usize {
        self.entries
            .iter()
            .map(|d| match d {
                Diagnostic::RowsDropped { dropped, .. } => *dropped,
                _ => 0,
            })
            .sum()
    }
}
