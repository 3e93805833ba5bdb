use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::load::{RawRow, Schema, SourceBatch};

/// All loaded rows in insertion order (file order, then line order).
#[derive(Debug, Clone, Default)]
pub struct MergedDataset {
    /// Union of column names, in first-seen order.
    pub columns: Vec<String>,
    /// Header of every merged file, kept for coverage checks only.
    pub sources: Vec<(PathBuf, Arc<Schema>)>,
    pub rows: Vec<RawRow>,
}

impl MergedDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// Concatenate batches without validating or deduplicating anything.
pub fn merge_batches(batches: Vec<SourceBatch>) -> MergedDataset {
    let total = batches.iter().map(SourceBatch::len).sum();
    let mut merged = MergedDataset {
        columns: Vec::new(),
        sources: Vec::with_capacity(batches.len()),
        rows: Vec::with_capacity(total),
    };
    let mut seen = HashSet::new();
    for batch in batches {
        for column in batch.schema.columns() {
            if seen.insert(column.clone()) {
                merged.columns.push(column.clone());
            }
        }
        merged.sources.push((batch.source, batch.schema));
        merged.rows.extend(batch.rows);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::read_batch;

    fn batch(name: &str, text: &str) -> SourceBatch {
        read_batch(PathBuf::from(name), text.as_bytes()).unwrap()
    }

    #[test]
    fn row_count_is_sum_of_batches() {
        let a = batch("a.csv", "x;y\n1;2\n3;4\n");
        let b = batch("b.csv", "x;y\n5;6\n");
        let empty = batch("c.csv", "x;y\n");
        let merged = merge_batches(vec![a, b, empty]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.sources.len(), 3);
        let xs: Vec<_> = merged.rows.iter().map(|r| r.get("x").unwrap()).collect();
        assert_eq!(xs, vec!["1", "3", "5"]);
    }

    #[test]
    fn columns_are_unioned_by_name() {
        let a = batch("a.csv", "x;y\n1;2\n");
        let b = batch("b.csv", "y;z;x\n3;4;5\n");
        let merged = merge_batches(vec![a, b]);
        assert_eq!(merged.columns, vec!["x", "y", "z"]);
        // rows keep their own header mapping
        assert_eq!(merged.rows[1].get("x"), Some("5"));
        assert_eq!(merged.rows[0].get("z"), None);
        assert!(merged.has_column("z"));
    }
}
