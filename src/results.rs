use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::SqlValue;

/// Raw result of one statement: ordered column names and row tuples aligned
/// to them. Ownership transfers to the caller with the response envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RawResult {
    /// Empty result, as produced by `Method::Run`.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Materialize every row into a by-name addressable `Row`. The column
    /// vector and its index map are built once and shared by all rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        let columns = Arc::new(self.columns);
        let index: Arc<HashMap<String, usize>> = Arc::new(
            columns
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect(),
        );
        self.rows
            .into_iter()
            .map(|values| Row {
                columns: Arc::clone(&columns),
                values,
                index: Arc::clone(&index),
            })
            .collect()
    }

    /// Materialize only the first row, if any.
    #[must_use]
    pub fn into_first_row(self) -> Option<Row> {
        self.into_rows().into_iter().next()
    }
}

/// A materialized row with by-name field access.
///
/// Column names are shared across all rows of a result set; lookups go
/// through a per-result index map rather than repeated string scans.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<SqlValue>,
    index: Arc<HashMap<String, usize>>,
}

impl Row {
    /// The column names this row is aligned to.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get a value by column name, or None if the column is absent.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        let idx = self
            .index
            .get(column_name)
            .copied()
            .or_else(|| self.columns.iter().position(|col| col == column_name))?;
        self.values.get(idx)
    }

    /// Get a value by column position, or None if out of bounds.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// The raw value tuple, aligned to `columns()`.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawResult {
        RawResult {
            columns: vec!["id".into(), "name".into()],
            rows: vec![
                vec![SqlValue::Int(1), SqlValue::Text("a".into())],
                vec![SqlValue::Int(2), SqlValue::Text("b".into())],
            ],
        }
    }

    #[test]
    fn rows_address_by_name_and_index() {
        let rows = sample().into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&SqlValue::Int(1)));
        assert_eq!(rows[1].get("name"), Some(&SqlValue::Text("b".into())));
        assert_eq!(rows[1].get_by_index(0), Some(&SqlValue::Int(2)));
        assert_eq!(rows[0].get("missing"), None);
    }

    #[test]
    fn short_row_tuples_are_tolerated() {
        let result = RawResult {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![SqlValue::Int(1)]],
        };
        let rows = result.into_rows();
        assert_eq!(rows[0].get("a"), Some(&SqlValue::Int(1)));
        assert_eq!(rows[0].get("b"), None);
    }
}
