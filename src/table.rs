use crate::error::{ConsolidatorError, Result};
use std::collections::HashSet;

/// A single column of a [`Table`].
///
/// `base` is the name the column had in its source file; `name` is the name
/// it is written out under, which differs from `base` only after the join has
/// disambiguated a collision. `source` is the label of the table that
/// contributed the column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub base: String,
    pub source: String,
}

impl Column {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            base: name.clone(),
            name,
            source: source.into(),
        }
    }
}

/// One cell; `None` is the null/missing marker.
pub type Cell = Option<String>;
pub type Row = Vec<Cell>;

/// An in-memory, fully materialized flat table with a header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    label: String,
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new<S: AsRef<str>>(label: impl Into<String>, headers: &[S]) -> Self {
        let label = label.into();
        let columns = headers
            .iter()
            .map(|h| Column::new(h.as_ref(), label.clone()))
            .collect();
        Self {
            label,
            columns,
            rows: Vec::new(),
        }
    }

    pub(crate) fn from_parts(label: String, columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self { label, columns, rows }
    }

    /// Build a table from string literals; empty strings become `None`.
    /// Mostly useful for tests and small fixtures.
    pub fn from_strs(label: &str, headers: &[&str], rows: &[&[&str]]) -> Self {
        let mut table = Self::new(label, headers);
        for row in rows {
            table.push_row(
                row.iter()
                    .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
                    .collect(),
            );
        }
        table
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub(crate) fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Value of `column` in row `row`, `None` when null or when the column
    /// does not exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    /// Append a row, padding short rows with nulls and dropping surplus cells.
    pub fn push_row(&mut self, mut row: Row) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    /// Required columns absent from this table, in the order they were asked for.
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    /// Fail with a [`ConsolidatorError::MissingColumns`] naming every absent column.
    pub fn require_columns(&self, stage: &'static str, required: &[&str]) -> Result<()> {
        let missing = self.missing_columns(required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConsolidatorError::MissingColumns {
                stage,
                table: self.label.clone(),
                missing,
            })
        }
    }

    /// First column name that appears more than once, if any.
    pub fn duplicate_column(&self) -> Option<&str> {
        let mut seen = HashSet::with_capacity(self.columns.len());
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .find(|name| !seen.insert(*name))
    }

    /// Fail with [`ConsolidatorError::DuplicateColumn`] if any column name repeats.
    pub fn require_unique_columns(&self) -> Result<()> {
        match self.duplicate_column() {
            Some(column) => Err(ConsolidatorError::DuplicateColumn {
                table: self.label.clone(),
                column: column.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_row_pads_and_truncates() {
        let mut table = Table::new("t", &["a", "b", "c"]);
        table.push_row(vec![Some("1".into())]);
        table.push_row(vec![
            Some("1".into()),
            Some("2".into()),
            Some("3".into()),
            Some("4".into()),
        ]);

        assert_eq!(table.rows()[0], vec![Some("1".to_string()), None, None]);
        assert_eq!(table.rows()[1].len(), 3);
    }

    #[test]
    fn test_require_columns_lists_every_missing_column() {
        let table = Table::new("grants", &["id", "role"]);
        let err = table
            .require_columns("dedup", &["id", "name", "role", "type"])
            .unwrap_err();

        match err {
            ConsolidatorError::MissingColumns { stage, table, missing } => {
                assert_eq!(stage, "dedup");
                assert_eq!(table, "grants");
                assert_eq!(missing, vec!["name".to_string(), "type".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_value_lookup_by_column_name() {
        let table = Table::from_strs("t", &["id", "name"], &[&["d1", "Drive"], &["d2", ""]]);
        assert_eq!(table.value(0, "name"), Some("Drive"));
        assert_eq!(table.value(1, "name"), None);
        assert_eq!(table.value(0, "missing"), None);
        assert_eq!(table.value(5, "id"), None);
    }

    #[test]
    fn test_repeated_column_name_is_reported() {
        let table = Table::new("storage", &["id", "bytes", "id"]);
        assert_eq!(table.duplicate_column(), Some("id"));

        let err = table.require_unique_columns().unwrap_err();
        assert!(matches!(
            err,
            ConsolidatorError::DuplicateColumn { ref table, ref column } if table == "storage" && column == "id"
        ));
        assert!(Table::new("drives", &["id", "name"]).require_unique_columns().is_ok());
    }
}
