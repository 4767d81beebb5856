use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::constants::{ID_COLUMN, JOIN_STAGE};
use crate::error::{ConsolidatorError, Result};
use crate::table::{Column, Table};

/// What to do when a secondary table has more than one row for an `id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKeyPolicy {
    /// Fail the join, naming the table and the offending key.
    #[default]
    Reject,
    /// Use the first row for each key in file order and ignore the rest.
    FirstMatch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinSourceReport {
    pub label: String,
    pub rows: usize,
    pub matched: usize,
    pub duplicate_rows_ignored: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinReport {
    pub primary_rows: usize,
    pub sources: Vec<JoinSourceReport>,
}

/// Left-joins per-drive metadata tables onto a primary table by `id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityJoiner {
    policy: DuplicateKeyPolicy,
}

impl EntityJoiner {
    pub fn new(policy: DuplicateKeyPolicy) -> Self {
        Self { policy }
    }

    /// Join every secondary onto `primary`, in order.
    pub fn join_all(&self, primary: Table, secondaries: &[Table]) -> Result<(Table, JoinReport)> {
        let primary_rows = primary.len();
        let (joined, sources) = secondaries.iter().try_fold(
            (primary, Vec::with_capacity(secondaries.len())),
            |(acc, mut sources), secondary| {
                let (next, report) = self.left_join(acc, secondary)?;
                sources.push(report);
                Ok::<_, ConsolidatorError>((next, sources))
            },
        )?;

        info!(
            "Consolidated {} primary rows with {} secondary tables into {} columns",
            primary_rows,
            sources.len(),
            joined.columns().len()
        );
        Ok((joined, JoinReport { primary_rows, sources }))
    }

    /// Left join of `right` onto `left` on `id`.
    ///
    /// Every left row appears exactly once in the result. Non-key columns of
    /// `right` are appended, null where `left` has no match. When a column
    /// base name already exists, each column sharing that base is renamed to
    /// `<base>_<source label>`.
    pub fn left_join(&self, left: Table, right: &Table) -> Result<(Table, JoinSourceReport)> {
        left.require_columns(JOIN_STAGE, &[ID_COLUMN])?;
        right.require_columns(JOIN_STAGE, &[ID_COLUMN])?;
        left.require_unique_columns()?;
        right.require_unique_columns()?;

        let right_key = right.column_index(ID_COLUMN).unwrap_or_default();
        let left_key = left.column_index(ID_COLUMN).unwrap_or_default();

        let (lookup, duplicate_rows_ignored) = self.index_by_key(right)?;
        let columns = merge_columns(&left, right, right_key)?;
        let width = right.columns().len() - 1;
        let label = left.label().to_string();

        let mut matched = 0;
        let mut rows = Vec::with_capacity(left.len());
        for mut row in left.into_rows() {
            let hit = row[left_key].as_deref().and_then(|id| lookup.get(id).copied());
            match hit {
                Some(r) => {
                    matched += 1;
                    row.extend(
                        right.rows()[r]
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| *i != right_key)
                            .map(|(_, cell)| cell.clone()),
                    );
                }
                None => row.extend(std::iter::repeat(None).take(width)),
            }
            rows.push(row);
        }

        debug!("Joined '{}': {} of {} rows matched", right.label(), matched, rows.len());
        metrics::counter!("acl_join_rows_matched_total").increment(matched as u64);

        let report = JoinSourceReport {
            label: right.label().to_string(),
            rows: right.len(),
            matched,
            duplicate_rows_ignored,
        };
        Ok((Table::from_parts(label, columns, rows), report))
    }

    fn index_by_key<'t>(&self, table: &'t Table) -> Result<(HashMap<&'t str, usize>, usize)> {
        let mut lookup = HashMap::with_capacity(table.len());
        let mut ignored = 0;
        for i in 0..table.len() {
            let Some(id) = table.value(i, ID_COLUMN) else {
                continue;
            };
            if lookup.contains_key(id) {
                match self.policy {
                    DuplicateKeyPolicy::Reject => {
                        return Err(ConsolidatorError::DuplicateKey {
                            table: table.label().to_string(),
                            key: id.to_string(),
                        });
                    }
                    DuplicateKeyPolicy::FirstMatch => ignored += 1,
                }
            } else {
                lookup.insert(id, i);
            }
        }

        if ignored > 0 {
            warn!(
                "Secondary table '{}' has {} extra rows for repeated ids; first row per id used",
                table.label(),
                ignored
            );
        }
        Ok((lookup, ignored))
    }
}

/// Column list of `left` followed by every column of `right` except the one
/// at `right_key`, with colliding base names suffixed by their source label.
/// Row cells are appended with the same index excluded.
fn merge_columns(left: &Table, right: &Table, right_key: usize) -> Result<Vec<Column>> {
    let mut columns: Vec<Column> = left.columns().to_vec();
    let incoming: Vec<Column> = right
        .columns()
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != right_key)
        .map(|(_, c)| c.clone())
        .collect();

    let mut touched = HashSet::new();
    let mut appended = Vec::with_capacity(incoming.len());
    for mut col in incoming {
        let collides = columns
            .iter()
            .any(|c| c.base == col.base && c.name != ID_COLUMN);
        if collides {
            for existing in columns.iter_mut().filter(|c| c.base == col.base) {
                existing.name = format!("{}_{}", existing.base, existing.source);
                touched.insert(existing.name.clone());
            }
            col.name = format!("{}_{}", col.base, col.source);
            debug!("Column '{}' collides; renamed to '{}'", col.base, col.name);
        }
        touched.insert(col.name.clone());
        appended.push(col);
    }
    columns.extend(appended);

    let mut seen = HashSet::new();
    for col in &columns {
        if !seen.insert(col.name.as_str()) && touched.contains(&col.name) {
            return Err(ConsolidatorError::ColumnCollision {
                table: right.label().to_string(),
                column: col.name.clone(),
            });
        }
    }
    Ok(columns)
}
