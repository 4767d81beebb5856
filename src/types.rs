use crate::constants::{
    CREATED_TIME_COLUMN, GRANT_COLUMNS, ID_COLUMN, NAME_COLUMN, ORGANIZER_ROLE,
    PRIMARY_EMAIL_COLUMN, REGISTRY_COLUMNS, UNKNOWN_DRIVE_SENTINEL,
};
use crate::error::Result;
use crate::table::{Column, Row, Table};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One normalized (drive, subject) access grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRecord {
    pub id: String,
    pub name: String,
    pub created_time: String,
    pub email_address: String,
    pub role: String,
    #[serde(rename = "type")]
    pub grant_type: String,
    /// Values for any non-contract columns carried through from the input,
    /// aligned with [`GrantTable::extra_columns`].
    #[serde(skip)]
    pub extra: Vec<Option<String>>,
}

/// Organizer dedup key: `(id, name, emailAddress)`.
pub type DedupKey<'a> = (&'a str, &'a str, &'a str);

impl GrantRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        created_time: impl Into<String>,
        email_address: impl Into<String>,
        role: impl Into<String>,
        grant_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_time: created_time.into(),
            email_address: email_address.into(),
            role: role.into(),
            grant_type: grant_type.into(),
            extra: Vec::new(),
        }
    }

    /// Organizer roles are classified case-insensitively; the stored value
    /// keeps its original casing.
    pub fn is_organizer(&self) -> bool {
        self.role.eq_ignore_ascii_case(ORGANIZER_ROLE)
    }

    pub fn dedup_key(&self) -> DedupKey<'_> {
        (&self.id, &self.name, &self.email_address)
    }
}

/// A normalized grant table: the six contract columns plus any extra
/// columns that came along with the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantTable {
    pub extra_columns: Vec<String>,
    /// Column order used when rendering. Tables read from a file keep the
    /// file's layout; freshly flattened grants use the contract order.
    pub layout: Vec<String>,
    pub records: Vec<GrantRecord>,
}

impl Default for GrantTable {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Where a rendered column takes its value from.
enum Slot {
    Contract(usize),
    Extra(usize),
}

impl GrantTable {
    pub fn new(records: Vec<GrantRecord>) -> Self {
        Self {
            extra_columns: Vec::new(),
            layout: GRANT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            records,
        }
    }

    /// Same columns as `self`, different rows.
    pub fn with_records(&self, records: Vec<GrantRecord>) -> Self {
        Self {
            extra_columns: self.extra_columns.clone(),
            layout: self.layout.clone(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Interpret `table` as a grant table, failing with the list of missing
    /// contract columns on behalf of `stage`. A repeated column name is
    /// rejected.
    pub fn from_table(stage: &'static str, table: &Table) -> Result<Self> {
        table.require_columns(stage, &GRANT_COLUMNS)?;
        table.require_unique_columns()?;

        let contract: Vec<usize> = GRANT_COLUMNS
            .iter()
            .filter_map(|c| table.column_index(c))
            .collect();
        let extra_idx: Vec<usize> = (0..table.columns().len())
            .filter(|i| !contract.contains(i))
            .collect();

        let cell = |row: &Row, idx: usize| row[idx].clone().unwrap_or_default();
        let records = table
            .rows()
            .iter()
            .map(|row| GrantRecord {
                id: cell(row, contract[0]),
                name: cell(row, contract[1]),
                created_time: cell(row, contract[2]),
                email_address: cell(row, contract[3]),
                role: cell(row, contract[4]),
                grant_type: cell(row, contract[5]),
                extra: extra_idx.iter().map(|&i| row[i].clone()).collect(),
            })
            .collect();

        Ok(Self {
            extra_columns: extra_idx
                .iter()
                .map(|&i| table.columns()[i].name.clone())
                .collect(),
            layout: table.headers().into_iter().map(String::from).collect(),
            records,
        })
    }

    fn slot(&self, name: &str) -> Option<Slot> {
        GRANT_COLUMNS
            .iter()
            .position(|c| *c == name)
            .map(Slot::Contract)
            .or_else(|| self.extra_columns.iter().position(|c| c == name).map(Slot::Extra))
    }

    /// Render as a [`Table`] in `layout` order.
    pub fn to_table(&self, label: &str) -> Table {
        let (headers, slots): (Vec<&str>, Vec<Slot>) = self
            .layout
            .iter()
            .filter_map(|name| self.slot(name).map(|slot| (name.as_str(), slot)))
            .unzip();

        let mut table = Table::new(label, &headers);
        for r in &self.records {
            let contract = [
                &r.id,
                &r.name,
                &r.created_time,
                &r.email_address,
                &r.role,
                &r.grant_type,
            ];
            let row = slots
                .iter()
                .map(|slot| match slot {
                    Slot::Contract(i) => non_empty(contract[*i]),
                    Slot::Extra(i) => r.extra.get(*i).cloned().flatten(),
                })
                .collect();
            table.push_row(row);
        }
        table
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Canonical name and creation time of a drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveInfo {
    pub name: String,
    pub created_time: String,
}

/// Drive registry keyed by drive `id`.
#[derive(Debug, Clone, Default)]
pub struct DriveRegistry {
    drives: HashMap<String, DriveInfo>,
}

impl DriveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a registry table with `id`, `name` and `createdTime`.
    /// A repeated `id` replaces the earlier entry.
    pub fn from_table(stage: &'static str, table: &Table) -> Result<Self> {
        table.require_columns(stage, &REGISTRY_COLUMNS)?;

        let mut registry = Self::new();
        for i in 0..table.len() {
            let Some(id) = table.value(i, ID_COLUMN) else {
                continue;
            };
            let info = DriveInfo {
                name: table.value(i, NAME_COLUMN).unwrap_or_default().to_string(),
                created_time: table.value(i, CREATED_TIME_COLUMN).unwrap_or_default().to_string(),
            };
            if registry.drives.insert(id.to_string(), info).is_some() {
                debug!("Drive registry has a repeated id '{}'; keeping the later row", id);
            }
        }
        Ok(registry)
    }

    pub fn insert(&mut self, id: impl Into<String>, info: DriveInfo) {
        self.drives.insert(id.into(), info);
    }

    pub fn get(&self, id: &str) -> Option<&DriveInfo> {
        self.drives.get(id)
    }

    /// `(name, createdTime)` for `id`, or the `"N/A"` sentinel for both when
    /// the drive is absent from the registry.
    pub fn resolve(&self, id: &str) -> (&str, &str) {
        match self.drives.get(id) {
            Some(info) => (&info.name, &info.created_time),
            None => (UNKNOWN_DRIVE_SENTINEL, UNKNOWN_DRIVE_SENTINEL),
        }
    }

    pub fn len(&self) -> usize {
        self.drives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }
}

/// Externally maintained set of suspended account identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuspendedAccounts {
    emails: HashSet<String>,
}

impl SuspendedAccounts {
    /// Build from a table with a `primaryEmail` column; other columns are
    /// ignored, as are empty cells.
    pub fn from_table(stage: &'static str, table: &Table) -> Result<Self> {
        table.require_columns(stage, &[PRIMARY_EMAIL_COLUMN])?;
        Ok((0..table.len())
            .filter_map(|i| table.value(i, PRIMARY_EMAIL_COLUMN))
            .map(str::to_string)
            .collect())
    }

    /// Exact membership; no case folding or trimming.
    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(email)
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

impl FromIterator<String> for SuspendedAccounts {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            emails: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a str> for SuspendedAccounts {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(str::to_string).collect()
    }
}

/// Headers a table renders with; used to check schema stability.
pub fn column_names(columns: &[Column]) -> Vec<&str> {
    columns.iter().map(|c| c.name.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsolidatorError;

    #[test]
    fn test_organizer_classification_is_case_insensitive() {
        let grant = GrantRecord::new("d1", "A", "t", "x@y.com", "Organizer", "user");
        assert!(grant.is_organizer());
        assert_eq!(grant.role, "Organizer");

        let writer = GrantRecord::new("d1", "A", "t", "x@y.com", "writer", "user");
        assert!(!writer.is_organizer());
    }

    #[test]
    fn test_registry_resolves_unknown_drive_to_sentinel() {
        let table = Table::from_strs(
            "drives",
            &["id", "name", "createdTime"],
            &[&["d1", "Finance", "2023-01-01T00:00:00Z"]],
        );
        let registry = DriveRegistry::from_table("flatten", &table).unwrap();

        assert_eq!(registry.resolve("d1"), ("Finance", "2023-01-01T00:00:00Z"));
        assert_eq!(registry.resolve("d9"), ("N/A", "N/A"));
    }

    #[test]
    fn test_registry_later_row_wins() {
        let table = Table::from_strs(
            "drives",
            &["id", "name", "createdTime"],
            &[&["d1", "Old", "t1"], &["d1", "New", "t2"]],
        );
        let registry = DriveRegistry::from_table("flatten", &table).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("d1"), ("New", "t2"));
    }

    #[test]
    fn test_suspended_accounts_requires_primary_email() {
        let table = Table::from_strs("suspended", &["email"], &[&["a@x.com"]]);
        let err = SuspendedAccounts::from_table("suspension", &table).unwrap_err();
        assert!(matches!(err, ConsolidatorError::MissingColumns { ref missing, .. } if missing == &vec!["primaryEmail".to_string()]));
    }

    #[test]
    fn test_suspended_accounts_skip_empty_cells() {
        let table = Table::from_strs(
            "suspended",
            &["primaryEmail", "suspended"],
            &[&["a@x.com", "true"], &["", "true"]],
        );
        let accounts = SuspendedAccounts::from_table("suspension", &table).unwrap();
        assert_eq!(accounts.len(), 1);
        assert!(accounts.contains("a@x.com"));
        assert!(!accounts.contains(""));
    }

    #[test]
    fn test_grant_table_keeps_input_layout_and_extras() {
        let table = Table::from_strs(
            "grants",
            &["role", "note", "id", "name", "createdTime", "emailAddress", "type"],
            &[&["writer", "keep me", "d1", "A", "t", "a@x.com", "user"]],
        );
        let grants = GrantTable::from_table("dedup", &table).unwrap();
        assert_eq!(grants.extra_columns, vec!["note".to_string()]);
        assert_eq!(grants.records[0].role, "writer");

        let out = grants.to_table("grants");
        assert_eq!(
            column_names(out.columns()),
            vec!["role", "note", "id", "name", "createdTime", "emailAddress", "type"]
        );
        assert_eq!(out.value(0, "note"), Some("keep me"));
        assert_eq!(out.value(0, "role"), Some("writer"));
    }

    #[test]
    fn test_new_grant_table_uses_contract_order() {
        let grants = GrantTable::new(vec![GrantRecord::new("d1", "A", "t", "a@x.com", "reader", "user")]);
        let out = grants.to_table("grants");
        assert_eq!(
            column_names(out.columns()),
            vec!["id", "name", "createdTime", "emailAddress", "role", "type"]
        );
        assert_eq!(out.value(0, "type"), Some("user"));
    }

    #[test]
    fn test_grant_table_with_repeated_column_is_rejected() {
        let table = Table::from_strs(
            "grants",
            &["id", "name", "createdTime", "emailAddress", "role", "type", "id"],
            &[&["d1", "A", "t", "a@x.com", "organizer", "user", "d1"]],
        );
        let err = GrantTable::from_table("dedup", &table).unwrap_err();
        assert!(matches!(err, ConsolidatorError::DuplicateColumn { ref column, .. } if column == "id"));
    }
}
