use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::constants::{
    permission_column, EMAIL_ADDRESS_COLUMN, FLATTEN_STAGE, ID_COLUMN, ROLE_COLUMN, TYPE_COLUMN,
};
use crate::error::Result;
use crate::table::{Row, Table};
use crate::types::{DriveRegistry, GrantRecord, GrantTable};

/// Read access to one wide permission record by column name.
pub trait FieldLookup {
    /// Whether the record has the column at all, regardless of its value.
    fn contains_field(&self, key: &str) -> bool;

    /// The column's value, `None` when absent or null.
    fn field(&self, key: &str) -> Option<&str>;
}

impl FieldLookup for HashMap<String, String> {
    fn contains_field(&self, key: &str) -> bool {
        self.contains_key(key)
    }

    fn field(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

/// A row of a wide [`Table`] viewed through its header.
pub struct WideRow<'a> {
    index: &'a HashMap<&'a str, usize>,
    row: &'a Row,
}

impl FieldLookup for WideRow<'_> {
    fn contains_field(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    fn field(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .and_then(|&i| self.row.get(i))
            .and_then(|cell| cell.as_deref())
    }
}

/// Counters collected while flattening a wide table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlattenReport {
    pub records_scanned: usize,
    pub grants_emitted: usize,
    pub empty_slots_skipped: usize,
    pub unknown_drives: usize,
}

/// Turns wide `permissions.{i}.*` records into one [`GrantRecord`] per slot.
pub struct GrantFlattener<'r> {
    registry: &'r DriveRegistry,
}

impl<'r> GrantFlattener<'r> {
    pub fn new(registry: &'r DriveRegistry) -> Self {
        Self { registry }
    }

    /// Flatten one wide record.
    ///
    /// Slots are probed from index 0 by the presence of
    /// `permissions.{i}.emailAddress`; the scan stops at the first absent
    /// index. Slots whose email is empty emit nothing but do not end the scan.
    pub fn flatten_record<R: FieldLookup + ?Sized>(&self, record: &R) -> Vec<GrantRecord> {
        self.scan(record).0
    }

    fn scan<R: FieldLookup + ?Sized>(&self, record: &R) -> (Vec<GrantRecord>, usize) {
        let drive_id = record.field(ID_COLUMN).unwrap_or_default();
        let (name, created_time) = self.registry.resolve(drive_id);

        let mut grants = Vec::new();
        let mut skipped = 0;
        let mut i = 0;
        loop {
            let email_key = permission_column(i, EMAIL_ADDRESS_COLUMN);
            if !record.contains_field(&email_key) {
                break;
            }

            match record.field(&email_key) {
                Some(email) if !email.is_empty() => {
                    let role = record.field(&permission_column(i, ROLE_COLUMN)).unwrap_or_default();
                    let grant_type = record.field(&permission_column(i, TYPE_COLUMN)).unwrap_or_default();
                    grants.push(GrantRecord::new(
                        drive_id,
                        name,
                        created_time,
                        email,
                        role,
                        grant_type,
                    ));
                }
                _ => skipped += 1,
            }
            i += 1;
        }

        (grants, skipped)
    }

    /// Flatten every row of the wide export, keeping row order and then slot order.
    #[instrument(skip_all, fields(table = %wide.label(), rows = wide.len()))]
    pub fn flatten_table(&self, wide: &Table) -> Result<(GrantTable, FlattenReport)> {
        wide.require_columns(FLATTEN_STAGE, &[ID_COLUMN])?;

        let index: HashMap<&str, usize> = wide
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), i))
            .collect();

        let mut report = FlattenReport::default();
        let mut records = Vec::new();
        for row in wide.rows() {
            let view = WideRow { index: &index, row };
            let drive_id = view.field(ID_COLUMN).unwrap_or_default();
            if self.registry.get(drive_id).is_none() {
                debug!("Drive '{}' not in registry; using N/A for name and createdTime", drive_id);
                report.unknown_drives += 1;
            }

            let (grants, skipped) = self.scan(&view);
            report.records_scanned += 1;
            report.empty_slots_skipped += skipped;
            records.extend(grants);
        }
        report.grants_emitted = records.len();

        metrics::counter!("acl_permission_records_scanned_total").increment(report.records_scanned as u64);
        metrics::counter!("acl_grants_emitted_total").increment(report.grants_emitted as u64);
        metrics::counter!("acl_empty_permission_slots_total").increment(report.empty_slots_skipped as u64);

        info!(
            "Flattened {} permission records into {} grants ({} empty slots skipped, {} unknown drives)",
            report.records_scanned, report.grants_emitted, report.empty_slots_skipped, report.unknown_drives
        );

        Ok((GrantTable::new(records), report))
    }
}
