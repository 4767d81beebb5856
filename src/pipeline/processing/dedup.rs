use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

use crate::constants::DEDUP_STAGE;
use crate::error::Result;
use crate::table::Table;
use crate::types::{GrantRecord, GrantTable};

/// Diagnostics for operators auditing organizer integrity. Not part of the
/// data output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub organizers_seen: usize,
    pub duplicates_removed: usize,
}

/// Validate the grant schema of `table`, then deduplicate organizer grants.
pub fn dedup_organizer_table(table: &Table) -> Result<(GrantTable, DedupReport)> {
    let grants = GrantTable::from_table(DEDUP_STAGE, table)?;
    Ok(dedup_organizers(grants))
}

/// Keep the first organizer grant per `(id, name, emailAddress)` in input
/// order and pass every non-organizer grant through untouched.
///
/// The result is non-organizers followed by surviving organizers, stably
/// sorted by `(id, name, emailAddress)`. Rows with equal sort keys keep no
/// meaningful relative order beyond that.
pub fn dedup_organizers(grants: GrantTable) -> (GrantTable, DedupReport) {
    let rows_in = grants.len();
    let GrantTable {
        extra_columns,
        layout,
        records,
    } = grants;
    let (organizers, mut kept): (Vec<GrantRecord>, Vec<GrantRecord>) =
        records.into_iter().partition(GrantRecord::is_organizer);
    let organizers_seen = organizers.len();

    let mut seen = HashSet::with_capacity(organizers_seen);
    for grant in organizers {
        let key = (
            grant.id.clone(),
            grant.name.clone(),
            grant.email_address.clone(),
        );
        if seen.insert(key) {
            kept.push(grant);
        }
    }
    let duplicates_removed = organizers_seen - seen.len();

    kept.sort_by(|a, b| a.dedup_key().cmp(&b.dedup_key()));

    let report = DedupReport {
        rows_in,
        rows_out: kept.len(),
        organizers_seen,
        duplicates_removed,
    };

    info!("Found {} organizer entries", report.organizers_seen);
    info!("Removed {} duplicate organizer entries", report.duplicates_removed);
    metrics::counter!("acl_organizer_rows_seen_total").increment(organizers_seen as u64);
    metrics::counter!("acl_organizer_duplicates_removed_total").increment(duplicates_removed as u64);

    let deduped = GrantTable {
        extra_columns,
        layout,
        records: kept,
    };
    (deduped, report)
}
