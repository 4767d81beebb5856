use serde::Serialize;
use tracing::info;

use crate::constants::SUSPENSION_STAGE;
use crate::error::Result;
use crate::table::Table;
use crate::types::{GrantTable, SuspendedAccounts};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterReport {
    pub grants_in: usize,
    pub suspended_accounts: usize,
    pub matched: usize,
}

/// Schema-checked entry point: `grants` must carry the grant contract
/// columns and `suspended` a `primaryEmail` column.
pub fn filter_suspended_tables(grants: &Table, suspended: &Table) -> Result<(GrantTable, FilterReport)> {
    let grants = GrantTable::from_table(SUSPENSION_STAGE, grants)?;
    let accounts = SuspendedAccounts::from_table(SUSPENSION_STAGE, suspended)?;
    Ok(filter_suspended(&grants, &accounts))
}

/// Grants whose `emailAddress` is exactly a suspended account, in input order.
pub fn filter_suspended(grants: &GrantTable, accounts: &SuspendedAccounts) -> (GrantTable, FilterReport) {
    let matched: Vec<_> = grants
        .records
        .iter()
        .filter(|g| accounts.contains(&g.email_address))
        .cloned()
        .collect();

    let report = FilterReport {
        grants_in: grants.len(),
        suspended_accounts: accounts.len(),
        matched: matched.len(),
    };
    info!(
        "{} of {} grants belong to {} suspended accounts",
        report.matched, report.grants_in, report.suspended_accounts
    );
    metrics::counter!("acl_suspended_grants_total").increment(report.matched as u64);

    (grants.with_records(matched), report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsolidatorError;
    use crate::types::GrantRecord;

    fn grants(emails: &[&str]) -> GrantTable {
        GrantTable::new(
            emails
                .iter()
                .map(|e| GrantRecord::new("d1", "Drive A", "t", *e, "writer", "user"))
                .collect(),
        )
    }

    #[test]
    fn test_only_suspended_emails_are_kept() {
        let accounts: SuspendedAccounts = ["b@x.com"].into_iter().collect();
        let (out, report) = filter_suspended(&grants(&["a@x.com", "b@x.com"]), &accounts);

        assert_eq!(out.len(), 1);
        assert_eq!(out.records[0].email_address, "b@x.com");
        assert_eq!(report.matched, 1);
        assert_eq!(report.grants_in, 2);
    }

    #[test]
    fn test_matching_is_exact() {
        let accounts: SuspendedAccounts = ["a@x.com", "c@x.com"].into_iter().collect();
        let (out, _) = filter_suspended(&grants(&["A@x.com", " c@x.com"]), &accounts);
        assert!(out.is_empty());
    }

    #[test]
    fn test_input_order_is_preserved() {
        let accounts: SuspendedAccounts = ["a@x.com", "c@x.com"].into_iter().collect();
        let (out, _) = filter_suspended(&grants(&["c@x.com", "b@x.com", "a@x.com", "c@x.com"]), &accounts);
        let emails: Vec<_> = out.records.iter().map(|g| g.email_address.as_str()).collect();
        assert_eq!(emails, vec!["c@x.com", "a@x.com", "c@x.com"]);
    }

    #[test]
    fn test_extra_columns_survive_filtering() {
        let grants = Table::from_strs(
            "grants",
            &["id", "name", "createdTime", "emailAddress", "role", "type", "domain"],
            &[
                &["d1", "A", "t", "a@x.com", "reader", "user", "x.com"],
                &["d1", "A", "t", "b@x.com", "reader", "user", "x.com"],
            ],
        );
        let suspended = Table::from_strs("suspended", &["primaryEmail", "suspended"], &[&["a@x.com", "True"]]);

        let (out, _) = filter_suspended_tables(&grants, &suspended).unwrap();
        let table = out.to_table("suspended_grants");
        assert_eq!(table.len(), 1);
        assert_eq!(table.value(0, "domain"), Some("x.com"));
    }

    #[test]
    fn test_grants_missing_email_column_fail() {
        let grants = Table::from_strs("grants", &["id", "name", "createdTime", "role", "type"], &[]);
        let suspended = Table::from_strs("suspended", &["primaryEmail"], &[]);

        let err = filter_suspended_tables(&grants, &suspended).unwrap_err();
        assert!(matches!(
            err,
            ConsolidatorError::MissingColumns { stage: "suspension", ref missing, .. } if missing == &vec!["emailAddress".to_string()]
        ));
    }
}
