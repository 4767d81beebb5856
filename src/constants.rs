/// Column and file name constants shared across the pipeline stages.
/// Exact column names are part of the interchange contract with downstream
/// reporting tools and must not be altered.

// Shared join key
pub const ID_COLUMN: &str = "id";

// Drive registry / normalized grant columns
pub const NAME_COLUMN: &str = "name";
pub const CREATED_TIME_COLUMN: &str = "createdTime";
pub const EMAIL_ADDRESS_COLUMN: &str = "emailAddress";
pub const ROLE_COLUMN: &str = "role";
pub const TYPE_COLUMN: &str = "type";

// Suspended account export
pub const PRIMARY_EMAIL_COLUMN: &str = "primaryEmail";

/// Normalized grant table header, in interchange order.
pub const GRANT_COLUMNS: [&str; 6] = [
    ID_COLUMN,
    NAME_COLUMN,
    CREATED_TIME_COLUMN,
    EMAIL_ADDRESS_COLUMN,
    ROLE_COLUMN,
    TYPE_COLUMN,
];

/// Columns the drive registry must provide.
pub const REGISTRY_COLUMNS: [&str; 3] = [ID_COLUMN, NAME_COLUMN, CREATED_TIME_COLUMN];

/// Resolved name/createdTime for drives absent from the registry snapshot.
pub const UNKNOWN_DRIVE_SENTINEL: &str = "N/A";

pub const ORGANIZER_ROLE: &str = "organizer";

// Stage names used in diagnostics and run summaries
pub const FLATTEN_STAGE: &str = "flatten";
pub const JOIN_STAGE: &str = "join";
pub const DEDUP_STAGE: &str = "dedup";
pub const SUSPENSION_STAGE: &str = "suspension";

/// Wide permission export column for slot `index` and `field`,
/// e.g. `permissions.0.emailAddress`.
pub fn permission_column(index: usize, field: &str) -> String {
    format!("permissions.{index}.{field}")
}
