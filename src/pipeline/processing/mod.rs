// Pipeline processing: the four table transformations, each pure over in-memory tables

pub mod dedup;
pub mod flatten;
pub mod join;
pub mod suspension;

pub use dedup::{dedup_organizer_table, dedup_organizers, DedupReport};
pub use flatten::{FieldLookup, FlattenReport, GrantFlattener};
pub use join::{DuplicateKeyPolicy, EntityJoiner, JoinReport, JoinSourceReport};
pub use suspension::{filter_suspended, filter_suspended_tables, FilterReport};
