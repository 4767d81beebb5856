pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod table;
pub mod types;

pub use config::Config;
pub use error::{ConsolidatorError, Result};
pub use pipeline::{Pipeline, RunSummary, StageReport, StageStatus};
pub use table::Table;
pub use types::{DriveRegistry, GrantRecord, GrantTable, SuspendedAccounts};
