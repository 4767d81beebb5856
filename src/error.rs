use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsolidatorError {
    #[error("Input file not found: {path}")]
    MissingInputFile { path: String },

    #[error("[{stage}] table '{table}' is missing required columns: {}", .missing.join(", "))]
    MissingColumns {
        stage: &'static str,
        table: String,
        missing: Vec<String>,
    },

    #[error("table '{table}' has more than one column named '{column}'")]
    DuplicateColumn { table: String, column: String },

    #[error("[join] secondary table '{table}' has more than one row for id '{key}'")]
    DuplicateKey { table: String, key: String },

    #[error("[join] column '{column}' from table '{table}' collides with an existing column")]
    ColumnCollision { table: String, column: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ConsolidatorError>;
