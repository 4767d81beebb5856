use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::ID_COLUMN;
use crate::error::{ConsolidatorError, Result};
use crate::pipeline::processing::DuplicateKeyPolicy;
use crate::pipeline::PRIMARY_LABEL;

/// Environment variable naming the config file when `--config` is not given.
pub const CONFIG_ENV_VAR: &str = "ACL_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "acl.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inputs: InputConfig,
    pub join: JoinConfig,
    pub outputs: OutputConfig,
}

/// Exported flat files. Relative paths resolve against `dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub dir: PathBuf,
    /// Drive registry: `id`, `name`, `createdTime`
    pub drives: PathBuf,
    /// Wide `permissions.{i}.*` export
    pub permissions: PathBuf,
    /// Suspended accounts with a `primaryEmail` column; the suspension stage
    /// is skipped when unset.
    pub suspended: Option<PathBuf>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            drives: PathBuf::from("TeamDrives.csv"),
            permissions: PathBuf::from("TeamDriveACLs.csv"),
            suspended: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Primary table; every row survives the join exactly once
    pub primary: PathBuf,
    /// Secondary tables, joined in this order
    pub sources: Vec<JoinSource>,
    pub duplicate_keys: DuplicateKeyPolicy,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            primary: PathBuf::from("TeamDrives.csv"),
            sources: vec![
                JoinSource::new("storage", "TeamDriveStorageInfo.csv"),
                JoinSource::new("last_modified", "TeamDriveLastModified.csv"),
                JoinSource::new("organizers", "TeamDriveOrganizers.csv"),
            ],
            duplicate_keys: DuplicateKeyPolicy::default(),
        }
    }
}

/// A secondary table and the label used to disambiguate its colliding columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSource {
    pub label: String,
    pub path: PathBuf,
}

impl JoinSource {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

/// Output file names. Relative paths resolve against `dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub normalized: PathBuf,
    pub consolidated: PathBuf,
    pub deduplicated: PathBuf,
    pub suspended: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            normalized: PathBuf::from("NormalizedTeamDriveACLs.csv"),
            consolidated: PathBuf::from("ConsolidatedSharedDrives.csv"),
            deduplicated: PathBuf::from("DeduplicatedTeamDriveACLs.csv"),
            suspended: PathBuf::from("SuspendedUserSharedDriveACLs.csv"),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Otherwise `ACL_CONFIG` is consulted,
    /// then `acl.toml` in the working directory; with neither present the
    /// built-in defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let config_path = match explicit {
            Some(p) => p,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path).map_err(|e| {
            ConsolidatorError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_join_sources(&self.join.sources)
    }

    pub fn input_path(&self, path: &Path) -> PathBuf {
        self.inputs.dir.join(path)
    }

    pub fn output_path(&self, path: &Path) -> PathBuf {
        self.outputs.dir.join(path)
    }
}

/// Join source labels become column suffixes, so they must be non-empty,
/// unique, and distinct from the primary table's label.
pub fn validate_join_sources(sources: &[JoinSource]) -> Result<()> {
    let mut labels = HashSet::new();
    for source in sources {
        let label = source.label.trim();
        if label.is_empty() {
            return Err(ConsolidatorError::Config(format!(
                "join source '{}' has an empty label",
                source.path.display()
            )));
        }
        if label == ID_COLUMN {
            return Err(ConsolidatorError::Config(
                "join source label 'id' is reserved for the join key".to_string(),
            ));
        }
        if label == PRIMARY_LABEL {
            return Err(ConsolidatorError::Config(format!(
                "join source label '{}' is reserved for the primary table",
                PRIMARY_LABEL
            )));
        }
        if !labels.insert(label) {
            return Err(ConsolidatorError::Config(format!(
                "duplicate join source label '{}'",
                label
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_use_export_file_names() {
        let config = Config::default();
        assert_eq!(config.inputs.drives, PathBuf::from("TeamDrives.csv"));
        assert_eq!(config.join.sources.len(), 3);
        assert_eq!(config.join.duplicate_keys, DuplicateKeyPolicy::Reject);
        assert!(config.inputs.suspended.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [inputs]
            dir = "exports"
            suspended = "SuspendedUsers.csv"

            [join]
            duplicate_keys = "first_match"
            "#,
        )
        .unwrap();

        assert_eq!(config.inputs.dir, PathBuf::from("exports"));
        assert_eq!(config.inputs.permissions, PathBuf::from("TeamDriveACLs.csv"));
        assert_eq!(config.inputs.suspended, Some(PathBuf::from("SuspendedUsers.csv")));
        assert_eq!(config.join.duplicate_keys, DuplicateKeyPolicy::FirstMatch);
        assert_eq!(config.join.sources.len(), 3);
        assert_eq!(
            config.input_path(&config.inputs.drives),
            PathBuf::from("exports").join("TeamDrives.csv")
        );
    }

    #[test]
    fn test_explicit_join_sources_replace_defaults() {
        let config = Config::from_toml_str(
            r#"
            [[join.sources]]
            label = "storage"
            path = "storage.csv"
            "#,
        )
        .unwrap();
        assert_eq!(config.join.sources, vec![JoinSource::new("storage", "storage.csv")]);
    }

    #[test]
    fn test_duplicate_labels_are_rejected() {
        let err = Config::from_toml_str(
            r#"
            [[join.sources]]
            label = "storage"
            path = "a.csv"

            [[join.sources]]
            label = "storage"
            path = "b.csv"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConsolidatorError::Config(_)));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let err = Config::from_toml_str("[inputs\n").unwrap_err();
        assert!(matches!(err, ConsolidatorError::Toml(_)));
    }

    #[test]
    fn test_primary_label_is_reserved() {
        let err = validate_join_sources(&[JoinSource::new("drives", "x.csv")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: join source label 'drives' is reserved for the primary table"
        );
        assert!(validate_join_sources(&[JoinSource::new("storage", "x.csv")]).is_ok());
    }
}
