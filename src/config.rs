//! Service configuration.
//!
//! Loaded once at startup from a JSON file and shared by `Arc`. Invalid
//! values abort startup with a [`ConfigError`] naming the offending key.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::UuidVersion;
use crate::registry::{FieldRegistry, RecordSchema};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Log verbosity for the `registrar` target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// What a create does when it carries a value that already exists but has no
/// record identity to compare against the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnidentifiedDuplicates {
    /// Assume a re-insertion of the same record and keep the value.
    #[default]
    Keep,

    /// Treat as a duplicate and assign a fresh value.
    Regenerate,
}

/// Configuration for the registrar service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Config {
    /// Layout generated when a field has no version override.
    pub default_version: UuidVersion,

    /// Fill missing or malformed values on create.
    pub auto_generate: bool,

    /// Consult the store for collisions.
    pub validate_uniqueness: bool,

    /// Allow updates to change an assigned value.
    pub allow_manual_edit: bool,

    /// Generate-and-check attempts before giving up.
    pub max_retry_attempts: u32,

    /// Run a live reconciliation once at startup.
    pub auto_migrate: bool,

    pub log_level: LogLevel,

    pub unidentified_duplicates: UnidentifiedDuplicates,

    /// Record-type schemas scanned for monitored fields.
    pub content_types: Vec<RecordSchema>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_version: UuidVersion::V4,
            auto_generate: true,
            validate_uniqueness: true,
            allow_manual_edit: true,
            max_retry_attempts: 10,
            auto_migrate: false,
            log_level: LogLevel::Info,
            unidentified_duplicates: UnidentifiedDuplicates::Keep,
            content_types: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&text, path)
    }

    /// Parse and validate JSON text. `origin` is only used in errors.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "maxRetryAttempts",
                reason: "must be a positive integer".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for schema in &self.content_types {
            if schema.uid.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "contentTypes",
                    reason: "record type uid must not be empty".to_string(),
                });
            }
            if !seen.insert(schema.uid.as_str()) {
                return Err(ConfigError::Invalid {
                    key: "contentTypes",
                    reason: format!("record type {} declared twice", schema.uid),
                });
            }
            for (name, attr) in &schema.attributes {
                if attr.is_monitored() && attr.options.prefix.as_deref().is_some_and(|p| p.trim().is_empty()) {
                    return Err(ConfigError::Invalid {
                        key: "contentTypes",
                        reason: format!("{}.{} has a blank prefix", schema.uid, name),
                    });
                }
            }
        }

        Ok(())
    }

    /// Monitored fields declared by the configured schemas.
    pub fn registry(&self) -> FieldRegistry {
        FieldRegistry::from_schemas(&self.content_types)
    }
}

/// Default data directory.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "registrar", "registrar")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".registrar"))
}

/// Config file inside a data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("registrar.json")
}

/// Record store file inside a data directory.
pub fn records_path(data_dir: &Path) -> PathBuf {
    data_dir.join("records.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(text: &str) -> Result<Config, ConfigError> {
        Config::parse(text, Path::new("test.json"))
    }

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.auto_generate);
        assert_eq!(config.max_retry_attempts, 10);
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"{
                "defaultVersion": "v7",
                "autoGenerate": false,
                "validateUniqueness": false,
                "allowManualEdit": false,
                "maxRetryAttempts": 3,
                "autoMigrate": true,
                "logLevel": "debug",
                "unidentifiedDuplicates": "regenerate",
                "contentTypes": [
                    {
                        "uid": "api::article.article",
                        "attributes": {
                            "uuid": { "type": "string", "customField": "registrar.uuid" }
                        }
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_version, UuidVersion::V7);
        assert!(!config.auto_generate);
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.unidentified_duplicates, UnidentifiedDuplicates::Regenerate);
        assert_eq!(config.registry().len(), 1);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(parse(r#"{ "defaultVersion": "v5" }"#), Err(ConfigError::Parse { .. })));
        assert!(matches!(parse(r#"{ "logLevel": "trace" }"#), Err(ConfigError::Parse { .. })));
        assert!(matches!(parse(r#"{ "maxRetryAttempts": -1 }"#), Err(ConfigError::Parse { .. })));
        assert!(matches!(parse(r#"{ "autoGenerate": "yes" }"#), Err(ConfigError::Parse { .. })));
        assert!(matches!(parse(r#"{ "unknownKey": 1 }"#), Err(ConfigError::Parse { .. })));

        let err = parse(r#"{ "maxRetryAttempts": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "maxRetryAttempts", .. }));
        assert!(err.to_string().contains("maxRetryAttempts"));
    }

    #[test]
    fn test_rejects_duplicate_record_types() {
        let err = parse(
            r#"{ "contentTypes": [ { "uid": "api::a.a" }, { "uid": "api::a.a" } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "contentTypes", .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = config_path(dir.path());
        std::fs::write(&path, r#"{ "autoMigrate": true }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.auto_migrate);
        assert_eq!(records_path(dir.path()), dir.path().join("records.json"));
    }
}
