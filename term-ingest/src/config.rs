//! Extraction configuration.
//!
//! Each option affects only its own concern: `source_volume_path` is where
//! discovery looks, `archive_volume_path` where processed files go,
//! `warehouse_path` where raw tables live and `log_table_path` where run-log
//! entries are appended.

use crate::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_bronze_schema() -> String {
    "bronze".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_domain() -> String {
    "volume_extraction".to_string()
}

fn default_process() -> String {
    "extract".to_string()
}

fn default_max_concurrent_tables() -> usize {
    1
}

/// Configuration for a volume extraction run.
///
/// # Examples
///
/// ```rust
/// use term_ingest::config::ExtractionConfig;
///
/// let config = ExtractionConfig::new(
///     "dev",
///     "/data/dev/staging",
///     "/data/dev/archive",
///     "/data/dev/logs/extraction.jsonl",
/// )
/// .with_warehouse_path("/data/dev/warehouse");
///
/// config.validate().unwrap();
/// assert_eq!(config.get_table_path("customers"), "dev.bronze.customers");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Catalog name (e.g. `dev`, `sit`, `prod`)
    pub catalog: String,
    /// Staging directory holding chunk and `.meta` files
    pub source_volume_path: PathBuf,
    /// Directory processed files are moved into
    pub archive_volume_path: PathBuf,
    /// JSON-lines file receiving run-log entries
    pub log_table_path: PathBuf,
    /// Root directory of raw tables; see [`warehouse_root`](Self::warehouse_root)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse_path: Option<PathBuf>,
    /// Schema name raw tables are written under
    #[serde(default = "default_bronze_schema")]
    pub bronze_schema: String,
    /// Identifier column used when a `.meta` file does not name one
    #[serde(default = "default_id_column")]
    pub default_id_column: String,
    /// Run-log domain
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Run-log process
    #[serde(default = "default_process")]
    pub process: String,
    /// Upper bound on tables processed at the same time
    #[serde(default = "default_max_concurrent_tables")]
    pub max_concurrent_tables: usize,
}

impl ExtractionConfig {
    /// Creates a configuration with defaults for every optional field.
    pub fn new(
        catalog: impl Into<String>,
        source_volume_path: impl Into<PathBuf>,
        archive_volume_path: impl Into<PathBuf>,
        log_table_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            source_volume_path: source_volume_path.into(),
            archive_volume_path: archive_volume_path.into(),
            log_table_path: log_table_path.into(),
            warehouse_path: None,
            bronze_schema: default_bronze_schema(),
            default_id_column: default_id_column(),
            domain: default_domain(),
            process: default_process(),
            max_concurrent_tables: default_max_concurrent_tables(),
        }
    }

    /// Loads and validates a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Configuration(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            IngestError::Configuration(format!("Invalid config file {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the raw table root directory.
    pub fn with_warehouse_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.warehouse_path = Some(path.into());
        self
    }

    /// The raw table root: `warehouse_path` when set, otherwise a
    /// `warehouse` directory next to the staging area.
    pub fn warehouse_root(&self) -> PathBuf {
        match &self.warehouse_path {
            Some(path) => path.clone(),
            None => self
                .source_volume_path
                .parent()
                .map(|p| p.join("warehouse"))
                .unwrap_or_else(|| PathBuf::from("warehouse")),
        }
    }

    /// Sets the schema raw tables are written under.
    pub fn with_bronze_schema(mut self, schema: impl Into<String>) -> Self {
        self.bronze_schema = schema.into();
        self
    }

    /// Sets the fallback identifier column.
    pub fn with_default_id_column(mut self, column: impl Into<String>) -> Self {
        self.default_id_column = column.into();
        self
    }

    /// Sets the run-log domain and process.
    pub fn with_log_scope(mut self, domain: impl Into<String>, process: impl Into<String>) -> Self {
        self.domain = domain.into();
        self.process = process.into();
        self
    }

    /// Sets how many tables may be processed at once.
    pub fn with_max_concurrent_tables(mut self, n: usize) -> Self {
        self.max_concurrent_tables = n;
        self
    }

    /// Checks the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.catalog.trim().is_empty() {
            return Err(IngestError::Configuration(
                "catalog must be a non-empty string".to_string(),
            ));
        }
        if self.bronze_schema.trim().is_empty() {
            return Err(IngestError::Configuration(
                "bronze_schema must be a non-empty string".to_string(),
            ));
        }
        for (name, path) in [
            ("source_volume_path", &self.source_volume_path),
            ("archive_volume_path", &self.archive_volume_path),
            ("log_table_path", &self.log_table_path),
            ("warehouse_path", &self.warehouse_root()),
        ] {
            if path.as_os_str().is_empty() {
                return Err(IngestError::Configuration(format!(
                    "{name} must not be empty"
                )));
            }
        }
        if self.source_volume_path == self.archive_volume_path {
            return Err(IngestError::Configuration(
                "archive_volume_path must differ from source_volume_path".to_string(),
            ));
        }
        if self.default_id_column.trim().is_empty() {
            return Err(IngestError::Configuration(
                "default_id_column must be a non-empty string".to_string(),
            ));
        }
        if self.max_concurrent_tables == 0 {
            return Err(IngestError::Configuration(
                "max_concurrent_tables must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Fully qualified raw table name: `{catalog}.{bronze_schema}.{table}`.
    pub fn get_table_path(&self, table_name: &str) -> String {
        format!("{}.{}.{}", self.catalog, self.bronze_schema, table_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ExtractionConfig {
        ExtractionConfig::new(
            "dev",
            "/volumes/dev/mft",
            "/volumes/dev/archive",
            "/volumes/dev/logs/extraction.jsonl",
        )
    }

    #[test]
    fn test_defaults_and_table_path() {
        let config = base();
        assert_eq!(config.bronze_schema, "bronze");
        assert_eq!(config.default_id_column, "id");
        assert_eq!(config.max_concurrent_tables, 1);
        assert_eq!(config.warehouse_path, None);
        assert_eq!(config.warehouse_root(), PathBuf::from("/volumes/dev/warehouse"));
        assert_eq!(config.get_table_path("customers"), "dev.bronze.customers");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_inputs() {
        let cases = [
            ("empty catalog", ExtractionConfig { catalog: "  ".to_string(), ..base() }),
            (
                "same source and archive",
                ExtractionConfig {
                    archive_volume_path: PathBuf::from("/volumes/dev/mft"),
                    ..base()
                },
            ),
            ("zero concurrency", base().with_max_concurrent_tables(0)),
            ("empty id column", base().with_default_id_column("")),
        ];
        for (label, config) in cases {
            assert!(
                matches!(config.validate(), Err(IngestError::Configuration(_))),
                "{label} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_json_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "catalog": "prod",
                "source_volume_path": "/v/prod/mft",
                "archive_volume_path": "/v/prod/archive",
                "log_table_path": "/v/prod/logs.jsonl",
                "warehouse_path": "/v/prod/warehouse",
                "max_concurrent_tables": 4
            }"#,
        )
        .unwrap();

        let config = ExtractionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.catalog, "prod");
        assert_eq!(config.bronze_schema, "bronze");
        assert_eq!(config.domain, "volume_extraction");
        assert_eq!(config.max_concurrent_tables, 4);
        assert_eq!(config.warehouse_root(), PathBuf::from("/v/prod/warehouse"));
    }

    #[test]
    fn test_json_without_warehouse_matches_new() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "catalog": "dev",
                "source_volume_path": "/volumes/dev/mft",
                "archive_volume_path": "/volumes/dev/archive",
                "log_table_path": "/volumes/dev/logs/extraction.jsonl"
            }"#,
        )
        .unwrap();

        let config = ExtractionConfig::from_json_file(&path).unwrap();
        assert_eq!(config, base());
        assert_eq!(config.warehouse_root(), base().warehouse_root());
    }

    #[test]
    fn test_from_json_file_rejects_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"catalog": "prod"}"#).unwrap();

        let err = ExtractionConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, IngestError::Configuration(_)));
    }
}
