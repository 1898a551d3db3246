//! Error types for the ingestion pipeline.
//!
//! All errors are represented by [`IngestError`]. Most variants are scoped to a
//! single table: they stop that table's pipeline and end up in the run report,
//! while the rest of the run continues. Only [`IngestError::StagingUnavailable`]
//! and [`IngestError::Configuration`] abort a whole run.

use crate::core::ValidationAggregate;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for term-ingest.
#[derive(Error, Debug)]
pub enum IngestError {
    /// A table has chunk files in staging but no `<table>.meta` companion.
    #[error("Expectation file not found for table '{table}': {}", path.display())]
    MissingExpectationFile {
        /// Logical table name
        table: String,
        /// Where the expectation file was looked for
        path: PathBuf,
    },

    /// The expectation file exists but does not declare usable counts.
    #[error("Malformed expectation file for table '{table}' ({}): {message}", path.display())]
    MalformedExpectationFile {
        table: String,
        path: PathBuf,
        message: String,
    },

    /// A chunk's columns differ from the first chunk of the same table.
    #[error(
        "Schema mismatch for table '{table}' in {}: expected columns [{}], found [{}]",
        file.display(),
        expected.join(", "),
        found.join(", ")
    )]
    SchemaMismatch {
        table: String,
        /// The divergent chunk file
        file: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// A chunk file could not be read as Parquet.
    #[error("Failed to read chunk {} for table '{table}': {message}", file.display())]
    ChunkRead {
        table: String,
        file: PathBuf,
        message: String,
    },

    /// One or more expectation checks failed. Carries every result, passed and failed.
    #[error("Validation failed for table '{table}': {aggregate}")]
    ValidationFailure {
        table: String,
        aggregate: ValidationAggregate,
    },

    /// The raw table append did not complete.
    #[error("Failed to write table '{table}': {message}")]
    WriteFailure { table: String, message: String },

    /// Archiving stopped part way. Files in `moved` are already in the archive.
    #[error(
        "Failed to archive files for table '{table}': {message} (moved {}, not moved {})",
        moved.len(),
        pending.len()
    )]
    ArchiveFailure {
        table: String,
        message: String,
        moved: Vec<PathBuf>,
        pending: Vec<PathBuf>,
    },

    /// The staging location itself could not be listed.
    #[error("Staging location {} is unavailable: {source}", path.display())]
    StagingUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from the Parquet writer or reader.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, IngestError>`.
pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Creates a write failure for a table.
    pub fn write_failure(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteFailure {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates a malformed expectation file error.
    pub fn malformed_expectation(
        table: impl Into<String>,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::MalformedExpectationFile {
            table: table.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    /// Stable name of the error kind, used as the prefix of failure outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingExpectationFile { .. } => "MissingExpectationFile",
            Self::MalformedExpectationFile { .. } => "MalformedExpectationFile",
            Self::SchemaMismatch { .. } => "SchemaMismatch",
            Self::ChunkRead { .. } => "ChunkRead",
            Self::ValidationFailure { .. } => "ValidationFailure",
            Self::WriteFailure { .. } => "WriteFailure",
            Self::ArchiveFailure { .. } => "ArchiveFailure",
            Self::StagingUnavailable { .. } => "StagingUnavailable",
            Self::Configuration(_) => "Configuration",
            Self::DataFusion(_) => "DataFusion",
            Self::Arrow(_) => "Arrow",
            Self::Parquet(_) => "Parquet",
            Self::Io(_) => "Io",
            Self::Serialization(_) => "Serialization",
            Self::Internal(_) => "Internal",
        }
    }

    /// Returns false for errors that invalidate the whole run rather than one table.
    pub fn is_table_scoped(&self) -> bool {
        !matches!(
            self,
            Self::StagingUnavailable { .. } | Self::Configuration(_)
        )
    }

    /// The validation aggregate, when this is a validation failure.
    pub fn validation(&self) -> Option<&ValidationAggregate> {
        match self {
            Self::ValidationFailure { aggregate, .. } => Some(aggregate),
            _ => None,
        }
    }
}
