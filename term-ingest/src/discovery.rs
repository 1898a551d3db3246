//! Staging area discovery.
//!
//! Chunk files are named `<table>_<YYYYMM>_<YYYYMM>` with no extension and
//! each table has one companion `<table>.meta`. A table name is any run of
//! characters without a dot. Anything else in the staging directory is
//! ignored.

use crate::prelude::*;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

// Hard-coded patterns, known to be valid.
#[allow(clippy::expect_used)]
static CHUNK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<table>[^.]+?)_(?P<start>\d{6})_(?P<end>\d{6})$")
        .expect("chunk pattern should be valid")
});

#[allow(clippy::expect_used)]
static META_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<table>[^.]+)\.meta$").expect("meta pattern should be valid")
});

/// A calendar month, as embedded in chunk names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: u16,
    pub month: u8,
}

impl YearMonth {
    /// Parses `YYYYMM`. Returns `None` for anything else or a month outside 1-12.
    pub fn parse(value: &str) -> Option<Self> {
        if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year = value[..4].parse().ok()?;
        let month = value[4..].parse().ok()?;
        (1..=12).contains(&month).then_some(Self { year, month })
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

/// The date range a chunk covers. Orders by start, then end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkPeriod {
    pub start: YearMonth,
    pub end: YearMonth,
}

impl fmt::Display for ChunkPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.start, self.end)
    }
}

/// A chunk file name split into its table and period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkName {
    pub table: String,
    pub period: ChunkPeriod,
}

impl ChunkName {
    /// Parses `<table>_<YYYYMM>_<YYYYMM>`.
    ///
    /// ```rust
    /// use term_ingest::discovery::ChunkName;
    ///
    /// let name = ChunkName::parse("order_items_202401_202403").unwrap();
    /// assert_eq!(name.table, "order_items");
    /// assert_eq!(name.period.to_string(), "202401_202403");
    ///
    /// assert!(ChunkName::parse("customers_draft.csv").is_none());
    /// assert!(ChunkName::parse("customers.meta").is_none());
    /// ```
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = CHUNK_PATTERN.captures(file_name)?;
        let start = YearMonth::parse(&caps["start"])?;
        let end = YearMonth::parse(&caps["end"])?;
        if start > end {
            return None;
        }
        Some(Self {
            table: caps["table"].to_string(),
            period: ChunkPeriod { start, end },
        })
    }
}

/// Table name of a `<table>.meta` file name.
pub fn meta_table_name(file_name: &str) -> Option<&str> {
    META_PATTERN
        .captures(file_name)
        .and_then(|caps| caps.name("table"))
        .map(|m| m.as_str())
}

/// A staged chunk file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Location in staging; the file's identity
    pub path: PathBuf,
    pub table: String,
    pub period: ChunkPeriod,
    pub byte_size: u64,
}

impl SourceFile {
    /// The chunk identifier, e.g. `202401_202403`.
    pub fn chunk_id(&self) -> String {
        self.period.to_string()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// All staged files belonging to one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTable {
    pub name: String,
    /// Ordered by period start, then period end
    pub chunks: Vec<SourceFile>,
    /// The companion `.meta` file, if present
    pub meta_file: Option<PathBuf>,
    /// Where the `.meta` file is expected
    pub expected_meta_path: PathBuf,
}

impl DiscoveredTable {
    /// The expectation file, or `MissingExpectationFile` if it is absent.
    pub fn expectation_file(&self) -> Result<&Path> {
        self.meta_file
            .as_deref()
            .ok_or_else(|| IngestError::MissingExpectationFile {
                table: self.name.clone(),
                path: self.expected_meta_path.clone(),
            })
    }

    pub fn chunk_paths(&self) -> Vec<PathBuf> {
        self.chunks.iter().map(|c| c.path.clone()).collect()
    }
}

/// Scans a staging directory and groups chunk files by table.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    staging: PathBuf,
}

impl FileDiscovery {
    pub fn new(staging: impl Into<PathBuf>) -> Self {
        Self {
            staging: staging.into(),
        }
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Lists the staging directory. Tables come back sorted by name.
    ///
    /// Fails only when the directory itself cannot be read; a table without
    /// its `.meta` file is still returned, with `meta_file` unset.
    #[instrument(skip(self), fields(staging = %self.staging.display()))]
    pub async fn discover(&self) -> Result<Vec<DiscoveredTable>> {
        let unavailable = |source| IngestError::StagingUnavailable {
            path: self.staging.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.staging)
            .await
            .map_err(unavailable)?;

        let mut chunks: BTreeMap<String, Vec<SourceFile>> = BTreeMap::new();
        let mut metas: BTreeMap<String, PathBuf> = BTreeMap::new();

        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };

            if let Some(table) = meta_table_name(file_name) {
                metas.insert(table.to_string(), entry.path());
            } else if let Some(name) = ChunkName::parse(file_name) {
                let byte_size = entry.metadata().await?.len();
                chunks.entry(name.table.clone()).or_default().push(SourceFile {
                    path: entry.path(),
                    table: name.table,
                    period: name.period,
                    byte_size,
                });
            } else {
                debug!(file = %file_name, "Ignoring staged file outside naming convention");
            }
        }

        let tables = chunks
            .into_iter()
            .map(|(name, mut files)| {
                files.sort_by(|a, b| a.period.cmp(&b.period).then_with(|| a.path.cmp(&b.path)));
                let expected_meta_path = self.staging.join(format!("{name}.meta"));
                DiscoveredTable {
                    meta_file: metas.remove(&name),
                    name,
                    chunks: files,
                    expected_meta_path,
                }
            })
            .collect();

        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_name_matches() {
        let cases = [
            ("customers_202401_202403", "customers"),
            ("order_items_202401_202403", "order_items"),
            ("t_202312_202312", "t"),
        ];
        for (file_name, table) in cases {
            let name = ChunkName::parse(file_name).unwrap();
            assert_eq!(name.table, table, "{file_name}");
        }
    }

    #[test]
    fn test_chunk_name_non_matches() {
        for file_name in [
            "customers.meta",
            "customers_20240101_20240131",
            "customers_draft.csv",
            "README.md",
            "customers_202413_202414",
            "customers_202405_202401",
            "customers_202401_202403.parquet",
            "customers",
        ] {
            assert!(ChunkName::parse(file_name).is_none(), "{file_name}");
        }
    }

    #[test]
    fn test_meta_table_name() {
        assert_eq!(meta_table_name("customers.meta"), Some("customers"));
        assert_eq!(meta_table_name("customers.meta.bak"), None);
        assert_eq!(meta_table_name("customers_202401_202403"), None);
        assert_eq!(meta_table_name("member-claims.meta"), Some("member-claims"));
        assert_eq!(meta_table_name(".meta"), None);
    }

    #[test]
    fn test_parse_table_names_beyond_identifiers() {
        let hyphenated = ChunkName::parse("member-claims_202301_202303").unwrap();
        assert_eq!(hyphenated.table, "member-claims");

        let digit_led = ChunkName::parse("2024_claims_202301_202303").unwrap();
        assert_eq!(digit_led.table, "2024_claims");
        assert_eq!(digit_led.period.to_string(), "202301_202303");
    }

    #[test]
    fn test_period_ordering() {
        let a = ChunkName::parse("t_202401_202403").unwrap().period;
        let b = ChunkName::parse("t_202401_202406").unwrap().period;
        let c = ChunkName::parse("t_202402_202402").unwrap().period;
        assert!(a < b);
        assert!(b < c);
    }

    #[tokio::test]
    async fn test_discover_groups_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "customers_202404_202406",
            "customers_202401_202403",
            "customers.meta",
            "customers_draft.csv",
            "orders_202401_202403",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested_202401_202403")).unwrap();

        let tables = FileDiscovery::new(dir.path()).discover().await.unwrap();
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["customers", "orders"]);

        let customers = &tables[0];
        let chunk_ids: Vec<_> = customers.chunks.iter().map(|c| c.chunk_id()).collect();
        assert_eq!(chunk_ids, vec!["202401_202403", "202404_202406"]);
        assert_eq!(customers.chunks[0].byte_size, 1);
        assert!(customers.expectation_file().is_ok());

        let orders = &tables[1];
        let err = orders.expectation_file().unwrap_err();
        assert_eq!(err.kind(), "MissingExpectationFile");
    }

    #[tokio::test]
    async fn test_discover_hyphenated_table() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["member-claims_202301_202303", "member-claims.meta"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let tables = FileDiscovery::new(dir.path()).discover().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "member-claims");
        assert_eq!(tables[0].chunks.len(), 1);
        assert!(tables[0].expectation_file().is_ok());
    }

    #[tokio::test]
    async fn test_meta_without_chunks_is_not_a_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("claims.meta"), b"x").unwrap();

        let tables = FileDiscovery::new(dir.path()).discover().await.unwrap();
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn test_missing_staging_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileDiscovery::new(dir.path().join("absent"))
            .discover()
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::StagingUnavailable { .. }));
    }
}
