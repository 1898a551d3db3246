//! Append-only raw table storage.
//!
//! A raw table `{catalog}.{schema}.{table}` is a directory of Parquet part
//! files under the warehouse root. Each table directory also keeps
//! `_ingest_log.jsonl`, a ledger with one entry per committed source chunk.
//! The ledger is appended only after the part file is durably in place, so
//! a chunk listed there is guaranteed to be in the table. Entries are keyed
//! by file name and SHA-256 of the chunk bytes; a re-delivery under the same
//! name with different contents is a new chunk.

use crate::config::ExtractionConfig;
use crate::discovery::SourceFile;
use crate::prelude::*;
use crate::validator::ValidatedDataset;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// File name of the per-table commit ledger.
pub const LEDGER_FILE: &str = "_ingest_log.jsonl";

const PART_PREFIX: &str = "part-";
const PART_SUFFIX: &str = ".parquet";

/// Fully qualified raw table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdent {
    pub catalog: String,
    pub schema: String,
    pub table: String,
}

impl TableIdent {
    pub fn new(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// The raw table for `table` under the configured catalog and bronze schema.
    pub fn from_config(config: &ExtractionConfig, table: &str) -> Self {
        Self::new(&config.catalog, &config.bronze_schema, table)
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}

/// One committed source chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub source_file: String,
    pub byte_size: u64,
    /// Hex SHA-256 of the chunk file
    #[serde(default)]
    pub content_hash: String,
    pub part_file: String,
    /// Rows in the whole part file the chunk went into
    pub rows: u64,
    pub committed_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn covers(&self, source: &SourceFile, content_hash: &str) -> bool {
        self.source_file == source.file_name()
            && self.byte_size == source.byte_size
            && self.content_hash == content_hash
    }
}

/// How much of a chunk set a raw table already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitState {
    /// No chunk of the set has been committed.
    None,
    /// Every chunk of the set has been committed.
    Complete,
    /// Some chunks were committed; the listed file names were.
    Partial { committed: Vec<String> },
}

/// What an append produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub part_file: PathBuf,
    pub rows: u64,
}

/// Destination for validated datasets.
#[async_trait]
pub trait RawTableWriter: fmt::Debug + Send + Sync {
    /// Reports whether `sources` were already appended to `ident`.
    async fn commit_state(&self, ident: &TableIdent, sources: &[SourceFile])
        -> Result<CommitState>;

    /// Appends the dataset's rows to `ident`, creating the table if absent.
    async fn append(&self, ident: &TableIdent, data: &ValidatedDataset) -> Result<WriteSummary>;
}

/// Stores raw tables as Parquet part files under a warehouse directory.
#[derive(Debug, Clone)]
pub struct ParquetTableWriter {
    warehouse: PathBuf,
}

impl ParquetTableWriter {
    pub fn new(warehouse: impl Into<PathBuf>) -> Self {
        Self {
            warehouse: warehouse.into(),
        }
    }

    pub fn warehouse(&self) -> &Path {
        &self.warehouse
    }

    /// `{warehouse}/{catalog}/{schema}/{table}`
    pub fn table_dir(&self, ident: &TableIdent) -> PathBuf {
        self.warehouse
            .join(&ident.catalog)
            .join(&ident.schema)
            .join(&ident.table)
    }

    /// Part files of a table in commit order.
    pub async fn part_files(&self, ident: &TableIdent) -> Result<Vec<PathBuf>> {
        let dir = self.table_dir(ident);
        blocking(&ident.table, move || list_part_files(&dir)).await
    }

    /// Every ledger entry of a table, oldest first.
    pub async fn read_ledger(&self, ident: &TableIdent) -> Result<Vec<LedgerEntry>> {
        let table = ident.table.clone();
        let path = self.table_dir(ident).join(LEDGER_FILE);
        blocking(&ident.table, move || read_ledger_file(&table, &path)).await
    }
}

/// Runs filesystem work on the blocking pool.
async fn blocking<T, F>(table: &str, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| IngestError::write_failure(table, format!("blocking task failed: {e}")))?
}

/// Hex SHA-256 of a file's bytes.
pub fn content_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn is_part_file(name: &str) -> bool {
    name.starts_with(PART_PREFIX) && name.ends_with(PART_SUFFIX)
}

fn list_part_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut parts: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_part_file)
        })
        .collect();
    parts.sort();
    Ok(parts)
}

fn read_ledger_file(table: &str, path: &Path) -> Result<Vec<LedgerEntry>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| {
            IngestError::write_failure(
                table,
                format!("corrupt ledger line {} in {}: {e}", index + 1, path.display()),
            )
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn column_names(schema: &SchemaRef) -> Vec<String> {
    schema.fields().iter().map(|f| f.name().clone()).collect()
}

fn existing_columns(part: &Path) -> Result<Vec<String>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(part)?)?;
    Ok(column_names(builder.schema()))
}

/// Everything the blocking write needs, owned.
struct PendingAppend {
    table: String,
    dir: PathBuf,
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    sources: Vec<SourceFile>,
    rows: u64,
}

impl PendingAppend {
    fn run(self) -> Result<WriteSummary> {
        std::fs::create_dir_all(&self.dir)?;

        let hashes = self
            .sources
            .iter()
            .map(|source| content_hash(&source.path))
            .collect::<Result<Vec<_>>>()?;

        let parts = list_part_files(&self.dir)?;
        if let Some(first) = parts.first() {
            let existing = existing_columns(first)?;
            let incoming = column_names(&self.schema);
            if existing != incoming {
                return Err(IngestError::write_failure(
                    &self.table,
                    format!(
                        "columns [{}] do not match existing table columns [{}]",
                        incoming.join(", "),
                        existing.join(", ")
                    ),
                ));
            }
        }

        let part_name = format!("{PART_PREFIX}{:05}{PART_SUFFIX}", parts.len());
        let part_path = self.dir.join(&part_name);
        if part_path.exists() {
            return Err(IngestError::write_failure(
                &self.table,
                format!("part file {} already exists", part_path.display()),
            ));
        }

        // Hidden name, so a crashed write is never listed as a part.
        let temp_path = self.dir.join(format!(".{part_name}.tmp"));
        let file = File::create(&temp_path)?;
        let mut writer = ArrowWriter::try_new(file.try_clone()?, self.schema.clone(), None)?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.close()?;
        file.sync_all()?;
        std::fs::rename(&temp_path, &part_path)?;

        let committed_at = Utc::now();
        let mut ledger = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(LEDGER_FILE))?;
        for (source, hash) in self.sources.iter().zip(hashes) {
            let entry = LedgerEntry {
                source_file: source.file_name(),
                byte_size: source.byte_size,
                content_hash: hash,
                part_file: part_name.clone(),
                rows: self.rows,
                committed_at,
            };
            writeln!(ledger, "{}", serde_json::to_string(&entry)?)?;
        }
        ledger.sync_all()?;

        Ok(WriteSummary {
            part_file: part_path,
            rows: self.rows,
        })
    }
}

#[async_trait]
impl RawTableWriter for ParquetTableWriter {
    async fn commit_state(
        &self,
        ident: &TableIdent,
        sources: &[SourceFile],
    ) -> Result<CommitState> {
        let table = ident.table.clone();
        let path = self.table_dir(ident).join(LEDGER_FILE);
        let sources = sources.to_vec();

        blocking(&ident.table, move || {
            let ledger = read_ledger_file(&table, &path)?;
            let mut committed = Vec::new();
            for source in &sources {
                let name = source.file_name();
                if !ledger.iter().any(|entry| entry.source_file == name) {
                    continue;
                }
                let hash = content_hash(&source.path)?;
                if ledger.iter().any(|entry| entry.covers(source, &hash)) {
                    committed.push(name);
                }
            }

            Ok(if committed.is_empty() {
                CommitState::None
            } else if committed.len() == sources.len() {
                CommitState::Complete
            } else {
                CommitState::Partial { committed }
            })
        })
        .await
    }

    #[instrument(skip(self, data), fields(table = %ident))]
    async fn append(&self, ident: &TableIdent, data: &ValidatedDataset) -> Result<WriteSummary> {
        let dataset = data.dataset();
        let pending = PendingAppend {
            table: ident.table.clone(),
            dir: self.table_dir(ident),
            schema: dataset.schema().clone(),
            batches: dataset.batches().to_vec(),
            sources: dataset.sources().to_vec(),
            rows: dataset.num_rows() as u64,
        };
        debug!(rows = pending.rows, dir = %pending.dir.display(), "Appending to raw table");

        let table = ident.table.clone();
        let summary = tokio::task::spawn_blocking(move || pending.run())
            .await
            .map_err(|e| IngestError::write_failure(&table, format!("write task failed: {e}")))?
            .map_err(|e| match e {
                e @ IngestError::WriteFailure { .. } => e,
                other => IngestError::write_failure(&table, other.to_string()),
            })?;

        info!(
            rows = summary.rows,
            part = %summary.part_file.display(),
            "Appended to raw table"
        );
        Ok(summary)
    }
}
