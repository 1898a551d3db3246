//! The extraction orchestrator.
//!
//! [`VolumeExtractor`] discovers staged tables and drives each one through
//!
//! ```text
//! Discovered -> ExpectationsLoaded -> Unioned -> Validated -> Written -> Archived
//! ```
//!
//! or into `Failed` from any non-terminal state. Every table runs in its own
//! DataFusion session with its own state value; a failure ends that table's
//! pipeline and is reported in the [`ExtractionReport`], never propagated to
//! the other tables.
//!
//! # Examples
//!
//! ```rust,no_run
//! use term_ingest::config::ExtractionConfig;
//! use term_ingest::extractor::VolumeExtractor;
//!
//! # async fn example() -> term_ingest::error::Result<()> {
//! let config = ExtractionConfig::new(
//!     "dev",
//!     "/volumes/dev/mft",
//!     "/volumes/dev/archive",
//!     "/volumes/dev/logs/extraction.jsonl",
//! );
//! let report = VolumeExtractor::new(config)?.extract_all().await?;
//! for (table, outcome) in report.iter() {
//!     println!("{table}: {outcome}");
//! }
//! # Ok(())
//! # }
//! ```

use crate::archive::Archiver;
use crate::core::{ExtractionOutcome, ExtractionReport, TableState};
use crate::discovery::{DiscoveredTable, FileDiscovery};
use crate::expectations::ExpectationStore;
use crate::prelude::*;
use crate::run_log::{JsonLinesSink, TracingSink};
use crate::union::ChunkUnioner;
use crate::validator::Validator;
use crate::writer::{CommitState, ParquetTableWriter, RawTableWriter, TableIdent};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One table's position in the pipeline.
#[derive(Debug)]
struct TablePipeline {
    table: String,
    state: TableState,
    logger: RunLogger,
}

impl TablePipeline {
    fn new(table: &str, logger: &RunLogger) -> Self {
        Self {
            table: table.to_string(),
            state: TableState::Discovered,
            logger: logger.scoped("VolumeExtractor"),
        }
    }

    /// Moves to `next` and records the transition.
    async fn advance(&mut self, next: TableState, message: impl Into<String>) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(IngestError::Internal(format!(
                "illegal transition for table '{}': {} -> {next}",
                self.table, self.state
            )));
        }
        let message = format!("{}: {}", self.table, message.into());
        match next {
            TableState::Validated { passed: false } => {
                self.logger.failure(next.as_str(), message).await
            }
            _ => self.logger.success(next.as_str(), message).await,
        }
        self.state = next;
        Ok(())
    }

    /// Ends the pipeline with `error`.
    async fn fail(&mut self, error: &IngestError) {
        let reason = format!("{}: {error}", error.kind());
        self.logger
            .failure(
                "failed",
                format!("{}: failed after {}: {reason}", self.table, self.state),
            )
            .await;
        self.state = TableState::Failed { reason };
    }
}

/// Drives discovery, validation, writing and archiving for a staging area.
#[derive(Debug, Clone)]
pub struct VolumeExtractor {
    config: ExtractionConfig,
    logger: RunLogger,
    context_config: IngestContextConfig,
    discovery: FileDiscovery,
    expectations: ExpectationStore,
    unioner: ChunkUnioner,
    writer: Arc<dyn RawTableWriter>,
    archiver: Archiver,
}

impl VolumeExtractor {
    /// Validates `config` and wires the default collaborators.
    ///
    /// Run-log entries go to a JSON-lines file at `log_table_path` and are
    /// mirrored to `tracing`. Raw tables are Parquet under the warehouse root.
    pub fn new(config: ExtractionConfig) -> Result<Self> {
        config.validate()?;

        let logger = RunLogger::new(&config.domain, &config.process)
            .with_sink(Arc::new(JsonLinesSink::new(&config.log_table_path)))
            .with_sink(Arc::new(TracingSink::new()));

        Ok(Self {
            logger,
            context_config: IngestContextConfig::default(),
            discovery: FileDiscovery::new(&config.source_volume_path),
            expectations: ExpectationStore::new(&config.default_id_column),
            unioner: ChunkUnioner::new(),
            writer: Arc::new(ParquetTableWriter::new(config.warehouse_root())),
            archiver: Archiver::new(&config.archive_volume_path),
            config,
        })
    }

    /// Replaces the run logger.
    pub fn with_logger(mut self, logger: RunLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Replaces the raw table writer.
    pub fn with_writer(mut self, writer: Arc<dyn RawTableWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Replaces the archiver, e.g. to pin the archive date.
    pub fn with_archiver(mut self, archiver: Archiver) -> Self {
        self.archiver = archiver;
        self
    }

    /// Sets the DataFusion settings used for every table session.
    pub fn with_context_config(mut self, config: IngestContextConfig) -> Self {
        self.context_config = config;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn logger(&self) -> &RunLogger {
        &self.logger
    }

    /// Lists the tables currently staged.
    pub async fn discover_tables(&self) -> Result<Vec<DiscoveredTable>> {
        self.discovery.discover().await
    }

    /// Runs one table's pipeline to a terminal state.
    #[instrument(skip_all, fields(table = %table.name))]
    pub async fn extract_table(&self, table: &DiscoveredTable) -> ExtractionOutcome {
        let mut pipeline = TablePipeline::new(&table.name, &self.logger);
        match self.run_pipeline(&mut pipeline, table).await {
            Ok(()) => {
                info!("Table extracted");
                ExtractionOutcome::Success
            }
            Err(e) => {
                warn!(error = %e, state = %pipeline.state, "Table extraction failed");
                pipeline.fail(&e).await;
                ExtractionOutcome::from_error(&e)
            }
        }
    }

    async fn run_pipeline(&self, pipeline: &mut TablePipeline, table: &DiscoveredTable) -> Result<()> {
        let meta_file = table.expectation_file()?;
        let ctx = IngestContext::with_config(self.context_config.clone())?;

        let expectation = self
            .expectations
            .load(&ctx, &table.name, meta_file)
            .await?;
        pipeline
            .advance(
                TableState::ExpectationsLoaded,
                format!(
                    "expecting {} rows, {} columns, {} unique '{}' values",
                    expectation.row_count,
                    expectation.column_count,
                    expectation.unique_id_count,
                    expectation.id_column
                ),
            )
            .await?;

        let dataset = self.unioner.union(&ctx, &table.name, &table.chunks).await?;
        pipeline
            .advance(
                TableState::Unioned,
                format!(
                    "{} chunks, {} rows, {} columns",
                    dataset.sources().len(),
                    dataset.num_rows(),
                    dataset.num_columns()
                ),
            )
            .await?;

        let validator = Validator::new(self.logger.clone());
        let validated = match validator.validate(&ctx, dataset, &expectation).await {
            Ok(validated) => {
                pipeline
                    .advance(
                        TableState::Validated { passed: true },
                        format!("all {} checks passed", validated.aggregate().len()),
                    )
                    .await?;
                validated
            }
            Err(e) => {
                if let Some(aggregate) = e.validation() {
                    pipeline
                        .advance(TableState::Validated { passed: false }, aggregate.to_string())
                        .await?;
                }
                return Err(e);
            }
        };

        let ident = TableIdent::from_config(&self.config, &table.name);
        match self
            .writer
            .commit_state(&ident, validated.dataset().sources())
            .await?
        {
            CommitState::None => {
                let summary = self.writer.append(&ident, &validated).await?;
                pipeline
                    .advance(
                        TableState::Written,
                        format!("appended {} rows to {ident}", summary.rows),
                    )
                    .await?;
            }
            CommitState::Complete => {
                pipeline
                    .logger
                    .warning(
                        "resume_archive",
                        format!(
                            "{}: chunks already committed to {ident}, skipping write",
                            table.name
                        ),
                    )
                    .await;
                pipeline
                    .advance(TableState::Written, format!("already present in {ident}"))
                    .await?;
            }
            CommitState::Partial { committed } => {
                return Err(IngestError::write_failure(
                    &table.name,
                    format!(
                        "partially ingested previously ({} of {} chunks committed: {}); reconcile manually",
                        committed.len(),
                        table.chunks.len(),
                        committed.join(", ")
                    ),
                ));
            }
        }

        let archived = self.archiver.archive_table(table).await?;
        pipeline
            .advance(
                TableState::Archived,
                format!(
                    "moved {} files to {}",
                    archived.len(),
                    self.archiver.archive_dir().display()
                ),
            )
            .await?;

        Ok(())
    }

    /// Processes every staged table and reports each outcome.
    ///
    /// Only an unreadable staging directory fails the run; an empty one yields
    /// an empty report. Up to `max_concurrent_tables` tables run at once.
    #[instrument(skip(self), fields(catalog = %self.config.catalog))]
    pub async fn extract_all(&self) -> Result<ExtractionReport> {
        let logger = self.logger.scoped("VolumeExtractor");

        let tables = match self.discover_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                logger.failure("discover", e.to_string()).await;
                return Err(e);
            }
        };

        if tables.is_empty() {
            logger
                .warning(
                    "discover",
                    format!(
                        "No tables found in {}",
                        self.config.source_volume_path.display()
                    ),
                )
                .await;
            return Ok(ExtractionReport::new());
        }

        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        logger
            .success(
                "discover",
                format!("Discovered {} tables: {}", tables.len(), names.join(", ")),
            )
            .await;

        let report: ExtractionReport = stream::iter(tables.iter())
            .map(|table| async move { (table.name.clone(), self.extract_table(table).await) })
            .buffer_unordered(self.config.max_concurrent_tables.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect();

        let succeeded = report.succeeded().len();
        let failed = report.failed().len();
        let message = format!(
            "Extraction complete: {succeeded} succeeded, {failed} failed out of {} tables",
            report.len()
        );
        if failed == 0 {
            logger.success("extract_all", message).await;
        } else {
            logger.warning("extract_all", message).await;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_log::{LogFilter, MemorySink};
    use crate::test_fixtures::{sample_batch, write_chunk, write_meta};
    use std::path::Path;

    fn extractor(root: &Path, sink: Arc<MemorySink>) -> VolumeExtractor {
        let staging = root.join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let config = ExtractionConfig::new(
            "dev",
            &staging,
            root.join("archive"),
            root.join("logs").join("run.jsonl"),
        )
        .with_warehouse_path(root.join("warehouse"));
        VolumeExtractor::new(config)
            .unwrap()
            .with_logger(RunLogger::new("volume_extraction", "extract").with_sink(sink))
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ExtractionConfig::new("", "/a", "/b", "/c");
        assert!(VolumeExtractor::new(config).is_err());
    }

    #[tokio::test]
    async fn test_pipeline_rejects_skipped_states() {
        let logger = RunLogger::new("d", "p");
        let mut pipeline = TablePipeline::new("t", &logger);
        assert!(pipeline.advance(TableState::Written, "skip").await.is_err());
        assert!(pipeline
            .advance(TableState::ExpectationsLoaded, "loaded")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_empty_staging_is_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let report = extractor(dir.path(), sink.clone())
            .extract_all()
            .await
            .unwrap();

        assert!(report.is_empty());
        let warnings = sink.query(&LogFilter::new().status(LogStatus::Warning));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].step, "discover");
    }

    #[tokio::test]
    async fn test_transitions_are_logged_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let extractor = extractor(dir.path(), sink.clone());
        let staging = dir.path().join("staging");
        write_chunk(&staging, "customers_202401_202403", &sample_batch(0, 5, 5)).unwrap();
        write_meta(&staging, "customers", 5, 3, 5).unwrap();

        let report = extractor.extract_all().await.unwrap();
        assert!(report.is_success());

        let steps: Vec<String> = sink
            .entries()
            .into_iter()
            .filter(|e| e.source == "VolumeExtractor")
            .map(|e| e.step)
            .collect();
        assert_eq!(
            steps,
            vec![
                "discover",
                "expectations_loaded",
                "unioned",
                "validated",
                "written",
                "archived",
                "extract_all"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_staging_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let extractor = extractor(dir.path(), sink.clone());
        std::fs::remove_dir(dir.path().join("staging")).unwrap();

        let err = extractor.extract_all().await.unwrap_err();
        assert!(!err.is_table_scoped());
        assert_eq!(
            sink.query(&LogFilter::new().status(LogStatus::Failure)).len(),
            1
        );
    }
}
