//! # Term Ingest - Validated ingestion of staged Parquet deliveries
//!
//! Term Ingest picks up chunked Parquet files that upstream jobs drop into a
//! staging volume, checks each table's chunks against the counts declared in
//! its `.meta` file, appends the validated rows to an append-only raw table
//! and moves the processed files into a dated archive.
//!
//! ## Overview
//!
//! A staging volume holds, per table:
//!
//! - chunk files named `<table>_<YYYYMM>_<YYYYMM>` (no extension)
//! - one `<table>.meta` declaring the expected row, column and unique id counts
//!
//! Each table runs through its own pipeline:
//!
//! ```text
//! discover -> load expectations -> union chunks -> validate -> write -> archive
//! ```
//!
//! Validation evaluates every check before deciding, so a failure reports all
//! mismatches at once. A failing table never stops the others.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use term_ingest::prelude::*;
//! use term_ingest::extractor::VolumeExtractor;
//!
//! # async fn example() -> Result<()> {
//! let config = ExtractionConfig::new(
//!     "dev",
//!     "/volumes/dev/mft",
//!     "/volumes/dev/archive",
//!     "/volumes/dev/logs/extraction.jsonl",
//! )
//! .with_warehouse_path("/volumes/dev/warehouse")
//! .with_max_concurrent_tables(4);
//!
//! let report = VolumeExtractor::new(config)?.extract_all().await?;
//! for (table, outcome) in report.failed() {
//!     eprintln!("{table}: {outcome}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`discovery`]: staging scan and naming convention
//! - [`expectations`]: `.meta` parsing
//! - [`union`]: chunk loading and schema consistency
//! - [`validator`]: expectation checks and [`validator::ValidatedDataset`]
//! - [`writer`]: raw table storage and the commit ledger
//! - [`archive`]: moving processed files out of staging
//! - [`extractor`]: the per-table state machine and run report
//! - [`run_log`]: structured step records for operators
//! - [`logging`]: `tracing` subscriber setup

pub mod archive;
pub mod config;
pub mod core;
pub mod discovery;
pub mod error;
pub mod expectations;
pub mod extractor;
pub mod logging;
pub mod prelude;
pub mod run_log;
pub mod union;
pub mod validator;
pub mod writer;

#[doc(hidden)]
pub mod test_fixtures;
