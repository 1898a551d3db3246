//! Volume Extract
//!
//! Ingests every staged table in a source volume into its raw table and
//! archives the processed files. Exits non-zero when any table fails.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use term_ingest::config::ExtractionConfig;
use term_ingest::extractor::VolumeExtractor;
use term_ingest::logging::setup::{init_logging, LoggingConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; overrides the individual path flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Catalog name (e.g. dev, sit, prod)
    #[arg(long)]
    catalog: Option<String>,

    /// Staging directory holding chunk and .meta files
    #[arg(long)]
    source: Option<PathBuf>,

    /// Directory processed files are moved into
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Root directory of raw tables
    #[arg(long)]
    warehouse: Option<PathBuf>,

    /// JSON-lines file receiving run-log entries
    #[arg(long)]
    log_table: Option<PathBuf>,

    /// Maximum number of tables processed at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Emit diagnostics as JSON, warnings only outside term-ingest
    #[arg(long)]
    json_logs: bool,

    /// Debug-level diagnostics
    #[arg(long, short)]
    verbose: bool,
}

fn logging_config(args: &Args) -> LoggingConfig {
    match (args.verbose, args.json_logs) {
        (true, json) => LoggingConfig::development().with_json_format(json),
        (false, true) => LoggingConfig::production(),
        (false, false) => LoggingConfig::default(),
    }
}

fn build_config(args: &Args) -> Result<ExtractionConfig> {
    let mut config = match &args.config {
        Some(path) => ExtractionConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let (Some(catalog), Some(source), Some(archive), Some(log_table)) =
                (&args.catalog, &args.source, &args.archive, &args.log_table)
            else {
                bail!("either --config or all of --catalog, --source, --archive and --log-table are required");
            };
            let mut config = ExtractionConfig::new(catalog, source, archive, log_table);
            if let Some(warehouse) = &args.warehouse {
                config = config.with_warehouse_path(warehouse);
            }
            config
        }
    };

    if let Some(concurrency) = args.concurrency {
        config = config.with_max_concurrent_tables(concurrency);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(e) = init_logging(logging_config(&args)) {
        eprintln!("warning: logging not initialized: {e}");
    }

    let config = build_config(&args)?;
    let report = VolumeExtractor::new(config)?.extract_all().await?;

    if report.is_empty() {
        println!("No tables found");
    }
    for (table, outcome) in report.iter() {
        if outcome.is_success() {
            println!("OK: {table}");
        } else {
            println!("FAILED: {table} -- {}", outcome.status());
        }
    }

    if !report.is_success() {
        process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    fn parse(flags: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("volume-extract").chain(flags.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_logging_presets_follow_flags() {
        let plain = logging_config(&parse(&[]));
        assert!(!plain.json_format);
        assert_eq!(plain.level, Level::INFO);

        let json = logging_config(&parse(&["--json-logs"]));
        assert!(json.json_format);
        assert_eq!(json.level, Level::WARN);
        assert_eq!(json.ingest_level, Level::INFO);

        let verbose = logging_config(&parse(&["-v", "--json-logs"]));
        assert!(verbose.json_format);
        assert_eq!(verbose.ingest_level, Level::DEBUG);
    }

    #[test]
    fn test_config_requires_paths_without_file() {
        let err = build_config(&parse(&["--catalog", "dev"])).unwrap_err();
        assert!(err.to_string().contains("--log-table"));
    }
}
