//! Moving processed files out of staging.

use crate::discovery::DiscoveredTable;
use crate::prelude::*;
use chrono::{Local, NaiveDate};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Relocates processed staging files into a dated archive directory.
///
/// Files land in `{root}/processed_{YYYYMMDD}/{original file name}`. Moves
/// happen in the given order and stop at the first failure; files already
/// moved stay moved.
#[derive(Debug, Clone)]
pub struct Archiver {
    root: PathBuf,
    date: Option<NaiveDate>,
}

impl Archiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            date: None,
        }
    }

    /// Pins the archive date instead of using today's local date.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory files are moved into for this run.
    pub fn archive_dir(&self) -> PathBuf {
        let date = self.date.unwrap_or_else(|| Local::now().date_naive());
        self.root.join(format!("processed_{}", date.format("%Y%m%d")))
    }

    /// Moves a table's chunks, then its `.meta` file.
    pub async fn archive_table(&self, table: &DiscoveredTable) -> Result<Vec<PathBuf>> {
        let mut files = table.chunk_paths();
        files.extend(table.meta_file.clone());
        self.archive_files(&table.name, &files).await
    }

    /// Moves `files` in order and returns their archive locations.
    ///
    /// Fails with `ArchiveFailure` listing the files already moved and the
    /// ones left in staging.
    #[instrument(skip_all, fields(table = %table, files = files.len()))]
    pub async fn archive_files(&self, table: &str, files: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let target_dir = self.archive_dir();
        let failure = |message: String, moved: &[PathBuf], pending: &[PathBuf]| {
            IngestError::ArchiveFailure {
                table: table.to_string(),
                message,
                moved: moved.to_vec(),
                pending: pending.to_vec(),
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&target_dir).await {
            return Err(failure(
                format!("cannot create {}: {e}", target_dir.display()),
                &[],
                files,
            ));
        }

        let mut moved: Vec<PathBuf> = Vec::with_capacity(files.len());
        let mut destinations = Vec::with_capacity(files.len());
        for (index, source) in files.iter().enumerate() {
            let Some(file_name) = source.file_name() else {
                return Err(failure(
                    format!("{} has no file name", source.display()),
                    &moved,
                    &files[index..],
                ));
            };
            let destination = target_dir.join(file_name);

            if let Err(e) = move_file(source, &destination).await {
                warn!(
                    file = %source.display(),
                    moved = moved.len(),
                    pending = files.len() - index,
                    error = %e,
                    "Archive stopped part way"
                );
                return Err(failure(
                    format!("cannot move {}: {e}", source.display()),
                    &moved,
                    &files[index..],
                ));
            }
            debug!(from = %source.display(), to = %destination.display(), "Archived file");
            moved.push(source.clone());
            destinations.push(destination);
        }

        Ok(destinations)
    }
}

/// Renames `source` to `destination`, copying across filesystems when needed.
/// Never overwrites an existing destination.
async fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    if tokio::fs::try_exists(destination).await? {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists in the archive", destination.display()),
        ));
    }

    match tokio::fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !tokio::fs::try_exists(source).await.unwrap_or(false) {
                return Err(rename_err);
            }
            debug!(error = %rename_err, "Rename failed, copying instead");
            if let Err(e) = tokio::fs::copy(source, destination).await {
                let _ = tokio::fs::remove_file(destination).await;
                return Err(e);
            }
            if let Err(e) = tokio::fs::remove_file(source).await {
                let _ = tokio::fs::remove_file(destination).await;
                return Err(e);
            }
            Ok(())
        }
    }
}
