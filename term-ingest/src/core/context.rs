//! DataFusion context management for ingestion.
//!
//! [`IngestContext`] wraps DataFusion's [`SessionContext`] with settings suited
//! to reading staged Parquet files. Each table pipeline gets its own context,
//! so nothing registered for one table is visible to another.

use crate::prelude::*;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::execution::context::{SessionConfig, SessionContext};
use datafusion::execution::memory_pool::{FairSpillPool, MemoryPool};
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use datafusion::prelude::ParquetReadOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

/// Configuration for creating an [`IngestContext`].
#[derive(Debug, Clone)]
pub struct IngestContextConfig {
    /// Batch size for query execution
    pub batch_size: usize,
    /// Target number of partitions for parallel execution
    pub target_partitions: usize,
    /// Maximum memory for query execution (in bytes)
    pub max_memory: usize,
}

impl Default for IngestContextConfig {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            target_partitions: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4),
            max_memory: 2 * 1024 * 1024 * 1024, // 2GB
        }
    }
}

/// A managed DataFusion context for one table pipeline.
pub struct IngestContext {
    inner: SessionContext,
    config: IngestContextConfig,
}

impl IngestContext {
    /// Creates a new context with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(IngestContextConfig::default())
    }

    /// Creates a new context with custom configuration.
    #[instrument(skip(config))]
    pub fn with_config(config: IngestContextConfig) -> Result<Self> {
        let mut session_config = SessionConfig::new()
            .with_batch_size(config.batch_size)
            .with_target_partitions(config.target_partitions)
            .with_information_schema(true);
        // Keep plain Utf8 columns so raw tables carry the staged schema as-is.
        session_config
            .options_mut()
            .execution
            .parquet
            .schema_force_view_types = false;

        let memory_pool = Arc::new(FairSpillPool::new(config.max_memory)) as Arc<dyn MemoryPool>;

        let runtime_env = RuntimeEnvBuilder::new()
            .with_memory_pool(memory_pool)
            .build()
            .map(Arc::new)?;

        let inner = SessionContext::new_with_config_rt(session_config, runtime_env);

        Ok(Self { inner, config })
    }

    /// Returns a reference to the underlying DataFusion [`SessionContext`].
    pub fn inner(&self) -> &SessionContext {
        &self.inner
    }

    /// Returns the configuration used to create this context.
    pub fn config(&self) -> &IngestContextConfig {
        &self.config
    }

    /// Reads one Parquet file regardless of its extension.
    ///
    /// Staged chunks carry no extension and expectation files end in `.meta`,
    /// so the listing extension filter is disabled.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn read_parquet_file(&self, path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>)> {
        let path_str = path.to_str().ok_or_else(|| {
            IngestError::Configuration(format!(
                "Path contains invalid UTF-8: {}",
                path.display()
            ))
        })?;

        let options = ParquetReadOptions {
            file_extension: "",
            ..Default::default()
        };
        let df = self.inner.read_parquet(path_str, options).await?;
        let schema = df.schema().inner().clone();
        let batches = df.collect().await?;

        Ok((schema, batches))
    }

    /// Registers in-memory batches as a table.
    pub fn register_batches(
        &self,
        name: &str,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<()> {
        let table = MemTable::try_new(schema, vec![batches])?;
        self.inner.register_table(name, Arc::new(table))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{sample_batch, write_parquet};
    use arrow::array::Int64Array;

    #[test]
    fn test_default_config() {
        let config = IngestContextConfig::default();
        assert_eq!(config.batch_size, 8192);
        assert_eq!(config.max_memory, 2 * 1024 * 1024 * 1024);
        assert!(config.target_partitions >= 1);
    }

    #[tokio::test]
    async fn test_read_parquet_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("customers_202401_202403");
        write_parquet(&path, &sample_batch(0, 4, 4)).unwrap();

        let ctx = IngestContext::new().unwrap();
        let (schema, batches) = ctx.read_parquet_file(&path).await.unwrap();

        assert_eq!(schema.fields().len(), 3);
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 4);
    }

    #[tokio::test]
    async fn test_register_batches_is_queryable() {
        let batch = sample_batch(0, 3, 3);
        let ctx = IngestContext::new().unwrap();
        ctx.register_batches("data", batch.schema(), vec![batch])
            .unwrap();

        let batches = ctx
            .inner()
            .sql("SELECT COUNT(*) FROM data")
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        let count = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .value(0);
        assert_eq!(count, 3);
    }
}
