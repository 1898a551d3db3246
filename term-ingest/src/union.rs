//! Loading and concatenating a table's chunk files.

use crate::core::IngestContext;
use crate::discovery::SourceFile;
use crate::prelude::*;
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Name the unioned dataset is registered under for validation queries.
pub const DATA_TABLE: &str = "data";

/// All chunks of one table, concatenated row-wise.
#[derive(Debug, Clone)]
pub struct UnionedDataset {
    table: String,
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    sources: Vec<SourceFile>,
}

impl UnionedDataset {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// The chunk files this dataset was built from, in union order.
    pub fn sources(&self) -> &[SourceFile] {
        &self.sources
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    pub fn column_names(&self) -> Vec<String> {
        column_names(&self.schema)
    }

    /// Registers the rows as [`DATA_TABLE`] in `ctx`.
    pub fn register(&self, ctx: &IngestContext) -> Result<()> {
        ctx.register_batches(DATA_TABLE, self.schema.clone(), self.batches.clone())
    }
}

fn column_names(schema: &Schema) -> Vec<String> {
    schema.fields().iter().map(|f| f.name().clone()).collect()
}

fn column_signatures(schema: &Schema) -> Vec<String> {
    schema
        .fields()
        .iter()
        .map(|f| format!("{}: {}", f.name(), f.data_type()))
        .collect()
}

/// Same names in the same order, with the same types.
fn same_columns(expected: &Schema, found: &Schema) -> bool {
    expected.fields().len() == found.fields().len()
        && expected
            .fields()
            .iter()
            .zip(found.fields().iter())
            .all(|(a, b)| a.name() == b.name() && a.data_type() == b.data_type())
}

/// Widens nullability so every chunk's batches fit the unioned schema.
fn merge_nullability(current: &Schema, other: &Schema) -> Schema {
    let fields: Vec<Field> = current
        .fields()
        .iter()
        .zip(other.fields().iter())
        .map(|(a, b)| {
            a.as_ref()
                .clone()
                .with_nullable(a.is_nullable() || b.is_nullable())
        })
        .collect();
    Schema::new(fields)
}

/// Reads chunk files and concatenates them into a [`UnionedDataset`].
///
/// The first chunk fixes the column layout; every other chunk must match it
/// exactly. Nothing is written.
#[derive(Debug, Clone, Default)]
pub struct ChunkUnioner;

impl ChunkUnioner {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, fields(table = %table, chunks = chunks.len()))]
    pub async fn union(
        &self,
        ctx: &IngestContext,
        table: &str,
        chunks: &[SourceFile],
    ) -> Result<UnionedDataset> {
        if chunks.is_empty() {
            return Err(IngestError::Internal(format!(
                "no chunk files to union for table '{table}'"
            )));
        }

        let mut loaded: Vec<Vec<RecordBatch>> = Vec::with_capacity(chunks.len());
        let mut unioned_schema: Option<Schema> = None;

        for chunk in chunks {
            let (schema, batches) =
                ctx.read_parquet_file(&chunk.path)
                    .await
                    .map_err(|e| IngestError::ChunkRead {
                        table: table.to_string(),
                        file: chunk.path.clone(),
                        message: e.to_string(),
                    })?;

            unioned_schema = Some(match unioned_schema {
                None => schema.as_ref().clone(),
                Some(expected) => {
                    if !same_columns(&expected, &schema) {
                        let (expected_cols, found_cols) =
                            if column_names(&expected) == column_names(&schema) {
                                (column_signatures(&expected), column_signatures(&schema))
                            } else {
                                (column_names(&expected), column_names(&schema))
                            };
                        return Err(IngestError::SchemaMismatch {
                            table: table.to_string(),
                            file: chunk.path.clone(),
                            expected: expected_cols,
                            found: found_cols,
                        });
                    }
                    merge_nullability(&expected, &schema)
                }
            });

            debug!(
                file = %chunk.file_name(),
                rows = batches.iter().map(RecordBatch::num_rows).sum::<usize>(),
                "Loaded chunk"
            );
            loaded.push(batches);
        }

        let schema: SchemaRef = match unioned_schema {
            Some(schema) => Arc::new(schema),
            None => {
                return Err(IngestError::Internal(format!(
                    "no schema resolved for table '{table}'"
                )))
            }
        };

        let mut batches = Vec::new();
        for chunk_batches in loaded {
            for batch in chunk_batches {
                batches.push(RecordBatch::try_new(
                    schema.clone(),
                    batch.columns().to_vec(),
                )?);
            }
        }

        Ok(UnionedDataset {
            table: table.to_string(),
            schema,
            batches,
            sources: chunks.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ChunkName;
    use crate::test_fixtures::{renamed_column_batch, sample_batch, write_chunk};
    use std::path::Path;

    fn source(dir: &Path, file_name: &str) -> SourceFile {
        let name = ChunkName::parse(file_name).unwrap();
        let path = dir.join(file_name);
        let byte_size = std::fs::metadata(&path).unwrap().len();
        SourceFile {
            path,
            table: name.table,
            period: name.period,
            byte_size,
        }
    }

    #[tokio::test]
    async fn test_union_concatenates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_chunk(dir.path(), "orders_202401_202401", &sample_batch(0, 3, 3)).unwrap();
        write_chunk(dir.path(), "orders_202402_202402", &sample_batch(3, 2, 2)).unwrap();
        let chunks = vec![
            source(dir.path(), "orders_202401_202401"),
            source(dir.path(), "orders_202402_202402"),
        ];

        let ctx = IngestContext::new().unwrap();
        let dataset = ChunkUnioner::new()
            .union(&ctx, "orders", &chunks)
            .await
            .unwrap();

        assert_eq!(dataset.table(), "orders");
        assert_eq!(dataset.num_rows(), 5);
        assert_eq!(dataset.num_columns(), 3);
        assert_eq!(dataset.column_names(), vec!["id", "name", "amount"]);
        assert_eq!(dataset.sources().len(), 2);
        // Staging is untouched.
        assert!(dir.path().join("orders_202401_202401").exists());
    }

    #[tokio::test]
    async fn test_divergent_chunk_is_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_chunk(dir.path(), "orders_202401_202401", &sample_batch(0, 3, 3)).unwrap();
        write_chunk(dir.path(), "orders_202402_202402", &renamed_column_batch(3, 2)).unwrap();
        let chunks = vec![
            source(dir.path(), "orders_202401_202401"),
            source(dir.path(), "orders_202402_202402"),
        ];

        let ctx = IngestContext::new().unwrap();
        let err = ChunkUnioner::new()
            .union(&ctx, "orders", &chunks)
            .await
            .unwrap_err();

        match err {
            IngestError::SchemaMismatch {
                file,
                expected,
                found,
                ..
            } => {
                assert!(file.ends_with("orders_202402_202402"));
                assert_eq!(expected, vec!["id", "name", "amount"]);
                assert_eq!(found, vec!["id", "name", "total"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unreadable_chunk_is_chunk_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orders_202401_202401"), b"not parquet").unwrap();
        let chunks = vec![source(dir.path(), "orders_202401_202401")];

        let ctx = IngestContext::new().unwrap();
        let err = ChunkUnioner::new()
            .union(&ctx, "orders", &chunks)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ChunkRead");
    }

    #[tokio::test]
    async fn test_register_exposes_data_table() {
        let dir = tempfile::tempdir().unwrap();
        write_chunk(dir.path(), "orders_202401_202401", &sample_batch(0, 4, 2)).unwrap();
        let chunks = vec![source(dir.path(), "orders_202401_202401")];

        let ctx = IngestContext::new().unwrap();
        let dataset = ChunkUnioner::new()
            .union(&ctx, "orders", &chunks)
            .await
            .unwrap();
        dataset.register(&ctx).unwrap();

        let df = ctx.inner().table(DATA_TABLE).await.unwrap();
        assert_eq!(df.schema().fields().len(), 3);
    }
}
