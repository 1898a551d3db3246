//! Staging fixtures for tests.
//!
//! Writes chunk and `.meta` files in the same Parquet layout upstream
//! deliveries use, so unit and integration tests exercise the real readers.

use crate::error::Result;
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writes one batch to a Parquet file at `path`, whatever its extension.
pub fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// A three column batch (`id`, `name`, `amount`).
///
/// Ids start at `start` and cycle through `distinct_ids` values, so the
/// batch has `rows` rows and `min(rows, distinct_ids)` distinct ids.
pub fn sample_batch(start: i64, rows: usize, distinct_ids: usize) -> RecordBatch {
    let cycle = distinct_ids.max(1) as i64;
    let ids: Vec<i64> = (0..rows as i64).map(|i| start + i % cycle).collect();
    let names: Vec<String> = (0..rows).map(|i| format!("name_{}", start + i as i64)).collect();
    let amounts: Vec<f64> = (0..rows).map(|i| i as f64 * 1.5).collect();

    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("name", DataType::Utf8, true),
        Field::new("amount", DataType::Float64, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(ids)),
        Arc::new(StringArray::from(names)),
        Arc::new(Float64Array::from(amounts)),
    ];

    #[allow(clippy::expect_used)]
    RecordBatch::try_new(schema, columns).expect("sample batch columns match schema")
}

/// [`sample_batch`] with every `amount` shifted, as in a corrected re-delivery.
pub fn restated_batch(start: i64, rows: usize, distinct_ids: usize) -> RecordBatch {
    let batch = sample_batch(start, rows, distinct_ids);
    let amounts: Vec<f64> = (0..rows).map(|i| i as f64 * 1.5 + 100.0).collect();
    let mut columns = batch.columns().to_vec();
    columns[2] = Arc::new(Float64Array::from(amounts));

    #[allow(clippy::expect_used)]
    RecordBatch::try_new(batch.schema(), columns).expect("restated batch columns match schema")
}

/// Like [`sample_batch`] but the third column is `total` instead of `amount`.
pub fn renamed_column_batch(start: i64, rows: usize) -> RecordBatch {
    let batch = sample_batch(start, rows, rows);
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("name", DataType::Utf8, true),
        Field::new("total", DataType::Float64, true),
    ]));

    #[allow(clippy::expect_used)]
    RecordBatch::try_new(schema, batch.columns().to_vec()).expect("same column types")
}

/// A batch whose `id` column contains nulls: `[1, NULL, 2, NULL]`.
pub fn batch_with_null_ids() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("name", DataType::Utf8, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(vec![Some(1), None, Some(2), None])),
        Arc::new(StringArray::from(vec!["a", "b", "c", "d"])),
    ];

    #[allow(clippy::expect_used)]
    RecordBatch::try_new(schema, columns).expect("null id columns match schema")
}

/// Writes a chunk file named `file_name` into `dir`.
pub fn write_chunk(dir: &Path, file_name: &str, batch: &RecordBatch) -> Result<PathBuf> {
    let path = dir.join(file_name);
    write_parquet(&path, batch)?;
    Ok(path)
}

/// Writes a wide `<table>.meta` file with integer counts.
pub fn write_meta(
    dir: &Path,
    table: &str,
    row_count: i64,
    column_count: i64,
    unique_id_count: i64,
) -> Result<PathBuf> {
    write_meta_with_id(dir, table, row_count, column_count, unique_id_count, None)
}

/// Writes a wide `<table>.meta` file, optionally naming the identifier column.
pub fn write_meta_with_id(
    dir: &Path,
    table: &str,
    row_count: i64,
    column_count: i64,
    unique_id_count: i64,
    id_column: Option<&str>,
) -> Result<PathBuf> {
    let mut fields = vec![
        Field::new("row_count", DataType::Int64, false),
        Field::new("column_count", DataType::Int64, false),
        Field::new("unique_id_count", DataType::Int64, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(vec![row_count])),
        Arc::new(Int64Array::from(vec![column_count])),
        Arc::new(Int64Array::from(vec![unique_id_count])),
    ];
    if let Some(id_column) = id_column {
        fields.push(Field::new("id_column", DataType::Utf8, true));
        columns.push(Arc::new(StringArray::from(vec![id_column])));
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    let path = dir.join(format!("{table}.meta"));
    write_parquet(&path, &batch)?;
    Ok(path)
}

/// Writes a long-form `<table>.meta` file of `test_name` / `value` pairs.
pub fn write_long_meta(dir: &Path, table: &str, pairs: &[(&str, &str)]) -> Result<PathBuf> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("test_name", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, true),
    ]));
    let names: Vec<&str> = pairs.iter().map(|(name, _)| *name).collect();
    let values: Vec<&str> = pairs.iter().map(|(_, value)| *value).collect();
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(names)),
            Arc::new(StringArray::from(values)),
        ],
    )?;

    let path = dir.join(format!("{table}.meta"));
    write_parquet(&path, &batch)?;
    Ok(path)
}
