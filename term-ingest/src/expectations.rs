//! Declared expectations for a staged table.
//!
//! A `.meta` file is a Parquet record in one of two encodings:
//!
//! - **wide**: one row with `row_count`, `column_count`, `unique_id_count`
//!   and an optional `id_column`
//! - **long**: `test_name` / `value` rows named `number_of_rows`,
//!   `number_of_columns`, `number_of_unique_ids` and optionally `id_column`
//!
//! Counts may be stored as integers or numeric strings.

use crate::core::IngestContext;
use crate::prelude::*;
use arrow::array::{Array, StringArray};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const ROW_COUNT: &str = "row_count";
const COLUMN_COUNT: &str = "column_count";
const UNIQUE_ID_COUNT: &str = "unique_id_count";
const ID_COLUMN: &str = "id_column";

/// Maps a long-form `test_name` to its wide-form field.
fn long_form_field(test_name: &str) -> Option<&'static str> {
    match test_name.trim() {
        "number_of_rows" | ROW_COUNT => Some(ROW_COUNT),
        "number_of_columns" | COLUMN_COUNT => Some(COLUMN_COUNT),
        "number_of_unique_ids" | UNIQUE_ID_COUNT => Some(UNIQUE_ID_COUNT),
        ID_COLUMN => Some(ID_COLUMN),
        _ => None,
    }
}

/// Expected counts for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableExpectation {
    pub table: String,
    pub row_count: u64,
    pub column_count: u64,
    pub unique_id_count: u64,
    /// Column whose distinct values are counted
    pub id_column: String,
}

impl TableExpectation {
    /// Parses an expectation record already loaded into Arrow.
    ///
    /// `path` is only used for error reporting. `default_id_column` applies
    /// when the record does not name an identifier column.
    pub fn from_record_batches(
        table: &str,
        path: &Path,
        schema: &SchemaRef,
        batches: &[RecordBatch],
        default_id_column: &str,
    ) -> Result<Self> {
        let malformed = |message: String| IngestError::malformed_expectation(table, path, message);

        let batch = concat_batches(schema, batches)
            .map_err(|e| malformed(format!("cannot combine record batches: {e}")))?;

        let fields = if schema.column_with_name("test_name").is_some()
            && schema.column_with_name("value").is_some()
        {
            long_form_fields(&batch).map_err(malformed)?
        } else {
            wide_form_fields(&batch).map_err(malformed)?
        };

        let count = |name: &str| -> Result<u64> {
            let raw = fields
                .get(name)
                .ok_or_else(|| malformed(format!("missing field '{name}'")))?;
            parse_count(raw)
                .ok_or_else(|| malformed(format!("field '{name}' is not a non-negative integer: '{raw}'")))
        };

        let id_column = fields
            .get(ID_COLUMN)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(default_id_column)
            .to_string();

        Ok(Self {
            table: table.to_string(),
            row_count: count(ROW_COUNT)?,
            column_count: count(COLUMN_COUNT)?,
            unique_id_count: count(UNIQUE_ID_COUNT)?,
            id_column,
        })
    }
}

/// Accepts `"42"`, `"42.0"` and surrounding whitespace; rejects negatives,
/// fractions and anything non-numeric.
fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<u64>() {
        return Some(value);
    }
    let value = raw.parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64)
        .then_some(value as u64)
}

/// Casts a column to strings so integer and string encodings parse alike.
fn string_column(batch: &RecordBatch, name: &str) -> std::result::Result<StringArray, String> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| format!("missing field '{name}'"))?;
    let as_utf8 = cast(column, &DataType::Utf8)
        .map_err(|e| format!("field '{name}' cannot be read as text: {e}"))?;
    as_utf8
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| format!("field '{name}' cannot be read as text"))
}

fn wide_form_fields(batch: &RecordBatch) -> std::result::Result<BTreeMap<String, String>, String> {
    match batch.num_rows() {
        0 => return Err("expectation record is empty".to_string()),
        1 => {}
        n => return Err(format!("expected a single expectation row, found {n}")),
    }

    let mut fields = BTreeMap::new();
    for name in [ROW_COUNT, COLUMN_COUNT, UNIQUE_ID_COUNT, ID_COLUMN] {
        if batch.column_by_name(name).is_none() {
            continue;
        }
        let values = string_column(batch, name)?;
        if values.is_valid(0) {
            fields.insert(name.to_string(), values.value(0).to_string());
        }
    }
    Ok(fields)
}

fn long_form_fields(batch: &RecordBatch) -> std::result::Result<BTreeMap<String, String>, String> {
    let names = string_column(batch, "test_name")?;
    let values = string_column(batch, "value")?;

    let mut fields = BTreeMap::new();
    for row in 0..batch.num_rows() {
        if !names.is_valid(row) {
            continue;
        }
        let Some(field) = long_form_field(names.value(row)) else {
            debug!(test_name = names.value(row), "Ignoring unknown expectation");
            continue;
        };
        if !values.is_valid(row) {
            continue;
        }
        if fields
            .insert(field.to_string(), values.value(row).to_string())
            .is_some()
        {
            return Err(format!("expectation '{field}' is declared more than once"));
        }
    }
    Ok(fields)
}

/// Loads [`TableExpectation`]s from `.meta` files.
#[derive(Debug, Clone)]
pub struct ExpectationStore {
    default_id_column: String,
}

impl Default for ExpectationStore {
    fn default() -> Self {
        Self::new("id")
    }
}

impl ExpectationStore {
    pub fn new(default_id_column: impl Into<String>) -> Self {
        Self {
            default_id_column: default_id_column.into(),
        }
    }

    pub fn default_id_column(&self) -> &str {
        &self.default_id_column
    }

    /// Reads and parses the expectation file for `table`.
    ///
    /// An unreadable file is reported as malformed; it exists but does not
    /// declare usable counts.
    #[instrument(skip_all, fields(table = %table, path = %path.display()))]
    pub async fn load(
        &self,
        ctx: &IngestContext,
        table: &str,
        path: &Path,
    ) -> Result<TableExpectation> {
        let (schema, batches) = ctx.read_parquet_file(path).await.map_err(|e| {
            IngestError::malformed_expectation(table, PathBuf::from(path), e.to_string())
        })?;

        let expectation = TableExpectation::from_record_batches(
            table,
            path,
            &schema,
            &batches,
            &self.default_id_column,
        )?;
        debug!(
            rows = expectation.row_count,
            columns = expectation.column_count,
            unique_ids = expectation.unique_id_count,
            id_column = %expectation.id_column,
            "Loaded expectations"
        );
        Ok(expectation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{write_long_meta, write_meta, write_meta_with_id, write_parquet};
    use arrow::array::{ArrayRef, Int64Array};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    async fn load(dir: &Path, table: &str) -> Result<TableExpectation> {
        let ctx = IngestContext::new().unwrap();
        ExpectationStore::default()
            .load(&ctx, table, &dir.join(format!("{table}.meta")))
            .await
    }

    #[tokio::test]
    async fn test_load_wide_form() {
        let dir = tempfile::tempdir().unwrap();
        write_meta(dir.path(), "customers", 100, 4, 95).unwrap();

        let expectation = load(dir.path(), "customers").await.unwrap();
        assert_eq!(expectation.table, "customers");
        assert_eq!(expectation.row_count, 100);
        assert_eq!(expectation.column_count, 4);
        assert_eq!(expectation.unique_id_count, 95);
        assert_eq!(expectation.id_column, "id");
    }

    #[tokio::test]
    async fn test_load_wide_form_with_id_column() {
        let dir = tempfile::tempdir().unwrap();
        write_meta_with_id(dir.path(), "orders", 10, 3, 10, Some("order_id")).unwrap();

        let expectation = load(dir.path(), "orders").await.unwrap();
        assert_eq!(expectation.id_column, "order_id");
    }

    #[tokio::test]
    async fn test_load_long_form() {
        let dir = tempfile::tempdir().unwrap();
        write_long_meta(
            dir.path(),
            "claims",
            &[
                ("number_of_rows", "12"),
                ("number_of_columns", "5"),
                ("number_of_unique_ids", "12"),
                ("id_column", "claim_id"),
            ],
        )
        .unwrap();

        let expectation = load(dir.path(), "claims").await.unwrap();
        assert_eq!(expectation.row_count, 12);
        assert_eq!(expectation.column_count, 5);
        assert_eq!(expectation.id_column, "claim_id");
    }

    #[tokio::test]
    async fn test_missing_field_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        write_long_meta(
            dir.path(),
            "claims",
            &[("number_of_rows", "12"), ("number_of_columns", "5")],
        )
        .unwrap();

        let err = load(dir.path(), "claims").await.unwrap_err();
        assert_eq!(err.kind(), "MalformedExpectationFile");
        assert!(err.to_string().contains("unique_id_count"));
    }

    #[tokio::test]
    async fn test_non_numeric_and_negative_values_are_malformed() {
        for bad in ["twelve", "-3", "1.5"] {
            let dir = tempfile::tempdir().unwrap();
            write_long_meta(
                dir.path(),
                "claims",
                &[
                    ("number_of_rows", bad),
                    ("number_of_columns", "5"),
                    ("number_of_unique_ids", "12"),
                ],
            )
            .unwrap();

            let err = load(dir.path(), "claims").await.unwrap_err();
            assert_eq!(err.kind(), "MalformedExpectationFile", "value {bad}");
        }
    }

    #[tokio::test]
    async fn test_multi_row_wide_record_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Arc::new(Schema::new(vec![
            Field::new("row_count", DataType::Int64, false),
            Field::new("column_count", DataType::Int64, false),
            Field::new("unique_id_count", DataType::Int64, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![1, 2])),
            Arc::new(Int64Array::from(vec![1, 2])),
            Arc::new(Int64Array::from(vec![1, 2])),
        ];
        let batch = RecordBatch::try_new(schema, columns).unwrap();
        write_parquet(&dir.path().join("t.meta"), &batch).unwrap();

        let err = load(dir.path(), "t").await.unwrap_err();
        assert!(err.to_string().contains("single expectation row"));
    }

    #[tokio::test]
    async fn test_unreadable_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.meta"), b"row_count=1").unwrap();

        let err = load(dir.path(), "t").await.unwrap_err();
        assert_eq!(err.kind(), "MalformedExpectationFile");
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(" 42 "), Some(42));
        assert_eq!(parse_count("42.0"), Some(42));
        assert_eq!(parse_count("-1"), None);
        assert_eq!(parse_count("4.2"), None);
        assert_eq!(parse_count("NaN"), None);
        assert_eq!(parse_count(""), None);
    }
}
