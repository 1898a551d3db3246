//! Expectation checks against a unioned dataset.
//!
//! Every check runs against the dataset registered as
//! [`DATA_TABLE`](crate::union::DATA_TABLE) in the table's own session.
//! The [`Validator`] always evaluates all checks and only then reduces them
//! to a verdict; a [`ValidatedDataset`] can only be built from an aggregate
//! in which every check passed.

use crate::core::{IngestContext, ValidationAggregate, ValidationResult};
use crate::expectations::TableExpectation;
use crate::prelude::*;
use crate::union::{UnionedDataset, DATA_TABLE};
use arrow::array::Int64Array;
use async_trait::async_trait;
use datafusion::prelude::SessionContext;
use std::fmt::Debug;
use tracing::{debug, instrument};

/// Quotes a column name for SQL, doubling embedded quotes.
pub fn escape_identifier(identifier: &str) -> Result<String> {
    if identifier.trim().is_empty() {
        return Err(IngestError::Configuration(
            "SQL identifier cannot be empty or whitespace-only".to_string(),
        ));
    }
    let escaped = identifier.replace('"', "\"\"");
    Ok(format!("\"{escaped}\""))
}

async fn single_count(ctx: &SessionContext, sql: &str) -> Result<u64> {
    let batches = ctx.sql(sql).await?.collect().await?;
    let value = batches
        .first()
        .filter(|b| b.num_rows() > 0)
        .and_then(|b| b.column(0).as_any().downcast_ref::<Int64Array>())
        .map(|a| a.value(0))
        .ok_or_else(|| IngestError::Internal(format!("Failed to extract count from '{sql}'")))?;
    u64::try_from(value)
        .map_err(|_| IngestError::Internal(format!("Negative count {value} from '{sql}'")))
}

/// One expectation evaluated against the `data` table.
#[async_trait]
pub trait ExpectationCheck: Debug + Send + Sync {
    /// Check identifier, e.g. `row_count`.
    fn name(&self) -> &str;

    /// The declared value.
    fn expected(&self) -> u64;

    /// Computes the observed value and compares it.
    ///
    /// An `Err` means the value could not be computed at all.
    async fn evaluate(&self, ctx: &SessionContext) -> Result<ValidationResult>;
}

/// Row count equality.
#[derive(Debug, Clone)]
pub struct RowCountCheck {
    expected: u64,
}

impl RowCountCheck {
    pub fn new(expected: u64) -> Self {
        Self { expected }
    }
}

#[async_trait]
impl ExpectationCheck for RowCountCheck {
    fn name(&self) -> &str {
        "row_count"
    }

    fn expected(&self) -> u64 {
        self.expected
    }

    async fn evaluate(&self, ctx: &SessionContext) -> Result<ValidationResult> {
        let actual = single_count(ctx, &format!("SELECT COUNT(*) AS row_count FROM {DATA_TABLE}")).await?;
        Ok(ValidationResult::compare(
            self.name(),
            self.expected,
            actual,
            format!("Expected {} rows, got {actual}", self.expected),
        ))
    }
}

/// Column count equality.
#[derive(Debug, Clone)]
pub struct ColumnCountCheck {
    expected: u64,
}

impl ColumnCountCheck {
    pub fn new(expected: u64) -> Self {
        Self { expected }
    }
}

#[async_trait]
impl ExpectationCheck for ColumnCountCheck {
    fn name(&self) -> &str {
        "column_count"
    }

    fn expected(&self) -> u64 {
        self.expected
    }

    async fn evaluate(&self, ctx: &SessionContext) -> Result<ValidationResult> {
        let df = ctx.table(DATA_TABLE).await?;
        let actual = df.schema().fields().len() as u64;
        Ok(ValidationResult::compare(
            self.name(),
            self.expected,
            actual,
            format!("Expected {} columns, got {actual}", self.expected),
        ))
    }
}

/// Distinct count of the identifier column. NULL counts as one value.
#[derive(Debug, Clone)]
pub struct UniqueIdCountCheck {
    column: String,
    expected: u64,
}

impl UniqueIdCountCheck {
    pub fn new(column: impl Into<String>, expected: u64) -> Self {
        Self {
            column: column.into(),
            expected,
        }
    }
}

#[async_trait]
impl ExpectationCheck for UniqueIdCountCheck {
    fn name(&self) -> &str {
        "unique_id_count"
    }

    fn expected(&self) -> u64 {
        self.expected
    }

    async fn evaluate(&self, ctx: &SessionContext) -> Result<ValidationResult> {
        let df = ctx.table(DATA_TABLE).await?;
        if df.schema().field_with_unqualified_name(&self.column).is_err() {
            return Ok(ValidationResult::unavailable(
                self.name(),
                self.expected,
                format!(
                    "Identifier column '{}' not found; expected {} unique values",
                    self.column, self.expected
                ),
            ));
        }

        let column = escape_identifier(&self.column)?;
        let sql = format!("SELECT COUNT(*) FROM (SELECT DISTINCT {column} FROM {DATA_TABLE})");
        let actual = single_count(ctx, &sql).await?;
        Ok(ValidationResult::compare(
            self.name(),
            self.expected,
            actual,
            format!(
                "Expected {} unique values in '{}', got {actual}",
                self.expected, self.column
            ),
        ))
    }
}

/// The three checks declared by an expectation, in evaluation order.
pub fn checks_for(expectation: &TableExpectation) -> Vec<Box<dyn ExpectationCheck>> {
    vec![
        Box::new(RowCountCheck::new(expectation.row_count)),
        Box::new(ColumnCountCheck::new(expectation.column_count)),
        Box::new(UniqueIdCountCheck::new(
            expectation.id_column.clone(),
            expectation.unique_id_count,
        )),
    ]
}

/// A dataset whose every check passed. The only input the writer accepts.
#[derive(Debug, Clone)]
pub struct ValidatedDataset {
    dataset: UnionedDataset,
    aggregate: ValidationAggregate,
}

impl ValidatedDataset {
    /// Fails with `ValidationFailure`, carrying every result, unless all passed.
    pub fn try_new(dataset: UnionedDataset, aggregate: ValidationAggregate) -> Result<Self> {
        if !aggregate.all_passed() {
            return Err(IngestError::ValidationFailure {
                table: dataset.table().to_string(),
                aggregate,
            });
        }
        Ok(Self { dataset, aggregate })
    }

    pub fn dataset(&self) -> &UnionedDataset {
        &self.dataset
    }

    pub fn aggregate(&self) -> &ValidationAggregate {
        &self.aggregate
    }

    pub fn table(&self) -> &str {
        self.dataset.table()
    }
}

/// Runs expectation checks and records each one in the run log.
#[derive(Debug, Clone)]
pub struct Validator {
    logger: RunLogger,
}

impl Validator {
    pub fn new(logger: RunLogger) -> Self {
        Self {
            logger: logger.scoped("Validator"),
        }
    }

    /// Evaluates every check in `checks`, never stopping early.
    ///
    /// A check that errors is recorded as a failed result with no actual value.
    pub async fn run_checks(
        &self,
        ctx: &SessionContext,
        checks: &[Box<dyn ExpectationCheck>],
    ) -> ValidationAggregate {
        let mut aggregate = ValidationAggregate::new();
        for check in checks {
            let result = match check.evaluate(ctx).await {
                Ok(result) => result,
                Err(e) => ValidationResult::unavailable(
                    check.name(),
                    check.expected(),
                    format!("Could not compute {}: {e}", check.name()),
                ),
            };
            debug!(check = %result.check_name, passed = result.passed, "Check evaluated");

            let step = format!("validate_{}", result.check_name);
            if result.passed {
                self.logger.success(&step, result.message.clone()).await;
            } else {
                self.logger.failure(&step, result.message.clone()).await;
            }
            aggregate.push(result);
        }
        aggregate
    }

    /// Validates a unioned dataset against its expectations.
    ///
    /// Registers the dataset in `ctx`, runs all three checks and returns the
    /// dataset wrapped as validated, or `ValidationFailure` with every result.
    #[instrument(skip_all, fields(table = %dataset.table()))]
    pub async fn validate(
        &self,
        ctx: &IngestContext,
        dataset: UnionedDataset,
        expectation: &TableExpectation,
    ) -> Result<ValidatedDataset> {
        dataset.register(ctx)?;

        let aggregate = self
            .run_checks(ctx.inner(), &checks_for(expectation))
            .await;

        let failed = aggregate.failed_results().count();
        if failed == 0 && aggregate.all_passed() {
            self.logger
                .success(
                    "validate",
                    format!("{}: all {} checks passed", dataset.table(), aggregate.len()),
                )
                .await;
        } else {
            self.logger
                .failure(
                    "validate",
                    format!(
                        "{}: {failed} of {} checks failed",
                        dataset.table(),
                        aggregate.len()
                    ),
                )
                .await;
        }

        ValidatedDataset::try_new(dataset, aggregate)
    }
}
