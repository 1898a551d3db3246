//! Validation result types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome of a single expectation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Identifier of the check (e.g. `row_count`)
    pub check_name: String,
    /// The declared value
    pub expected: u64,
    /// The observed value, absent when the check could not be computed
    pub actual: Option<u64>,
    /// Whether the check passed
    pub passed: bool,
    /// Human-readable description of the result
    pub message: String,
}

impl ValidationResult {
    /// Creates a result that passes when `actual` equals `expected`.
    pub fn compare(
        check_name: impl Into<String>,
        expected: u64,
        actual: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            expected,
            actual: Some(actual),
            passed: expected == actual,
            message: message.into(),
        }
    }

    /// Creates a failed result for a check whose value could not be computed.
    pub fn unavailable(
        check_name: impl Into<String>,
        expected: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            expected,
            actual: None,
            passed: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.passed { "[PASS]" } else { "[FAIL]" };
        write!(f, "{prefix} {}: {}", self.check_name, self.message)
    }
}

/// An ordered collection of validation results.
///
/// Results are only ever appended. [`all_passed`](Self::all_passed) is a
/// reduction over everything collected so far, so callers evaluate every
/// check first and ask once at the end.
///
/// # Examples
///
/// ```rust
/// use term_ingest::core::{ValidationAggregate, ValidationResult};
///
/// let mut aggregate = ValidationAggregate::new();
/// aggregate.push(ValidationResult::compare("row_count", 100, 99, "Expected 100 rows, got 99"));
/// aggregate.push(ValidationResult::compare("column_count", 4, 4, "Expected 4 columns, got 4"));
///
/// assert!(!aggregate.all_passed());
/// assert_eq!(aggregate.failed_results().count(), 1);
/// assert_eq!(aggregate.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationAggregate {
    results: Vec<ValidationResult>,
}

impl ValidationAggregate {
    /// Creates an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a result.
    pub fn push(&mut self, result: ValidationResult) {
        self.results.push(result);
    }

    /// Builder-style variant of [`push`](Self::push).
    pub fn with(mut self, result: ValidationResult) -> Self {
        self.push(result);
        self
    }

    /// True when at least one result was collected and every result passed.
    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.passed)
    }

    /// Results that passed, in insertion order.
    pub fn passed_results(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.passed)
    }

    /// Results that failed, in insertion order.
    pub fn failed_results(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// Looks up a result by check name.
    pub fn get(&self, check_name: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.check_name == check_name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Consumes the aggregate, returning the results.
    pub fn into_results(self) -> Vec<ValidationResult> {
        self.results
    }
}

impl<'a> IntoIterator for &'a ValidationAggregate {
    type Item = &'a ValidationResult;
    type IntoIter = std::slice::Iter<'a, ValidationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

impl FromIterator<ValidationResult> for ValidationAggregate {
    fn from_iter<I: IntoIterator<Item = ValidationResult>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ValidationAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failed_results().count();
        write!(f, "{failed} of {} checks failed", self.results.len())?;
        for result in &self.results {
            write!(f, "\n  {result}")?;
        }
        Ok(())
    }
}
