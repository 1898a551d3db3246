//! Per-table outcomes, pipeline states and the run report.

use super::ValidationAggregate;
use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a table currently is in its pipeline.
///
/// ```text
/// Discovered -> ExpectationsLoaded -> Unioned -> Validated -> Written -> Archived
///      \______________\__________________\___________\__________\----> Failed
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TableState {
    Discovered,
    ExpectationsLoaded,
    Unioned,
    Validated { passed: bool },
    Written,
    Archived,
    Failed { reason: String },
}

impl TableState {
    /// Short name used as the run-log step for transitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::ExpectationsLoaded => "expectations_loaded",
            Self::Unioned => "unioned",
            Self::Validated { .. } => "validated",
            Self::Written => "written",
            Self::Archived => "archived",
            Self::Failed { .. } => "failed",
        }
    }

    /// `Archived` and `Failed` end a pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived | Self::Failed { .. })
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: &TableState) -> bool {
        use TableState::*;
        match (self, next) {
            (Archived, _) | (Failed { .. }, _) => false,
            (_, Failed { .. }) => true,
            (Discovered, ExpectationsLoaded) => true,
            (ExpectationsLoaded, Unioned) => true,
            (Unioned, Validated { .. }) => true,
            (Validated { passed: true }, Written) => true,
            (Written, Archived) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validated { passed } => {
                let verdict = if *passed { "pass" } else { "fail" };
                write!(f, "validated({verdict})")
            }
            Self::Failed { reason } => write!(f, "failed({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Final result of one table's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExtractionOutcome {
    Success,
    Failure {
        /// Error kind, e.g. `SchemaMismatch`
        kind: String,
        /// `"<kind>: <detail>"`
        reason: String,
        /// Every check result when the failure came from validation
        #[serde(skip_serializing_if = "Option::is_none")]
        validation: Option<ValidationAggregate>,
    },
}

impl ExtractionOutcome {
    /// Builds a failure outcome from a table-scoped error.
    pub fn from_error(error: &IngestError) -> Self {
        Self::Failure {
            kind: error.kind().to_string(),
            reason: format!("{}: {error}", error.kind()),
            validation: error.validation().cloned(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// `"success"` or the failure reason.
    pub fn status(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Failure { reason, .. } => reason,
        }
    }

    /// The error kind of a failure.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failure { kind, .. } => Some(kind),
        }
    }

    /// The validation aggregate attached to a validation failure.
    pub fn validation(&self) -> Option<&ValidationAggregate> {
        match self {
            Self::Failure { validation, .. } => validation.as_ref(),
            Self::Success => None,
        }
    }
}

impl fmt::Display for ExtractionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status())
    }
}

/// Outcomes of every table processed in one run, ordered by table name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionReport {
    outcomes: BTreeMap<String, ExtractionOutcome>,
}

impl ExtractionReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome for a table, replacing any previous one.
    pub fn insert(&mut self, table: impl Into<String>, outcome: ExtractionOutcome) {
        self.outcomes.insert(table.into(), outcome);
    }

    pub fn get(&self, table: &str) -> Option<&ExtractionOutcome> {
        self.outcomes.get(table)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExtractionOutcome)> {
        self.outcomes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names of tables that succeeded.
    pub fn succeeded(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, o)| o.is_success())
            .map(|(t, _)| t)
            .collect()
    }

    /// Tables that failed, with their outcomes.
    pub fn failed(&self) -> Vec<(&str, &ExtractionOutcome)> {
        self.iter().filter(|(_, o)| !o.is_success()).collect()
    }

    /// True when no table failed (vacuously true for an empty run).
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(ExtractionOutcome::is_success)
    }

    /// The plain `table -> "success" | reason` mapping.
    pub fn as_status_map(&self) -> BTreeMap<String, String> {
        self.outcomes
            .iter()
            .map(|(table, outcome)| (table.clone(), outcome.status().to_string()))
            .collect()
    }

    /// Serializes the report as pretty JSON.
    pub fn to_json_pretty(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl FromIterator<(String, ExtractionOutcome)> for ExtractionReport {
    fn from_iter<I: IntoIterator<Item = (String, ExtractionOutcome)>>(iter: I) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}
