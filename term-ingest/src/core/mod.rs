//! Core types shared by every pipeline stage.
//!
//! - **[`ValidationResult`] / [`ValidationAggregate`]**: one check outcome and
//!   the ordered batch of them produced for a table
//! - **[`TableState`]**: the per-table pipeline state machine
//! - **[`ExtractionOutcome`] / [`ExtractionReport`]**: what a run returns
//! - **[`IngestContext`]**: the DataFusion session a table pipeline works in

mod context;
mod outcome;
mod result;

pub use context::{IngestContext, IngestContextConfig};
pub use outcome::{ExtractionOutcome, ExtractionReport, TableState};
pub use result::{ValidationAggregate, ValidationResult};
