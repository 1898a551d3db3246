//! Prelude for commonly used types and traits in term-ingest.

pub use crate::config::ExtractionConfig;
pub use crate::core::{IngestContext, IngestContextConfig};
pub use crate::error::{IngestError, Result};
pub use crate::logging::setup::LoggingConfig;
pub use crate::run_log::{LogStatus, RunLogger};
