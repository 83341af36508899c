//! What to do with a file that failed to import

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::IngestError;

/// Predicate deciding whether a failure should abort the batch
pub type FailurePredicate = Arc<dyn Fn(&IngestError) -> bool + Send + Sync>;

/// Failure handling applied after a file has been journaled as `Error`
#[derive(Clone, Default)]
pub enum ExceptionPolicy {
    /// Log and move on to the next file
    #[default]
    Continue,
    /// Log and abort the rest of the batch
    Rethrow,
    /// Log, then abort only when the predicate returns true
    Callback(FailurePredicate),
}

impl ExceptionPolicy {
    pub fn callback<F>(predicate: F) -> Self
    where
        F: Fn(&IngestError) -> bool + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(predicate))
    }

    /// Log the failure and decide whether it must be re-raised
    pub fn handle(&self, file: &str, err: &IngestError) -> bool {
        match self {
            ExceptionPolicy::Continue => {
                warn!(file = %file, error = %err, "Import failed, continuing with next file");
                false
            },
            ExceptionPolicy::Rethrow => {
                error!(file = %file, error = %err, "Import failed, aborting batch");
                true
            },
            ExceptionPolicy::Callback(predicate) => {
                warn!(file = %file, error = %err, "Import failed");
                predicate(err)
            },
        }
    }
}

impl fmt::Debug for ExceptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionPolicy::Continue => f.write_str("Continue"),
            ExceptionPolicy::Rethrow => f.write_str("Rethrow"),
            ExceptionPolicy::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl FromStr for ExceptionPolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(ExceptionPolicy::Continue),
            "rethrow" | "abort" => Ok(ExceptionPolicy::Rethrow),
            other => Err(IngestError::config(format!(
                "Invalid exception policy '{}', expected 'continue' or 'rethrow'",
                other
            ))),
        }
    }
}
