//! Progress reporting for long extraction runs.

use crate::errors::ProgressError;

/// Receives the completed fraction of an extraction run.
///
/// Failures are logged by the caller and never abort the run.
#[cfg_attr(test, mockall::automock)]
pub trait ProgressReporter: Send + Sync {
    /// Records progress in `[0, 1]`.
    fn update(&self, progress: f64) -> Result<(), ProgressError>;
}

/// Reporter that logs progress at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProgress;

impl ProgressReporter for LoggingProgress {
    fn update(&self, progress: f64) -> Result<(), ProgressError> {
        tracing::debug!(progress, "Extraction progress");
        Ok(())
    }
}
