//! Error types for the metrics collector.
//!
//! Each concern owns a focused error enum; [`MetricsError`] aggregates them so
//! orchestration code can propagate any of them with `?`.

use std::path::PathBuf;
use thiserror::Error;

use crate::registry::{ComponentKind, ParamKind};

/// Convenience alias used across the crate.
pub type Result<T, E = MetricsError> = std::result::Result<T, E>;

/// The main error type for metrics collector operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// An extract parameter was missing or malformed.
    #[error("{0}")]
    Param(#[from] ParamError),

    /// A pipeline could not be resolved to its components.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// An external service failed to deliver metrics.
    #[error("{0}")]
    Extract(#[from] ExtractError),

    /// A file-backed cache could not be read or written.
    #[error("{0}")]
    Cache(#[from] CacheError),

    /// The merged table failed validation or processing.
    #[error("{0}")]
    Transform(#[from] TransformError),

    /// A graph could not be produced.
    #[error("{0}")]
    Load(#[from] LoadError),

    /// A schedule could not be validated, stored or run.
    #[error("{0}")]
    Schedule(#[from] ScheduleError),

    /// A date or period expression could not be understood.
    #[error("{0}")]
    Date(#[from] DateError),
}

/// Errors raised while building typed extract parameters from a raw map.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParamError {
    /// A required field was absent from the supplied map.
    #[error("missing required parameter '{field}' for {component}")]
    Missing {
        /// The extract component requesting the field.
        component: String,
        /// The missing field.
        field: String,
    },

    /// A field was present but could not be read as the declared kind.
    #[error("parameter '{field}' for {component} should be {expected}, got {found}")]
    InvalidType {
        /// The extract component requesting the field.
        component: String,
        /// The offending field.
        field: String,
        /// The declared kind.
        expected: ParamKind,
        /// A rendering of the supplied value.
        found: String,
    },
}

/// Errors raised when resolving or registering pipeline components.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No component of the requested kind exists for the pipeline.
    #[error("no {kind} component registered for pipeline '{pipeline}'")]
    NotRegistered {
        /// The pipeline identifier.
        pipeline: String,
        /// The requested capability.
        kind: ComponentKind,
    },

    /// A component was registered without any pipeline identifier.
    #[error("component '{name}' declares no pipeline identifier")]
    NoPipeline {
        /// The component name.
        name: String,
    },

    /// A pipeline has more than one transform or load component.
    #[error("pipeline '{pipeline}' already has {kind} component '{first}', cannot add '{second}'")]
    DuplicateComponent {
        /// The pipeline identifier.
        pipeline: String,
        /// The duplicated capability.
        kind: ComponentKind,
        /// The component registered first.
        first: String,
        /// The rejected component.
        second: String,
    },
}

/// Errors raised by extract components talking to external services.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    /// A failure worth retrying (connectivity, throttling, login hiccups).
    #[error("transient failure from {service}: {reason}")]
    Transient {
        /// The service name.
        service: String,
        /// What went wrong.
        reason: String,
    },

    /// A failure that retrying will not fix.
    #[error("extraction from {service} failed: {reason}")]
    Failed {
        /// The service name.
        service: String,
        /// What went wrong.
        reason: String,
    },
}

impl ExtractError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn failed(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the operation may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors raised by the durable cache, parameter memory and memoization store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem access failed.
    #[error("cache I/O error on {}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A value could not be serialized or deserialized.
    #[error("cache serialization error: {0}")]
    Serialization(String),

    /// Compressed payload could not be encoded or decoded.
    #[error("cache compression error: {0}")]
    Compression(String),
}

impl CacheError {
    /// Wraps an I/O error with the path it concerns.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised while validating or processing the merged table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    /// A declared column is missing.
    #[error("column '{0}' is missing from the table")]
    MissingColumn(String),

    /// A non-nullable column holds missing values.
    #[error("column '{column}' has {count} missing values but is not nullable")]
    NullValues {
        /// The column.
        column: String,
        /// Number of missing cells.
        count: usize,
    },

    /// A processing step failed.
    #[error("transform failed: {0}")]
    Processing(String),
}

/// Errors raised while producing graph artifacts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// The requested graph does not exist for the pipeline.
    #[error("graph '{graph}' is not provided by pipeline '{pipeline}'")]
    UnknownGraph {
        /// The pipeline identifier.
        pipeline: String,
        /// The requested graph.
        graph: String,
    },

    /// The requested artifact format is not supported.
    #[error("unsupported graph format '{0}'")]
    UnsupportedFormat(String),

    /// Rendering failed.
    #[error("rendering graph '{graph}' failed: {reason}")]
    Render {
        /// The graph.
        graph: String,
        /// What went wrong.
        reason: String,
    },
}

/// Errors raised by the scheduler and its persisted configuration.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Cron fields were rejected by the trigger parser.
    #[error("invalid schedule '{fields}': {reason}")]
    InvalidCron {
        /// Human rendering of the offending fields.
        fields: String,
        /// Parser message.
        reason: String,
    },

    /// Trigger options could not be turned into a trigger.
    #[error("invalid {kind} trigger: {reason}")]
    InvalidTrigger {
        /// The trigger kind.
        kind: String,
        /// What went wrong.
        reason: String,
    },

    /// The persisted configuration file is not valid JSON of the expected shape.
    #[error("malformed schedule configuration {}: {reason}", path.display())]
    MalformedConfig {
        /// The configuration file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// A dotted task reference did not resolve to a registered callable.
    #[error("no task registered as '{0}'")]
    UnknownTask(String),

    /// A schedule index was outside the persisted list.
    #[error("schedule index {index} out of range (have {len})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of stored schedules.
        len: usize,
    },

    /// Another scheduler instance is alive in this process.
    #[error("a scheduler instance already exists in this process")]
    AlreadyExists,

    /// The scheduler was started twice.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// The scheduler runtime could not be created.
    #[error("scheduler runtime error: {0}")]
    Runtime(String),

    /// Reading or writing the configuration file failed.
    #[error("{0}")]
    Cache(#[from] CacheError),
}

/// Errors raised while interpreting dates and periods.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DateError {
    /// Neither a calendar date nor a supported relative expression.
    #[error("cannot interpret '{0}' as a date")]
    Unparseable(String),
}

/// Raised by a progress reporter that could not record progress.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("progress update failed: {0}")]
pub struct ProgressError(pub String);

/// Raised by a mailer that could not deliver a message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);
