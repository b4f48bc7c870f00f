//! # Metrics Collector
//!
//! Collects daily health metrics from external services, caches them per day,
//! derives graphs from the merged data and runs these extractions on a
//! schedule or on demand.
//!
//! The crate provides:
//!
//! - **Capability registry**: extract, transform and load components bound
//!   together under a pipeline identifier
//! - **Durable cache**: one JSON document per extract component, merged day by
//!   day and recovered from corruption
//! - **Memoization**: day-scoped cache of rendered graphs with a guard
//!   against duplicate concurrent work
//! - **Scheduler**: cron jobs derived from a persisted configuration file and
//!   hot-reloaded when it changes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use metrics_collector::prelude::*;
//!
//! let registry = Registry::builder()
//!     .register(GarminExtract::registration())
//!     .register(ConcatTransform::registration("HealthTransform", ["health"], ColumnSchema::new()))
//!     .register(HealthGraphs::registration())
//!     .build()?;
//! let orchestrator = Orchestrator::new(Arc::new(registry), Settings::from_env());
//!
//! let extracts = orchestrator.get_extract_objects("health", &params)?;
//! orchestrator.process_dates(&extracts, "1 month ago", "today", None)?;
//! let mut transform = orchestrator.get_transform_object("health", extracts)?;
//! for graph in orchestrator.get_all_graphs("1 month ago", "today", "health", transform.as_mut(), GraphFormat::Png)? {
//!     save(graph?);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod errors;
pub mod extract;
pub mod load;
pub mod memo;
pub mod observability;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod table;
pub mod testing;
pub mod transform;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{load_dotenv, Settings, StallSettings};
    pub use crate::errors::{
        CacheError, ExtractError, LoadError, MetricsError, ParamError, RegistryError,
        ScheduleError, TransformError,
    };
    pub use crate::extract::{DailyMetrics, DayMetrics, Extract, ExtractHandle, Measurement, MetricValue};
    pub use crate::load::{Artifact, GraphFormat, GraphLoader};
    pub use crate::observability::init_tracing;
    pub use crate::orchestrator::{LoggingProgress, Orchestrator, ProgressReporter};
    pub use crate::registry::{
        ComponentKind, ExtractParams, ParamKind, ParamSchema, RawParams, Registration, Registry,
    };
    pub use crate::retry::{retry_blocking, RetryPolicy};
    pub use crate::scheduler::{
        ActionConfig, CronFields, LoggingMailer, Mailer, RunMode, ScheduleConfig, Scheduler,
    };
    pub use crate::table::MetricsTable;
    pub use crate::transform::{ColumnSchema, ConcatTransform, Transform};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn library_compiles() {
        let settings = Settings::default();
        assert_eq!(settings.reload_interval_secs, 10);
        assert_eq!("png".parse::<GraphFormat>(), Ok(GraphFormat::Png));
    }
}
