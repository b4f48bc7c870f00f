//! Fake components for testing.

use chrono::NaiveDate;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::errors::{ExtractError, LoadError, ProgressError};
use crate::extract::{DailyMetrics, Extract};
use crate::load::GraphLoader;
use crate::orchestrator::ProgressReporter;
use crate::registry::{ExtractParams, ParamSchema, Registration};
use crate::table::MetricsTable;
use crate::utils::format_day;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// An extract that serves days from a fixed document and records every
/// provider call. Clones share the record.
#[derive(Debug, Clone)]
pub struct StaticExtract {
    document: Arc<DailyMetrics>,
    requested: Arc<Mutex<Vec<String>>>,
    failure: Option<ExtractError>,
}

impl StaticExtract {
    /// Serves `document`.
    #[must_use]
    pub fn new(document: DailyMetrics) -> Self {
        Self {
            document: Arc::new(document),
            requested: Arc::new(Mutex::new(Vec::new())),
            failure: None,
        }
    }

    /// Makes every provider call fail with `error`.
    #[must_use]
    pub fn failing_with(mut self, error: ExtractError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Number of provider calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requested.lock().len()
    }

    /// Days requested from the provider, in call order.
    #[must_use]
    pub fn requested_days(&self) -> Vec<String> {
        self.requested.lock().clone()
    }

    /// A registration that hands out clones of this extract.
    #[must_use]
    pub fn into_registration_with_schema(
        self,
        name: impl Into<String>,
        pipelines: impl IntoIterator<Item = impl Into<String>>,
        schema: ParamSchema,
    ) -> Registration {
        Registration::extract(
            name,
            pipelines,
            schema,
            Arc::new(move |_: &ExtractParams| {
                let source: Arc<dyn Extract> = Arc::new(self.clone());
                Ok::<_, ExtractError>(source)
            }),
        )
    }

    /// A registration with an empty parameter schema.
    #[must_use]
    pub fn into_registration(
        self,
        name: impl Into<String>,
        pipelines: impl IntoIterator<Item = impl Into<String>>,
    ) -> Registration {
        self.into_registration_with_schema(name, pipelines, ParamSchema::new())
    }

    /// Shorthand for `StaticExtract::new(document).into_registration(..)`.
    #[must_use]
    pub fn registration(
        name: impl Into<String>,
        pipelines: impl IntoIterator<Item = impl Into<String>>,
        document: DailyMetrics,
    ) -> Registration {
        Self::new(document).into_registration(name, pipelines)
    }
}

impl Extract for StaticExtract {
    fn get_data_from_service(&self, day: NaiveDate) -> Result<DailyMetrics, ExtractError> {
        let key = format_day(day);
        self.requested.lock().push(key.clone());
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(self
            .document
            .get(&key)
            .map(|metrics| DailyMetrics::from([(key, metrics.clone())]))
            .unwrap_or_default())
    }
}

/// A progress reporter that records every update.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<f64>>,
}

impl RecordingProgress {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded updates.
    #[must_use]
    pub fn updates(&self) -> Vec<f64> {
        self.updates.lock().clone()
    }
}

impl ProgressReporter for RecordingProgress {
    fn update(&self, progress: f64) -> Result<(), ProgressError> {
        self.updates.lock().push(progress);
        Ok(())
    }
}

/// A progress reporter whose every update fails, like a closed UI session.
#[derive(Debug, Default)]
pub struct FailingProgress {
    attempts: Mutex<usize>,
}

impl FailingProgress {
    /// Creates a failing reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of updates attempted.
    #[must_use]
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

impl ProgressReporter for FailingProgress {
    fn update(&self, _progress: f64) -> Result<(), ProgressError> {
        *self.attempts.lock() += 1;
        Err(ProgressError("session disconnected".to_string()))
    }
}

/// A graph loader producing small placeholder documents.
#[derive(Debug, Clone)]
pub struct StaticGraphLoader {
    table: MetricsTable,
    names: Vec<String>,
}

impl StaticGraphLoader {
    /// Draws `names` from `table`.
    #[must_use]
    pub fn new(table: MetricsTable, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            table,
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// A registration drawing `graph_names`.
    #[must_use]
    pub fn registration(
        name: impl Into<String>,
        pipelines: impl IntoIterator<Item = impl Into<String>>,
        graph_names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Registration {
        let graph_names: Vec<String> = graph_names.into_iter().map(Into::into).collect();
        let names = graph_names.clone();
        Registration::load(
            name,
            pipelines,
            graph_names,
            Arc::new(move |table: MetricsTable| {
                let loader: Box<dyn GraphLoader> = Box::new(Self::new(table, names.clone()));
                Ok::<_, LoadError>(loader)
            }),
        )
    }

    fn check(&self, graph: &str) -> Result<(), LoadError> {
        if self.names.iter().any(|n| n == graph) {
            Ok(())
        } else {
            Err(LoadError::Render {
                graph: graph.to_string(),
                reason: "no such graph".to_string(),
            })
        }
    }
}

impl GraphLoader for StaticGraphLoader {
    fn graph_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn table(&self) -> &MetricsTable {
        &self.table
    }

    fn to_html(&self, graph: &str) -> Result<Vec<u8>, LoadError> {
        self.check(graph)?;
        let columns: Vec<_> = self.table.columns().collect();
        Ok(format!(
            "<html><body><h1>{graph}</h1><p>{} rows: {}</p></body></html>",
            self.table.len(),
            columns.join(", ")
        )
        .into_bytes())
    }

    fn to_png(&self, graph: &str) -> Result<Vec<u8>, LoadError> {
        self.check(graph)?;
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(graph.as_bytes());
        Ok(bytes)
    }
}
