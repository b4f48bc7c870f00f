//! Extract components and their durable per-day cache.
//!
//! An [`Extract`] implementation only knows how to fetch one day of metrics
//! from its service. [`ExtractHandle`] wraps it with the durable cache and the
//! parameter memory, so the provider is called at most once per cached day.

mod cache;
mod frame;
mod memory;

pub use cache::{merge_documents, pop_existing_entries, DurableCache};
pub use frame::{to_table, Reducer};
pub use memory::ParamMemory;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::{ExtractError, MetricsError};
use crate::registry::ExtractParams;
use crate::table::MetricsTable;
use crate::utils::format_day;

/// The value of one metric on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// A single number.
    Scalar(f64),
    /// Several samples; `null` entries are kept as `None`.
    List(Vec<Option<f64>>),
}

/// A metric value together with its unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// The value.
    pub value: MetricValue,
    /// The unit, e.g. `meter` or `bpm`.
    #[serde(default)]
    pub unit: String,
}

impl Measurement {
    /// A scalar measurement.
    #[must_use]
    pub fn scalar(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value: MetricValue::Scalar(value),
            unit: unit.into(),
        }
    }

    /// A list measurement.
    #[must_use]
    pub fn list(values: impl IntoIterator<Item = f64>, unit: impl Into<String>) -> Self {
        Self {
            value: MetricValue::List(values.into_iter().map(Some).collect()),
            unit: unit.into(),
        }
    }
}

/// Metrics of a single day, keyed by metric name.
pub type DayMetrics = BTreeMap<String, Measurement>;

/// The Daily Metrics Document: ISO day to that day's metrics.
pub type DailyMetrics = BTreeMap<String, DayMetrics>;

/// An extract component: fetches metrics for one day from an external
/// service.
///
/// Implementations may block; callers run them off the async runtime.
pub trait Extract: Send + Sync {
    /// Fetches the metrics of `day`.
    ///
    /// The returned document should contain at most `day`. Transient failures
    /// should be retried inside the implementation, see
    /// [`retry_blocking`](crate::retry::retry_blocking).
    fn get_data_from_service(&self, day: NaiveDate) -> Result<DailyMetrics, ExtractError>;

    /// Reducers applied to list-valued metrics in the tabular view.
    fn reducers(&self) -> Vec<Reducer> {
        Reducer::ALL.to_vec()
    }
}

/// A constructed extract component bound to its cache and parameter memory.
#[derive(Clone)]
pub struct ExtractHandle {
    name: String,
    pipelines: Vec<String>,
    params: ExtractParams,
    source: Arc<dyn Extract>,
    cache: DurableCache,
    memory: ParamMemory,
}

impl fmt::Debug for ExtractHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractHandle")
            .field("name", &self.name)
            .field("pipelines", &self.pipelines)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ExtractHandle {
    /// Binds `source` to the cache file and parameter memory under `settings`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pipelines: Vec<String>,
        params: ExtractParams,
        source: Arc<dyn Extract>,
        settings: &Settings,
    ) -> Self {
        let name = name.into();
        Self {
            cache: DurableCache::new(settings.cache_file(&name)),
            memory: ParamMemory::new(settings.params_file()),
            name,
            pipelines,
            params,
            source,
        }
    }

    /// Component name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipelines this component serves.
    #[must_use]
    pub fn pipelines(&self) -> &[String] {
        &self.pipelines
    }

    /// The parameters the component was built with.
    #[must_use]
    pub fn params(&self) -> &ExtractParams {
        &self.params
    }

    /// The durable cache.
    #[must_use]
    pub fn cache(&self) -> &DurableCache {
        &self.cache
    }

    /// Returns the metrics of `day`, fetching and caching them on a miss.
    ///
    /// A fetched day is cached even when the provider reports no metrics for
    /// it, so the provider is asked at most once per day.
    pub fn get_data(&self, day: NaiveDate) -> Result<DayMetrics, MetricsError> {
        let key = format_day(day);

        if let Err(e) = self.memory.store(&self.pipelines, &self.params.to_raw()) {
            warn!(component = %self.name, error = %e, "Failed to store parameters");
        }

        if let Some(cached) = self.cache.read_day(&key) {
            debug!(component = %self.name, day = %key, "Cache hit");
            return Ok(cached);
        }

        info!(component = %self.name, day = %key, "Fetching from service");
        let mut fetched = self.source.get_data_from_service(day)?;
        fetched.entry(key.clone()).or_default();
        let result = fetched.get(&key).cloned().unwrap_or_default();
        self.cache.merge_write(fetched)?;
        Ok(result)
    }

    /// Flattens the cached document, or `document` when given, into a table.
    pub fn to_table(&self, document: Option<&DailyMetrics>) -> MetricsTable {
        let reducers = self.source.reducers();
        match document {
            Some(doc) => to_table(doc, &reducers),
            None => to_table(&self.cache.read_all().unwrap_or_default(), &reducers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_document, StaticExtract};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn handle(dir: &TempDir, extract: &StaticExtract) -> ExtractHandle {
        let settings = Settings::default().with_data_dir(dir.path());
        ExtractHandle::new(
            "Garmin",
            vec!["health".to_string()],
            ExtractParams::default(),
            Arc::new(extract.clone()),
            &settings,
        )
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_cache_hit_skips_provider() {
        let dir = TempDir::new().unwrap();
        let extract = StaticExtract::new(sample_document());
        let handle = handle(&dir, &extract);

        let first = handle.get_data(day("2022-01-01")).unwrap();
        let second = handle.get_data(day("2022-01-01")).unwrap();

        assert_eq!(first, second);
        assert_eq!(first["running"], Measurement::scalar(300.0, "meter"));
        assert_eq!(extract.calls(), 1);
    }

    #[test]
    fn test_empty_day_is_cached() {
        let dir = TempDir::new().unwrap();
        let extract = StaticExtract::new(sample_document());
        let handle = handle(&dir, &extract);

        assert!(handle.get_data(day("2022-01-02")).unwrap().is_empty());
        assert!(handle.get_data(day("2022-01-02")).unwrap().is_empty());
        assert_eq!(extract.calls(), 1);
    }

    #[test]
    fn test_corrupt_cache_is_backed_up_and_refetched() {
        let dir = TempDir::new().unwrap();
        let extract = StaticExtract::new(sample_document());
        let handle = handle(&dir, &extract);
        std::fs::write(handle.cache().path(), "{ not json").unwrap();

        let metrics = handle.get_data(day("2022-01-01")).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(extract.calls(), 1);

        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
            .count();
        assert_eq!(backups, 1);
        assert!(handle.cache().read_all().is_some());
    }

    #[test]
    fn test_provider_error_propagates_and_caches_nothing() {
        let dir = TempDir::new().unwrap();
        let extract = StaticExtract::new(sample_document()).failing_with(ExtractError::failed("garmin", "down"));
        let handle = handle(&dir, &extract);

        let err = handle.get_data(day("2022-01-01")).unwrap_err();
        assert!(matches!(err, MetricsError::Extract(_)));
        assert!(handle.cache().read_all().is_none());
    }

    #[test]
    fn test_to_table_from_cache() {
        let dir = TempDir::new().unwrap();
        let extract = StaticExtract::new(sample_document());
        let handle = handle(&dir, &extract);
        handle.get_data(day("2022-01-01")).unwrap();

        let table = handle.to_table(None);
        assert_eq!(table.get(day("2022-01-01"), "running_meter"), Some(300.0));
        assert_eq!(table.get(day("2022-01-01"), "walking_meter"), Some(150.0));
    }
}
