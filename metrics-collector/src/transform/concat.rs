//! Generic transform: concatenate, collapse per day, filter to the period.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

use super::{ColumnSchema, Transform};
use crate::errors::TransformError;
use crate::extract::ExtractHandle;
use crate::registry::{Registration, TransformFactory};
use crate::table::MetricsTable;

/// Concatenates the tables of every extract handle and keeps, per day, the
/// first value seen for each column.
#[derive(Debug, Clone)]
pub struct ConcatTransform {
    name: String,
    sources: Vec<String>,
    schema: ColumnSchema,
    table: MetricsTable,
}

impl ConcatTransform {
    /// Builds the merged table from `extracts`, in their order.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: ColumnSchema, extracts: &[ExtractHandle]) -> Self {
        let table = MetricsTable::concat(extracts.iter().map(|e| e.to_table(None)));
        let name = name.into();
        debug!(transform = %name, rows = table.len(), "Merged extract tables");
        Self {
            name,
            sources: extracts.iter().map(|e| e.name().to_string()).collect(),
            schema,
            table,
        }
    }

    /// A factory building this transform.
    #[must_use]
    pub fn factory(name: impl Into<String>, schema: ColumnSchema) -> TransformFactory {
        let name = name.into();
        Arc::new(move |extracts: Vec<ExtractHandle>| {
            let transform: Box<dyn Transform> =
                Box::new(Self::new(name.clone(), schema.clone(), &extracts));
            Ok(transform)
        })
    }

    /// A registration for this transform.
    #[must_use]
    pub fn registration(
        name: impl Into<String>,
        pipelines: impl IntoIterator<Item = impl Into<String>>,
        schema: ColumnSchema,
    ) -> Registration {
        let name = name.into();
        Registration::transform(name.clone(), pipelines, Self::factory(name, schema))
    }
}

impl Transform for ConcatTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    fn table(&self) -> &MetricsTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut MetricsTable {
        &mut self.table
    }

    fn process_pipeline(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<MetricsTable, TransformError> {
        let mut table = self.table.clone();
        table.sort_by_date();
        table.aggregate_first();
        table.filter_period(from, to);
        Ok(table)
    }

    fn describe(&self) -> String {
        format!("{}({})", self.name, self.sources.join(", "))
    }
}
