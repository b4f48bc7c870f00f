//! Transform components: merge extract tables and prepare them for graphs.

mod concat;

pub use concat::ConcatTransform;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::TransformError;
use crate::table::MetricsTable;

/// Default value given to declared columns missing from the table.
pub const MISSING_COLUMN_DEFAULT: f64 = 0.0;

/// A declared column of the merged table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Whether rows may lack a value.
    pub nullable: bool,
}

/// The columns a pipeline expects in its merged table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    columns: Vec<ColumnSpec>,
}

impl ColumnSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, nullable: bool) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            nullable,
        });
        self
    }

    /// Declared columns.
    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Adds every declared column missing from `table`, filled with `default`.
    pub fn add_missing_columns(&self, table: &mut MetricsTable, default: f64) {
        for spec in &self.columns {
            table.add_column(&spec.name, default);
        }
    }

    /// Checks `table` against the declared columns. Extra columns are fine.
    pub fn validate(&self, table: &MetricsTable) -> Result<(), TransformError> {
        for spec in &self.columns {
            if !table.has_column(&spec.name) {
                return Err(TransformError::MissingColumn(spec.name.clone()));
            }
            if !spec.nullable {
                let count = table.null_count(&spec.name);
                if count > 0 {
                    return Err(TransformError::NullValues {
                        column: spec.name.clone(),
                        count,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A transform component built from the extract handles of one pipeline.
pub trait Transform: Send {
    /// Component name.
    fn name(&self) -> &str;

    /// Expected columns of the merged table.
    fn schema(&self) -> &ColumnSchema;

    /// The merged table.
    fn table(&self) -> &MetricsTable;

    /// Mutable access to the merged table.
    fn table_mut(&mut self) -> &mut MetricsTable;

    /// Produces the table for `[from, to]` without altering the merged table.
    fn process_pipeline(&self, from: NaiveDate, to: NaiveDate)
        -> Result<MetricsTable, TransformError>;

    /// Adds missing declared columns, then checks the schema.
    fn validate(&mut self) -> Result<(), TransformError> {
        let schema = self.schema().clone();
        schema.add_missing_columns(self.table_mut(), MISSING_COLUMN_DEFAULT);
        schema.validate(self.table())
    }

    /// Stable identity used in memoization keys.
    fn describe(&self) -> String {
        self.name().to_string()
    }
}
