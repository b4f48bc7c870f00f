//! A small day-indexed numeric table.
//!
//! Extract components flatten their cached documents into a [`MetricsTable`];
//! transforms concatenate, aggregate and filter these tables before graphs are
//! drawn from them. Missing cells are simply absent from a row.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One row of a [`MetricsTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// The day this row describes.
    pub date: NaiveDate,
    /// Column values present on this row.
    pub values: BTreeMap<String, f64>,
}

impl Row {
    /// Creates a row.
    #[must_use]
    pub fn new(date: NaiveDate, values: BTreeMap<String, f64>) -> Self {
        Self { date, values }
    }
}

/// Time resolution used when resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Calendar weeks, labelled by their closing Sunday.
    Week,
    /// Calendar months, labelled by their last day.
    Month,
}

impl Resolution {
    fn label(self, day: NaiveDate) -> NaiveDate {
        match self {
            Self::Week => {
                let to_sunday = 6 - u64::from(day.weekday().num_days_from_monday());
                day.checked_add_days(Days::new(to_sunday)).unwrap_or(day)
            }
            Self::Month => {
                let (year, month) = if day.month() == 12 {
                    (day.year() + 1, 1)
                } else {
                    (day.year(), day.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .and_then(|first| first.pred_opt())
                    .unwrap_or(day)
            }
        }
    }
}

/// Day-indexed table of numeric columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsTable {
    columns: BTreeSet<String>,
    rows: Vec<Row>,
}

impl MetricsTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from rows, collecting their columns.
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut table = Self::new();
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Appends a row.
    pub fn push_row(&mut self, row: Row) {
        self.columns.extend(row.values.keys().cloned());
        self.rows.push(row);
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in sorted order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    /// True when the column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// The rows, in their current order.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Row dates, in row order.
    #[must_use]
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    /// The value of `column` on the first row dated `date`.
    #[must_use]
    pub fn get(&self, date: NaiveDate, column: &str) -> Option<f64> {
        self.rows
            .iter()
            .find(|r| r.date == date)
            .and_then(|r| r.values.get(column).copied())
    }

    /// All cells of a column, `None` where a row lacks it.
    #[must_use]
    pub fn column_values(&self, column: &str) -> Vec<Option<f64>> {
        self.rows.iter().map(|r| r.values.get(column).copied()).collect()
    }

    /// Number of rows lacking a value for `column`.
    #[must_use]
    pub fn null_count(&self, column: &str) -> usize {
        self.rows.iter().filter(|r| !r.values.contains_key(column)).count()
    }

    /// Replaces a column; `values` is aligned with the rows.
    pub fn set_column(&mut self, column: &str, values: &[Option<f64>]) {
        self.columns.insert(column.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            match value {
                Some(v) => {
                    row.values.insert(column.to_string(), *v);
                }
                None => {
                    row.values.remove(column);
                }
            }
        }
    }

    /// Adds `column` filled with `default` unless it already exists.
    pub fn add_column(&mut self, column: &str, default: f64) {
        if self.has_column(column) {
            return;
        }
        self.columns.insert(column.to_string());
        for row in &mut self.rows {
            row.values.insert(column.to_string(), default);
        }
    }

    /// Stacks tables on top of each other, keeping every row.
    #[must_use]
    pub fn concat(tables: impl IntoIterator<Item = Self>) -> Self {
        let mut result = Self::new();
        for table in tables {
            result.columns.extend(table.columns);
            result.rows.extend(table.rows);
        }
        result
    }

    /// Sorts rows by date, keeping the relative order of equal dates.
    pub fn sort_by_date(&mut self) {
        self.rows.sort_by_key(|r| r.date);
    }

    /// Collapses rows sharing a date, keeping the first value seen per column.
    ///
    /// The result is sorted by date.
    pub fn aggregate_first(&mut self) {
        let mut merged: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
        for row in self.rows.drain(..) {
            let target = merged.entry(row.date).or_default();
            for (column, value) in row.values {
                target.entry(column).or_insert(value);
            }
        }
        self.rows = merged
            .into_iter()
            .map(|(date, values)| Row::new(date, values))
            .collect();
    }

    /// Keeps rows strictly between `from` and `to`.
    pub fn filter_period(&mut self, from: NaiveDate, to: NaiveDate) {
        self.rows.retain(|r| from < r.date && r.date < to);
    }

    /// Fills gaps of a column by linear interpolation between known values,
    /// back-filling leading gaps. Values equal to `missing` count as gaps.
    pub fn interpolate_backward(&mut self, column: &str, missing: Option<f64>) {
        let mut values = self.column_values(column);
        if let Some(marker) = missing {
            for v in &mut values {
                if v.is_some_and(|x| (x - marker).abs() < f64::EPSILON) {
                    *v = None;
                }
            }
        }

        let known: Vec<(usize, f64)> = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|x| (i, x)))
            .collect();
        let Some(&(first_idx, first_val)) = known.first() else {
            self.set_column(column, &values);
            return;
        };

        for v in values.iter_mut().take(first_idx) {
            *v = Some(first_val);
        }
        for pair in known.windows(2) {
            let (i0, v0) = pair[0];
            let (i1, v1) = pair[1];
            let span = (i1 - i0) as f64;
            for (offset, v) in values.iter_mut().enumerate().take(i1).skip(i0 + 1) {
                let t = (offset - i0) as f64 / span;
                *v = Some(v0 + (v1 - v0) * t);
            }
        }
        self.set_column(column, &values);
    }

    /// Sums every column per period, labelling rows by period end.
    #[must_use]
    pub fn resample_sum(&self, resolution: Resolution) -> Self {
        let mut buckets: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
        for row in &self.rows {
            let bucket = buckets.entry(resolution.label(row.date)).or_default();
            for (column, value) in &row.values {
                *bucket.entry(column.clone()).or_insert(0.0) += value;
            }
        }
        let mut result = Self::from_rows(
            buckets
                .into_iter()
                .map(|(date, values)| Row::new(date, values))
                .collect(),
        );
        result.columns.extend(self.columns.iter().cloned());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn row(date: &str, cells: &[(&str, f64)]) -> Row {
        Row::new(
            day(date),
            cells.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
        )
    }

    #[test]
    fn test_concat_and_aggregate_keeps_first_values() {
        let a = MetricsTable::from_rows(vec![row("2022-01-02", &[("running", 1.0)])]);
        let b = MetricsTable::from_rows(vec![
            row("2022-01-02", &[("running", 9.0), ("weight", 80.0)]),
            row("2022-01-01", &[("weight", 81.0)]),
        ]);
        let mut table = MetricsTable::concat([a, b]);
        assert_eq!(table.len(), 3);

        table.aggregate_first();
        assert_eq!(table.dates(), vec![day("2022-01-01"), day("2022-01-02")]);
        assert_eq!(table.get(day("2022-01-02"), "running"), Some(1.0));
        assert_eq!(table.get(day("2022-01-02"), "weight"), Some(80.0));
        assert_eq!(table.columns().collect::<Vec<_>>(), vec!["running", "weight"]);
    }

    #[test]
    fn test_filter_period_is_exclusive() {
        let mut table = MetricsTable::from_rows(vec![
            row("2022-01-02", &[("a", 1.0)]),
            row("2022-01-03", &[("a", 2.0)]),
            row("2022-01-05", &[("a", 3.0)]),
        ]);
        table.filter_period(day("2022-01-02"), day("2022-01-05"));
        assert_eq!(table.dates(), vec![day("2022-01-03")]);
    }

    #[test]
    fn test_add_column_only_when_missing() {
        let mut table = MetricsTable::from_rows(vec![row("2022-01-01", &[("a", 1.0)])]);
        table.add_column("a", 0.0);
        table.add_column("b", 0.0);
        assert_eq!(table.get(day("2022-01-01"), "a"), Some(1.0));
        assert_eq!(table.get(day("2022-01-01"), "b"), Some(0.0));
    }

    #[test]
    fn test_interpolate_backward() {
        let mut table = MetricsTable::from_rows(vec![
            row("2022-01-01", &[]),
            row("2022-01-02", &[("w", 80.0)]),
            row("2022-01-03", &[("w", 0.0)]),
            row("2022-01-04", &[("w", 84.0)]),
            row("2022-01-05", &[]),
        ]);
        table.interpolate_backward("w", Some(0.0));
        assert_eq!(
            table.column_values("w"),
            vec![Some(80.0), Some(80.0), Some(82.0), Some(84.0), None]
        );
    }

    #[test]
    fn test_resample_weekly_sum() {
        // 2022-01-03 is a Monday; that week closes on 2022-01-09.
        let table = MetricsTable::from_rows(vec![
            row("2022-01-03", &[("km", 1.0)]),
            row("2022-01-09", &[("km", 2.0)]),
            row("2022-01-10", &[("km", 4.0)]),
        ]);
        let weekly = table.resample_sum(Resolution::Week);
        assert_eq!(weekly.dates(), vec![day("2022-01-09"), day("2022-01-16")]);
        assert_eq!(weekly.column_values("km"), vec![Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_resample_monthly_labels_month_end() {
        let table = MetricsTable::from_rows(vec![
            row("2022-12-05", &[("km", 1.0)]),
            row("2022-12-31", &[("km", 1.5)]),
        ]);
        let monthly = table.resample_sum(Resolution::Month);
        assert_eq!(monthly.dates(), vec![day("2022-12-31")]);
        assert_eq!(monthly.get(day("2022-12-31"), "km"), Some(2.5));
    }

    #[test]
    fn test_null_count() {
        let table = MetricsTable::from_rows(vec![
            row("2022-01-01", &[("a", 1.0)]),
            row("2022-01-02", &[("b", 1.0)]),
        ]);
        assert_eq!(table.null_count("a"), 1);
        assert_eq!(table.null_count("c"), 2);
    }
}
