//! Flattening of Daily Metrics Documents into tables.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use super::{DailyMetrics, MetricValue};
use crate::table::{MetricsTable, Row};
use crate::utils::DAY_FORMAT;

/// Reduces a multi-sample metric to one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    /// Largest sample.
    Max,
    /// Smallest sample.
    Min,
    /// Arithmetic mean.
    Mean,
    /// Sum of samples.
    Sum,
}

impl Reducer {
    /// Every reducer, in column order.
    pub const ALL: [Self; 4] = [Self::Max, Self::Min, Self::Mean, Self::Sum];

    /// Applies the reducer. Fails on an empty list or a missing sample.
    #[must_use]
    pub fn apply(self, values: &[Option<f64>]) -> Option<f64> {
        let samples: Vec<f64> = values.iter().copied().collect::<Option<_>>()?;
        if samples.is_empty() {
            return None;
        }
        Some(match self {
            Self::Max => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
            #[allow(clippy::cast_precision_loss)]
            Self::Mean => samples.iter().sum::<f64>() / samples.len() as f64,
            Self::Sum => samples.iter().sum(),
        })
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Max => write!(f, "max"),
            Self::Min => write!(f, "min"),
            Self::Mean => write!(f, "mean"),
            Self::Sum => write!(f, "sum"),
        }
    }
}

/// Converts a document into a day-indexed table.
///
/// Scalars become `{metric}_{unit}`. A one-sample list collapses to the same
/// column. Longer lists fan out to `{metric}_{unit}_{reducer}` per reducer;
/// a reducer that cannot handle the samples is skipped.
#[must_use]
pub fn to_table(document: &DailyMetrics, reducers: &[Reducer]) -> MetricsTable {
    let mut table = MetricsTable::new();
    for (day, metrics) in document {
        let Ok(date) = NaiveDate::parse_from_str(day, DAY_FORMAT) else {
            warn!(day = %day, "Skipping undated cache entry");
            continue;
        };

        let mut values = BTreeMap::new();
        for (metric, measurement) in metrics {
            let column = format!("{metric}_{}", measurement.unit);
            match &measurement.value {
                MetricValue::Scalar(v) => {
                    values.insert(column, *v);
                }
                MetricValue::List(samples) if samples.len() == 1 => {
                    if let Some(v) = samples[0] {
                        values.insert(column, v);
                    }
                }
                MetricValue::List(samples) => {
                    for reducer in reducers {
                        if let Some(v) = reducer.apply(samples) {
                            values.insert(format!("{column}_{reducer}"), v);
                        }
                    }
                }
            }
        }

        if !values.is_empty() {
            table.push_row(Row::new(date, values));
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Measurement;
    use pretty_assertions::assert_eq;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DAY_FORMAT).unwrap()
    }

    #[test]
    fn test_list_fans_out_per_reducer() {
        let mut doc = DailyMetrics::new();
        doc.entry("2022-01-01".into())
            .or_default()
            .insert("heart_rate".into(), Measurement::list([60.0, 80.0, 70.0], "bpm"));

        let table = to_table(&doc, &Reducer::ALL);
        let d = day("2022-01-01");
        assert_eq!(table.get(d, "heart_rate_bpm_max"), Some(80.0));
        assert_eq!(table.get(d, "heart_rate_bpm_min"), Some(60.0));
        assert_eq!(table.get(d, "heart_rate_bpm_mean"), Some(70.0));
        assert_eq!(table.get(d, "heart_rate_bpm_sum"), Some(210.0));
        assert!(!table.has_column("heart_rate_bpm"));
    }

    #[test]
    fn test_single_sample_collapses() {
        let mut doc = DailyMetrics::new();
        doc.entry("2022-01-01".into())
            .or_default()
            .insert("weight".into(), Measurement::list([80.5], "kg"));
        let table = to_table(&doc, &Reducer::ALL);
        assert_eq!(table.columns().collect::<Vec<_>>(), vec!["weight_kg"]);
    }

    #[test]
    fn test_missing_sample_skips_reducers() {
        let mut doc = DailyMetrics::new();
        let metrics = doc.entry("2022-01-01".into()).or_default();
        metrics.insert(
            "hr".into(),
            Measurement {
                value: MetricValue::List(vec![Some(1.0), None]),
                unit: "bpm".into(),
            },
        );
        metrics.insert("steps".into(), Measurement::scalar(10.0, "count"));

        let table = to_table(&doc, &Reducer::ALL);
        assert_eq!(table.columns().collect::<Vec<_>>(), vec!["steps_count"]);
    }

    #[test]
    fn test_rows_follow_day_order_and_skip_empty_days() {
        let mut doc = DailyMetrics::new();
        doc.entry("2022-01-03".into())
            .or_default()
            .insert("running".into(), Measurement::scalar(1.0, "meter"));
        doc.entry("2022-01-02".into()).or_default();
        doc.entry("2022-01-01".into())
            .or_default()
            .insert("running".into(), Measurement::scalar(2.0, "meter"));

        let table = to_table(&doc, &[Reducer::Max]);
        assert_eq!(table.dates(), vec![day("2022-01-01"), day("2022-01-03")]);
    }

    #[test]
    fn test_reducer_apply() {
        assert_eq!(Reducer::Mean.apply(&[]), None);
        assert_eq!(Reducer::Sum.apply(&[Some(1.0), Some(2.5)]), Some(3.5));
    }
}
