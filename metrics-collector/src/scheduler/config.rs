//! Persisted schedule configuration.
//!
//! The configuration file is a JSON array of [`ScheduleConfig`] records and is
//! the only source of truth for the scheduled jobs. Field names match the
//! on-disk format (`dag_name`, `from_`, `to_`, `schedule_params`,
//! `action_type`, `action_data`).

use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::errors::{CacheError, ScheduleError};
use crate::registry::RawParams;
use crate::utils::{path_lock, write_atomic};

/// One cron field: a number or an expression such as `*/5` or `mon-fri`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CronValue {
    /// A literal value.
    Number(u32),
    /// A cron expression.
    Text(String),
}

impl Default for CronValue {
    fn default() -> Self {
        Self::Text("*".to_string())
    }
}

impl fmt::Display for CronValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) if s.trim().is_empty() => write!(f, "*"),
            Self::Text(s) => write!(f, "{}", s.trim()),
        }
    }
}

impl From<u32> for CronValue {
    fn from(value: u32) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for CronValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// The six schedule fields. Omitted fields mean "every".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronFields {
    /// Year.
    #[serde(default)]
    pub year: CronValue,
    /// Month, 1-12.
    #[serde(default)]
    pub month: CronValue,
    /// Day of month, 1-31.
    #[serde(default)]
    pub day: CronValue,
    /// Day of week, 0-6 with 0 = Monday, or `mon`..`sun`.
    #[serde(default)]
    pub day_of_week: CronValue,
    /// Hour, 0-23.
    #[serde(default)]
    pub hour: CronValue,
    /// Minute, 0-59.
    #[serde(default)]
    pub minute: CronValue,
}

impl CronFields {
    /// Fires every minute.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minute.
    #[must_use]
    pub fn with_minute(mut self, value: impl Into<CronValue>) -> Self {
        self.minute = value.into();
        self
    }

    /// Sets the hour.
    #[must_use]
    pub fn with_hour(mut self, value: impl Into<CronValue>) -> Self {
        self.hour = value.into();
        self
    }

    /// Sets the day of month.
    #[must_use]
    pub fn with_day(mut self, value: impl Into<CronValue>) -> Self {
        self.day = value.into();
        self
    }

    /// Sets the month.
    #[must_use]
    pub fn with_month(mut self, value: impl Into<CronValue>) -> Self {
        self.month = value.into();
        self
    }

    /// Sets the day of week.
    #[must_use]
    pub fn with_day_of_week(mut self, value: impl Into<CronValue>) -> Self {
        self.day_of_week = value.into();
        self
    }

    /// Sets the year.
    #[must_use]
    pub fn with_year(mut self, value: impl Into<CronValue>) -> Self {
        self.year = value.into();
        self
    }

    /// Seven-field cron expression with seconds fixed at zero.
    pub fn expression(&self) -> Result<String, ScheduleError> {
        let day_of_week =
            weekday_names(&self.day_of_week.to_string()).map_err(|reason| ScheduleError::InvalidCron {
                fields: self.to_string(),
                reason,
            })?;
        Ok(format!(
            "0 {} {} {} {} {} {}",
            self.minute, self.hour, self.day, self.month, day_of_week, self.year
        ))
    }

    /// Parses the fields into a schedule.
    pub fn schedule(&self) -> Result<Schedule, ScheduleError> {
        Schedule::from_str(&self.expression()?).map_err(|e| ScheduleError::InvalidCron {
            fields: self.to_string(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for CronFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Y:{} M:{} D:{} DoW:{} H:{} M:{}",
            self.year, self.month, self.day, self.day_of_week, self.hour, self.minute
        )
    }
}

/// Send every graph of the pipeline by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAction {
    /// Recipient address.
    pub to_email: String,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
}

/// Pre-render every graph of the pipeline into the memoization cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheAction {}

/// What a schedule does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action_type", content = "action_data")]
pub enum ActionConfig {
    /// Email the graphs.
    Email(EmailAction),
    /// Warm the graph cache.
    Cache(CacheAction),
}

impl ActionConfig {
    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Email(_) => "Email",
            Self::Cache(_) => "Cache",
        }
    }
}

/// A persisted schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Pipeline to run.
    #[serde(rename = "dag_name", alias = "pipeline_id")]
    pub pipeline_id: String,
    /// Start of the period, a date or a relative expression.
    #[serde(rename = "from_", alias = "from")]
    pub from: String,
    /// End of the period.
    #[serde(rename = "to_", alias = "to")]
    pub to: String,
    /// Extract parameters; these win over remembered ones.
    #[serde(default)]
    pub extract_params: RawParams,
    /// When to fire.
    #[serde(rename = "schedule_params", alias = "cron")]
    pub cron: CronFields,
    /// What to do.
    #[serde(flatten)]
    pub action: ActionConfig,
}

impl fmt::Display for ScheduleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}..{} [{}] {}",
            self.pipeline_id,
            self.from,
            self.to,
            self.cron,
            self.action.kind()
        )
    }
}

/// File holding the ordered list of schedules.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    /// Creates a store at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw entries in file order.
    ///
    /// A missing or empty file means no entries. Anything but a JSON array is
    /// an error and the file is left alone.
    pub fn load_raw(&self) -> Result<Vec<serde_json::Value>, ScheduleError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.path, e).into()),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ScheduleError::MalformedConfig {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        match value {
            serde_json::Value::Array(entries) => Ok(entries),
            serde_json::Value::Null => Ok(Vec::new()),
            other => Err(ScheduleError::MalformedConfig {
                path: self.path.clone(),
                reason: format!("expected a list of schedules, found {other}"),
            }),
        }
    }

    /// Parsed schedules; entries that do not parse are skipped with a warning.
    pub fn list(&self) -> Result<Vec<ScheduleConfig>, ScheduleError> {
        Ok(parse_entries(&self.load_raw()?)
            .into_iter()
            .map(|(_, config)| config)
            .collect())
    }

    /// Appends a schedule.
    pub fn append(&self, config: &ScheduleConfig) -> Result<(), ScheduleError> {
        let lock = path_lock(&self.path);
        let _guard = lock.lock();
        let mut entries = self.load_raw()?;
        entries.push(serde_json::to_value(config).map_err(CacheError::from)?);
        self.save(&entries)?;
        info!(path = %self.path.display(), schedule = %config, "Schedule saved");
        Ok(())
    }

    /// Removes the entry at `index` (file order) and returns it.
    pub fn remove(&self, index: usize) -> Result<serde_json::Value, ScheduleError> {
        let lock = path_lock(&self.path);
        let _guard = lock.lock();
        let mut entries = self.load_raw()?;
        if index >= entries.len() {
            return Err(ScheduleError::IndexOutOfRange {
                index,
                len: entries.len(),
            });
        }
        let removed = entries.remove(index);
        self.save(&entries)?;
        info!(path = %self.path.display(), index, "Schedule removed");
        Ok(removed)
    }

    fn save(&self, entries: &[serde_json::Value]) -> Result<(), ScheduleError> {
        let bytes = serde_json::to_vec_pretty(entries).map_err(CacheError::from)?;
        write_atomic(&self.path, &bytes).map_err(|e| CacheError::io(&self.path, e))?;
        Ok(())
    }
}

const WEEKDAYS: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Rewrites numeric days of a day-of-week field as names, counting from
/// 0 = Monday. Step values after `/` are kept as numbers.
fn weekday_names(field: &str) -> Result<String, String> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();
    let mut after_step = false;
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            let mut digits = String::from(c);
            while let Some(d) = chars.next_if(char::is_ascii_digit) {
                digits.push(d);
            }
            if after_step {
                out.push_str(&digits);
            } else {
                let name = digits
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| WEEKDAYS.get(n))
                    .ok_or_else(|| format!("day of week {digits} is outside 0-6"))?;
                out.push_str(name);
            }
            after_step = false;
        } else {
            after_step = c == '/';
            out.push(c);
        }
    }
    Ok(out)
}

/// Parses raw entries, keeping their file index. Bad entries are skipped.
#[must_use]
pub fn parse_entries(entries: &[serde_json::Value]) -> Vec<(usize, ScheduleConfig)> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            match serde_json::from_value::<ScheduleConfig>(entry.clone()) {
                Ok(config) => Some((index, config)),
                Err(e) => {
                    warn!(index, error = %e, "Skipping unreadable schedule entry");
                    None
                }
            }
        })
        .collect()
}
