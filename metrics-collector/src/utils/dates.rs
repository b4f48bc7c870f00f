//! Day parsing and day-range generation.
//!
//! Periods may be given as calendar dates (`2022-03-01`) or as simple
//! natural-language expressions relative to today (`6 months ago`,
//! `yesterday`). Everything is normalized to [`NaiveDate`] first.

use chrono::{Days, Local, Months, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

use crate::errors::DateError;

/// Format of day keys in documents and cache files.
pub const DAY_FORMAT: &str = "%Y-%m-%d";

fn relative_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+|an?)\s+(day|week|month|year)s?\s+ago$")
            .unwrap_or_else(|e| unreachable!("static pattern is valid: {e}"))
    })
}

/// Formats a day as `YYYY-MM-DD`.
#[must_use]
pub fn format_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

/// Parses a day relative to the local calendar day.
pub fn parse_day(expr: &str) -> Result<NaiveDate, DateError> {
    parse_day_from(expr, Local::now().date_naive())
}

/// Parses a day, resolving relative expressions against `today`.
pub fn parse_day_from(expr: &str, today: NaiveDate) -> Result<NaiveDate, DateError> {
    let trimmed = expr.trim();
    if let Ok(day) = NaiveDate::parse_from_str(trimmed, DAY_FORMAT) {
        return Ok(day);
    }

    let lowered = trimmed.to_lowercase();
    let unparseable = || DateError::Unparseable(expr.to_string());
    match lowered.as_str() {
        "today" | "now" => return Ok(today),
        "yesterday" => return today.checked_sub_days(Days::new(1)).ok_or_else(unparseable),
        _ => {}
    }

    let captures = relative_pattern().captures(&lowered).ok_or_else(unparseable)?;
    let amount: u32 = match &captures[1] {
        "a" | "an" => 1,
        n => n.parse().map_err(|_| unparseable())?,
    };

    let day = match &captures[2] {
        "day" => today.checked_sub_days(Days::new(u64::from(amount))),
        "week" => today.checked_sub_days(Days::new(u64::from(amount) * 7)),
        "month" => today.checked_sub_months(Months::new(amount)),
        "year" => amount
            .checked_mul(12)
            .and_then(|months| today.checked_sub_months(Months::new(months))),
        _ => None,
    };
    day.ok_or_else(unparseable)
}

/// Normalizes both ends of a period.
pub fn normalize_period(from: &str, to: &str) -> Result<(NaiveDate, NaiveDate), DateError> {
    let today = Local::now().date_naive();
    Ok((parse_day_from(from, today)?, parse_day_from(to, today)?))
}

/// Yields every day from `from` to `to`, both inclusive, in ascending order.
///
/// A reversed range yields nothing.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    from.iter_days().take_while(move |day| *day <= to)
}
