//! Utility functions for month-granularity calendars

use crate::error::{ForecastError, Result};
use chrono::{Datelike, NaiveDate};

/// Months elapsed since year 0, used as a dense integer time index
pub fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

/// Inverse of [`month_index`]; always lands on the first of the month
pub fn from_month_index(index: i32) -> Result<NaiveDate> {
    let year = index.div_euclid(12);
    let month = index.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ForecastError::DataError(format!("Month index {index} is out of range")))
}

/// First day of the month containing `date`
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Move `date` by `delta` months, normalising to the month start
pub fn shift_months(date: NaiveDate, delta: i32) -> Result<NaiveDate> {
    from_month_index(month_index(date) + delta)
}

/// Whole months from `from` to `to` (negative if `to` is earlier)
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    month_index(to) - month_index(from)
}

/// Every month start in `[start, end]`
pub fn month_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
    if end < start {
        return Err(ForecastError::ValidationError(format!(
            "Malformed date range: {start} is after {end}"
        )));
    }
    (month_index(start)..=month_index(end))
        .map(from_month_index)
        .collect()
}

/// Parse a date with the given format and normalise it to the month start
pub fn parse_month(value: &str, format: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), format)
        .map(month_start)
        .map_err(|e| ForecastError::DataError(format!("Cannot parse date '{value}': {e}")))
}

/// Worker pool sized by `n_jobs` (`None` = all available cores)
pub fn thread_pool(n_jobs: Option<usize>) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_jobs.unwrap_or(0))
        .build()
        .map_err(|e| ForecastError::ValidationError(format!("Cannot build thread pool: {e}")))
}

/// Last day of the month containing `date`
pub fn month_end(date: NaiveDate) -> Result<NaiveDate> {
    let next = shift_months(date, 1)?;
    next.pred_opt()
        .ok_or_else(|| ForecastError::DataError(format!("No day before {next}")))
}
