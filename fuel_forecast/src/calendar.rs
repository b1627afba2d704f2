//! Calendar covariates derived from the month alone

use crate::error::Result;
use crate::sources::HolidayCalendar;
use crate::utils::{month_end, month_start};
use chrono::{Datelike, NaiveDate, Weekday};

/// Breakdown of the non-working days of a month
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HolidayCount {
    pub weekend: u32,
    pub national: u32,
    pub school: u32,
}

impl HolidayCount {
    pub fn total(&self) -> u32 {
        self.weekend + self.national + self.school
    }
}

/// Count the weekend, national and school holidays of the month containing `date`.
///
/// Each day is counted once, by the first rule it matches: weekend, national
/// holiday, summer break (July and August), semester break (January and
/// February, counted as 5 days on the first match) and term start/end (June
/// and September, counted as 11 days on the first match).
pub fn holiday_count(
    date: NaiveDate,
    calendar: &dyn HolidayCalendar,
    country_code: &str,
) -> Result<HolidayCount> {
    let first = month_start(date);
    let last = month_end(first)?;

    let mut count = HolidayCount::default();
    let mut semester_pending = true;
    let mut term_pending = true;

    for day in first.iter_days().take_while(|d| *d <= last) {
        let month = day.month();
        if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            count.weekend += 1;
        } else if calendar.is_holiday(day, country_code) {
            count.national += 1;
        } else if month == 7 || month == 8 {
            count.school += 1;
        } else if (month == 1 || month == 2) && semester_pending {
            count.school += 5;
            semester_pending = false;
        } else if (month == 6 || month == 9) && term_pending {
            count.school += 11;
            term_pending = false;
        }
    }
    Ok(count)
}

/// Total of [`holiday_count`]
pub fn school_holiday(
    date: NaiveDate,
    calendar: &dyn HolidayCalendar,
    country_code: &str,
) -> Result<u32> {
    holiday_count(date, calendar, country_code).map(|c| c.total())
}

/// Quarter of the year, 1 to 4
pub fn quarter(date: NaiveDate) -> u32 {
    date.month0() / 3 + 1
}

/// 1.0 inside the inclusive window, else 0.0
pub fn window_flag(date: NaiveDate, start: NaiveDate, end: NaiveDate) -> f64 {
    if date >= start && date <= end {
        1.0
    } else {
        0.0
    }
}
