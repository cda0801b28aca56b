//! Billing calendar
//!
//! A period label such as `1d`, `7d` or `1m` names a window of whole days
//! ending before today. Every window is split into single-day
//! [`DateRange`]s, so one snapshot key (`<kind>/<date>.json`) always means
//! the same day of billing data no matter which period asked for it.

use crate::error::{CommonError, Result};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Date format used in snapshot keys and billing API queries
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Unit of a period label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Day,
    Month,
}

/// Longest accepted `<n>d` period
pub const MAX_DAYS: u32 = 366;

/// Longest accepted `<n>m` period
pub const MAX_MONTHS: u32 = 24;

/// A configured reporting period, e.g. `1d` or `3m`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Period {
    count: u32,
    unit: PeriodUnit,
}

impl Period {
    pub fn new(count: u32, unit: PeriodUnit) -> Result<Self> {
        let max = match unit {
            PeriodUnit::Day => MAX_DAYS,
            PeriodUnit::Month => MAX_MONTHS,
        };
        if count == 0 || count > max {
            return Err(CommonError::InvalidPeriod(format!(
                "{}{} (must be 1..={})",
                count,
                unit_suffix(unit),
                max
            )));
        }
        Ok(Self { count, unit })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn unit(&self) -> PeriodUnit {
        self.unit
    }

    /// Label used in table and metric names (`1d`, `1m`, ...)
    pub fn label(&self) -> String {
        self.to_string()
    }

    /// Days covered by this period, oldest first.
    ///
    /// - `<n>d`: the n days ending yesterday.
    /// - `<n>m`: the n calendar months ending with the current month, where the
    ///   current month is month-to-date. On the 1st of a month the window ends
    ///   with the previous month instead.
    pub fn dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let (start, end) = match self.unit {
            PeriodUnit::Day => (
                today
                    .checked_sub_days(Days::new(u64::from(self.count)))
                    .unwrap_or(NaiveDate::MIN),
                today,
            ),
            PeriodUnit::Month => {
                let current_first = first_of_month(today);
                let months_back = if today.day() == 1 {
                    self.count
                } else {
                    self.count - 1
                };
                (
                    current_first
                        .checked_sub_months(Months::new(months_back))
                        .unwrap_or(NaiveDate::MIN),
                    today,
                )
            },
        };

        start.iter_days().take_while(|d| *d < end).collect()
    }

    /// Single-day ranges covered by this period, oldest first
    pub fn ranges(&self, today: NaiveDate) -> Vec<DateRange> {
        self.dates(today).into_iter().map(DateRange::day).collect()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, unit_suffix(self.unit))
    }
}

impl FromStr for Period {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        let label = s.trim();
        let invalid = || CommonError::InvalidPeriod(s.to_string());

        let (digits, unit) = match label.char_indices().last() {
            Some((idx, 'd')) => (&label[..idx], PeriodUnit::Day),
            Some((idx, 'm')) => (&label[..idx], PeriodUnit::Month),
            _ => return Err(invalid()),
        };

        let count: u32 = digits.parse().map_err(|_| invalid())?;
        Period::new(count, unit).map_err(|_| invalid())
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open date range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The range covering exactly `date`
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date.succ_opt().unwrap_or(date),
        }
    }

    /// Date component of snapshot keys
    pub fn key(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Union of the days covered by `periods`, oldest first and without duplicates
pub fn unique_ranges(periods: &[Period], today: NaiveDate) -> Vec<DateRange> {
    let dates: BTreeSet<NaiveDate> = periods.iter().flat_map(|p| p.dates(today)).collect();
    dates.into_iter().map(DateRange::day).collect()
}

/// Parse a billing date string (`YYYY-MM-DD`)
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|e| CommonError::InvalidDate(format!("{value}: {e}")))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn unit_suffix(unit: PeriodUnit) -> &'static str {
    match unit {
        PeriodUnit::Day => "d",
        PeriodUnit::Month => "m",
    }
}
