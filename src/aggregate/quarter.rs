//! Calendar quarter buckets.
//!
//! A reading's timestamp marks the start of the metering interval it covers,
//! so the configured interval is added before the quarter is derived. The
//! quarter is always taken from the calendar fields of the adjusted
//! timestamp in its own fixed offset.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, TimeDelta};
use thiserror::Error;

use super::shard::{decimal_digits, MAX_DECIMAL_DIGITS};

/// Calendar quarter of a year, rendered as `Q{n}-{year}`.
///
/// Ordering follows the rendered label lexicographically, which is the
/// order quarters appear in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quarter {
    number: u8,
    year: i32,
}

/// Errors from parsing a quarter label.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseQuarterError {
    #[error("quarter label {label:?} is not of the form Q<n>-<year>")]
    Format { label: String },

    #[error("quarter number {number} out of range 1-4")]
    OutOfRange { number: u8 },
}

impl Quarter {
    /// Creates a quarter, returning `None` if `number` is not in 1..=4.
    pub fn new(number: u8, year: i32) -> Option<Self> {
        (1..=4).contains(&number).then_some(Self { number, year })
    }

    /// Quarter containing the given calendar month (1-12).
    pub fn from_month(month: u32, year: i32) -> Self {
        let number = match month {
            1..=3 => 1,
            4..=6 => 2,
            7..=9 => 3,
            _ => 4,
        };
        Self { number, year }
    }

    /// Quarter number, 1-4.
    pub const fn number(self) -> u8 {
        self.number
    }

    pub const fn year(self) -> i32 {
        self.year
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}-{}", self.number, self.year)
    }
}

impl FromStr for Quarter {
    type Err = ParseQuarterError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        let format_err = || ParseQuarterError::Format {
            label: label.to_string(),
        };

        let (number, year) = label
            .strip_prefix('Q')
            .and_then(|rest| rest.split_once('-'))
            .ok_or_else(format_err)?;
        let number: u8 = number.parse().map_err(|_| format_err())?;
        let year: i32 = year.parse().map_err(|_| format_err())?;

        Self::new(number, year).ok_or(ParseQuarterError::OutOfRange { number })
    }
}

impl Ord for Quarter {
    fn cmp(&self, other: &Self) -> Ordering {
        // The number is a single digit, so "Q{n}-" prefixes order by number.
        self.number.cmp(&other.number).then_with(|| {
            if self.year == other.year {
                return Ordering::Equal;
            }
            let mut a = [0u8; MAX_DECIMAL_DIGITS];
            let mut b = [0u8; MAX_DECIMAL_DIGITS];
            year_text(self.year, &mut a).cmp(&year_text(other.year, &mut b))
        })
    }
}

/// Writes `year` as `Display` renders it into the tail of `buf`.
fn year_text(year: i32, buf: &mut [u8; MAX_DECIMAL_DIGITS]) -> &[u8] {
    let len = decimal_digits(u64::from(year.unsigned_abs()), buf).len();
    let mut start = buf.len() - len;
    if year < 0 {
        start -= 1;
        buf[start] = b'-';
    }
    &buf[start..]
}

impl PartialOrd for Quarter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Resolves the quarter a reading belongs to.
///
/// `interval` is added to `timestamp` first. If the addition leaves the
/// representable calendar range the unadjusted timestamp is used.
pub fn resolve_quarter(timestamp: DateTime<FixedOffset>, interval: Duration) -> Quarter {
    let adjusted = TimeDelta::from_std(interval)
        .ok()
        .and_then(|delta| timestamp.checked_add_signed(delta))
        .unwrap_or(timestamp);

    Quarter::from_month(adjusted.month(), adjusted.year())
}
