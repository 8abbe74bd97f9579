//! Monthly period model and cursor arithmetic.
//!
//! A [`Period`] names one monthly data release. Its canonical text form is
//! `"<FullMonthName>-<YYYY>"` (e.g. `November-2025`; years past 9999 take
//! more digits), which doubles as the
//! partition key and the dedup key of the run requested for it.

use std::fmt;
use std::str::FromStr;

use chrono::Month;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A calendar month (year + month, no day). Ordered by (year, month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// First period checked when nothing has been discovered yet.
    pub const EPOCH: Period = Period { year: 2024, month: 1 };

    pub fn new(year: i32, month: u32) -> Result<Self, CoreError> {
        if year < 0 {
            return Err(CoreError::YearOutOfRange(year));
        }
        if !(1..=12).contains(&month) {
            return Err(CoreError::MonthOutOfRange(month));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The following calendar month, rolling the year after December.
    pub fn successor(&self) -> Period {
        if self.month == 12 {
            Period { year: self.year + 1, month: 1 }
        } else {
            Period { year: self.year, month: self.month + 1 }
        }
    }

    /// Full English month name, e.g. `"November"`.
    pub fn month_name(&self) -> &'static str {
        month_of(self.month).name()
    }
}

/// Next period to check given the last discovered one.
///
/// Without a cursor the walk starts at [`Period::EPOCH`].
pub fn next_period(cursor: Option<&Period>) -> Period {
    match cursor {
        Some(p) => p.successor(),
        None => Period::EPOCH,
    }
}

fn month_of(month: u32) -> Month {
    // `month` is validated to 1..=12 on every construction path.
    Month::try_from(month as u8).unwrap_or(Month::January)
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:04}", self.month_name(), self.year)
    }
}

impl FromStr for Period {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidPeriod(s.to_string());

        let (name, year) = s.trim().rsplit_once('-').ok_or_else(invalid)?;
        if year.len() < 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;

        let month = (1..=12u32)
            .find(|m| month_of(*m).name().eq_ignore_ascii_case(name))
            .ok_or_else(invalid)?;

        Ok(Self { year, month })
    }
}

impl TryFrom<String> for Period {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.to_string()
    }
}
