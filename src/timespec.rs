//! Human-written timespans (`3h`, `2d`, `1.5y`) converted to seconds.
//!
//! Grammar: `<digits>[.<digits>]<unit>` where unit is one of
//! `y` (365 days), `M` (a twelfth of a year), `d`, `h`, `m` (minutes), `s`.
//! Case only matters for `M`/`m`; other letters accept either case.
//! Fractions are applied with integer arithmetic and truncated toward zero.

use crate::error::{Result, ScribepoolError};
use std::fmt;
use std::str::FromStr;

pub const SECOND: u64 = 1;
pub const MINUTE: u64 = 60;
pub const HOUR: u64 = 60 * MINUTE;
pub const DAY: u64 = 24 * HOUR;
pub const YEAR: u64 = 365 * DAY;
/// `YEAR` divides evenly by 12, so a month is exactly 30.41666 days.
pub const MONTH: u64 = YEAR / 12;

/// Unit letter of a timespec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl Unit {
    fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'y' | 'Y' => Some(Self::Year),
            'M' => Some(Self::Month),
            'd' | 'D' => Some(Self::Day),
            'h' | 'H' => Some(Self::Hour),
            'm' => Some(Self::Minute),
            's' | 'S' => Some(Self::Second),
            _ => None,
        }
    }

    fn letter(self) -> char {
        match self {
            Self::Year => 'y',
            Self::Month => 'M',
            Self::Day => 'd',
            Self::Hour => 'h',
            Self::Minute => 'm',
            Self::Second => 's',
        }
    }

    /// Seconds in one unit.
    pub fn seconds(self) -> u64 {
        match self {
            Self::Year => YEAR,
            Self::Month => MONTH,
            Self::Day => DAY,
            Self::Hour => HOUR,
            Self::Minute => MINUTE,
            Self::Second => SECOND,
        }
    }
}

/// A parsed timespan. Keeps its textual form so it can be written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timespec {
    whole: String,
    fraction: String,
    unit: Unit,
    seconds: u64,
}

impl Timespec {
    /// Build a timespec from a whole number of units.
    pub fn new(amount: u64, unit: Unit) -> Self {
        Self {
            whole: amount.to_string(),
            fraction: String::new(),
            unit,
            seconds: amount.saturating_mul(unit.seconds()),
        }
    }

    /// Total length in seconds.
    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.seconds)
    }
}

/// Convenience wrapper: parse `text` and return its length in seconds.
pub fn to_seconds(text: &str) -> Result<u64> {
    text.parse::<Timespec>().map(|spec| spec.seconds())
}

fn cant_convert(text: &str) -> ScribepoolError {
    ScribepoolError::format(format!("can't convert '{text}' to seconds"))
}

impl FromStr for Timespec {
    type Err = ScribepoolError;

    fn from_str(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let mut chars = trimmed.chars();
        let unit = chars
            .next_back()
            .and_then(Unit::from_letter)
            .ok_or_else(|| cant_convert(text))?;
        let number = chars.as_str();

        let (whole, fraction) = match number.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (number, ""),
        };
        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if whole.is_empty()
            || !all_digits(whole)
            || (number.contains('.') && fraction.is_empty())
            || !all_digits(fraction)
        {
            return Err(cant_convert(text));
        }

        // amount = whole.fraction = numerator / 10^len(fraction)
        let digits = format!("{whole}{fraction}");
        let numerator: u128 = digits.parse().map_err(|_| cant_convert(text))?;
        let denominator = 10u128
            .checked_pow(fraction.len() as u32)
            .ok_or_else(|| cant_convert(text))?;
        let seconds = numerator
            .checked_mul(u128::from(unit.seconds()))
            .map(|total| total / denominator)
            .and_then(|total| u64::try_from(total).ok())
            .ok_or_else(|| cant_convert(text))?;

        Ok(Self {
            whole: whole.to_string(),
            fraction: fraction.to_string(),
            unit,
            seconds,
        })
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fraction.is_empty() {
            write!(f, "{}{}", self.whole, self.unit.letter())
        } else {
            write!(f, "{}.{}{}", self.whole, self.fraction, self.unit.letter())
        }
    }
}
