//! Minute result types
//!
//! One `MinuteResult` exists per minute boundary. Results are immutable once
//! created; the only way to obtain one is through validated constructors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::TypeError;
use crate::ids::MinuteStart;

/// A single decimal digit in `[0, 10)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Digit(u8);

impl Digit {
    /// Exclusive upper bound of the digit range.
    pub const RANGE_END: u8 = 10;

    pub fn new(value: u8) -> Result<Self, TypeError> {
        if value < Self::RANGE_END {
            Ok(Self(value))
        } else {
            Err(TypeError::DigitOutOfRange { value })
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Digit {
    type Error = TypeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Digit> for u8 {
    fn from(digit: Digit) -> Self {
        digit.0
    }
}

impl fmt::Display for Digit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The number produced for one minute boundary.
///
/// `revealed_at` is when the value was actually produced; under scheduler
/// delay it may lag the nominal lead instant before `minute_start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinuteResult {
    pub minute_start: MinuteStart,
    pub number: Digit,
    pub revealed_at: DateTime<Utc>,
}

impl MinuteResult {
    pub fn new(minute_start: MinuteStart, number: Digit, revealed_at: DateTime<Utc>) -> Self {
        Self {
            minute_start,
            number,
            revealed_at,
        }
    }
}
