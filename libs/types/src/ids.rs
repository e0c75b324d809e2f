//! Identifier types for feed entities
//!
//! `MinuteStart` is the unique key of a result: a UTC instant truncated to
//! whole minutes. `SubscriberId` uses UUID v7 so connection logs sort in
//! the order clients joined.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::TypeError;

/// Seconds in one reveal period.
pub const MINUTE_SECS: i64 = 60;

/// A UTC instant aligned to a whole minute.
///
/// Only obtainable by truncation or validated conversion, so every value
/// sits exactly on a minute boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "DateTime<Utc>", into = "DateTime<Utc>")]
pub struct MinuteStart(DateTime<Utc>);

impl MinuteStart {
    /// The minute containing `instant` (floor).
    pub fn containing(instant: DateTime<Utc>) -> Self {
        let secs = instant.timestamp().rem_euclid(MINUTE_SECS);
        let nanos = i64::from(instant.timestamp_subsec_nanos());
        Self(instant - Duration::seconds(secs) - Duration::nanoseconds(nanos))
    }

    /// The following minute boundary.
    pub fn next(&self) -> Self {
        self.offset(1)
    }

    /// Shift by a whole number of minutes (negative moves backwards).
    pub fn offset(&self, minutes: i64) -> Self {
        Self(self.0 + Duration::minutes(minutes))
    }

    /// Whole minutes from `earlier` to `self`.
    pub fn minutes_since(&self, earlier: MinuteStart) -> i64 {
        (self.0 - earlier.0).num_minutes()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl TryFrom<DateTime<Utc>> for MinuteStart {
    type Error = TypeError;

    fn try_from(instant: DateTime<Utc>) -> Result<Self, Self::Error> {
        let aligned = Self::containing(instant);
        if aligned.0 == instant {
            Ok(aligned)
        } else {
            Err(TypeError::MisalignedMinute {
                instant: instant.to_rfc3339(),
            })
        }
    }
}

impl From<MinuteStart> for DateTime<Utc> {
    fn from(minute: MinuteStart) -> Self {
        minute.0
    }
}

impl fmt::Display for MinuteStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%MZ"))
    }
}

/// Unique identifier for a connected stream subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
