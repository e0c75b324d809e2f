//! Clock Aligner
//!
//! Wall-clock arithmetic for the reveal cadence. Every function here is a
//! pure function of a supplied `now` and the configured lead time; the only
//! source of "now" is a [`Clock`] so tests can drive time explicitly.
//!
//! For a target minute boundary `B`, the reveal instant (generation and
//! preview) is `B - lead` and the reveal itself happens at `B`.
//!
//! ```text
//!   B-60s            B-lead               B
//!    │                 │                  │
//!    ├──── waiting ────┼──── revealing ───┤
//!                   preview            reveal
//! ```

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use types::ids::{MinuteStart, MINUTE_SECS};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time derived from the tokio monotonic clock, anchored at a fixed
/// instant.
///
/// Under `tokio::time::pause` this advances exactly as far as the runtime's
/// virtual time does, which keeps timer-driven code and its notion of "now"
/// in lockstep.
#[derive(Debug, Clone)]
pub struct AnchoredClock {
    wall: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl AnchoredClock {
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            wall,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.started.elapsed();
        // Saturates after ~292 years of uptime.
        let elapsed = Duration::from_std(elapsed).unwrap_or(Duration::MAX);
        self.wall + elapsed
    }
}

/// Which upcoming instant `ms_until` measures to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignRule {
    /// Top of the next minute.
    NextMinute,
    /// Lead time before the top of the next minute.
    NextReveal,
}

/// Computes boundary and reveal instants for a fixed lead time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockAligner {
    lead: Duration,
}

impl ClockAligner {
    /// Lead times must stay below one minute.
    pub const MAX_LEAD_SECS: u64 = (MINUTE_SECS - 1) as u64;

    /// `lead_secs` is clamped to [`Self::MAX_LEAD_SECS`].
    pub fn new(lead_secs: u64) -> Self {
        let lead_secs = lead_secs.min(Self::MAX_LEAD_SECS) as i64;
        Self {
            lead: Duration::seconds(lead_secs),
        }
    }

    pub fn lead_secs(&self) -> u64 {
        self.lead.num_seconds() as u64
    }

    /// First minute boundary strictly after the minute containing `now`.
    pub fn next_boundary(&self, now: DateTime<Utc>) -> MinuteStart {
        MinuteStart::containing(now).next()
    }

    /// Instant at which the result for `target` is generated and previewed.
    pub fn reveal_instant(&self, target: MinuteStart) -> DateTime<Utc> {
        target.as_datetime() - self.lead
    }

    /// First reveal instant strictly after `now`.
    ///
    /// Once the pending minute's reveal instant has passed this moves on to
    /// the following minute's, so it is always safe to count down to.
    pub fn upcoming_reveal(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let boundary = self.next_boundary(now);
        let instant = self.reveal_instant(boundary);
        if instant > now {
            instant
        } else {
            self.reveal_instant(boundary.next())
        }
    }

    /// Non-negative milliseconds from `now` until the rule's next occurrence.
    ///
    /// For [`AlignRule::NextReveal`], a pending minute whose reveal instant
    /// already passed yields `0` rather than waiting for the following one.
    pub fn ms_until(&self, now: DateTime<Utc>, rule: AlignRule) -> u64 {
        let boundary = self.next_boundary(now);
        let instant = match rule {
            AlignRule::NextMinute => boundary.as_datetime(),
            AlignRule::NextReveal => self.reveal_instant(boundary),
        };
        self.delay_until(now, instant).as_millis() as u64
    }

    /// Time left until `instant`, zero if it is not in the future.
    pub fn delay_until(&self, now: DateTime<Utc>, instant: DateTime<Utc>) -> StdDuration {
        (instant - now).to_std().unwrap_or(StdDuration::ZERO)
    }

    /// Minute a scheduler starting at `now` should work on first.
    ///
    /// A minute already generated (e.g. before a restart) is kept as the
    /// target so its stored result still gets revealed at its boundary.
    pub fn pending_target(
        &self,
        now: DateTime<Utc>,
        last_generated: Option<MinuteStart>,
    ) -> MinuteStart {
        let boundary = self.next_boundary(now);
        match last_generated {
            Some(last) if last > boundary => last,
            _ => boundary,
        }
    }

    /// Minute following `previous`, skipping minutes already in the past.
    pub fn next_target(&self, previous: MinuteStart, now: DateTime<Utc>) -> MinuteStart {
        previous.next().max(self.next_boundary(now))
    }
}
