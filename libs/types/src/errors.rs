//! Error types for the shared feed types
//!
//! Construction and deserialization failures for values that carry an
//! invariant (aligned minutes, single decimal digits).

use thiserror::Error;

/// Validation errors raised by the core types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("Digit out of range: {value} (must be 0..=9)")]
    DigitOutOfRange { value: u8 },

    #[error("Instant is not aligned to a minute boundary: {instant}")]
    MisalignedMinute { instant: String },
}
