//! Types library for the minute reveal feed
//!
//! Shared definitions used by the reveal service and by anything that reads
//! its stream or its persisted history.
//!
//! # Modules
//! - `ids`: Minute keys (`MinuteStart`) and subscriber identifiers
//! - `result`: `Digit` and the per-minute `MinuteResult`
//! - `events`: Stream event names and payloads
//! - `errors`: Validation error taxonomy

// Public modules
pub mod ids;
pub mod result;
pub mod events;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";
