//! Minute Reveal Feed
//!
//! Generates one random digit per minute, previews it a fixed lead time
//! before the minute boundary, reveals it at the boundary, and streams both
//! to every connected client over Server-Sent Events. A bounded history of
//! past results survives restarts.
//!
//! # Architecture
//!
//! ```text
//!  Clock Aligner
//!        │ arms
//!  ┌─────▼──────┐   digit   ┌───────────┐
//!  │ Scheduler  │◄──────────│ Generator │
//!  └─────┬──────┘           └───────────┘
//!        │ append
//!  ┌─────▼──────┐
//!  │  History   │──── /history, init snapshot
//!  └─────┬──────┘
//!        │ preview / reveal
//!  ┌─────▼──────┐   try_send  ┌─────────────┐
//!  │Broadcaster │────────────►│  Registry   │──► /events (SSE)
//!  └────────────┘             └─────────────┘
//! ```

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod error;
pub mod generator;
pub mod handlers;
pub mod history;
pub mod models;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod state;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
