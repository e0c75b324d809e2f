//! Stream event definitions
//!
//! Every frame pushed to a subscriber is one of three named events:
//!
//! | Event     | Payload                  | When                               |
//! |-----------|--------------------------|------------------------------------|
//! | `init`    | [`InitPayload`]          | once, immediately on connect       |
//! | `preview` | [`PreviewPayload`]       | at the lead instant before a reveal|
//! | `reveal`  | [`MinuteResult`]         | at the minute boundary             |
//!
//! A preview carries only the number so clients can tell it apart from the
//! authoritative reveal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MinuteStart;
use crate::result::{Digit, MinuteResult};

pub const EVENT_INIT: &str = "init";
pub const EVENT_PREVIEW: &str = "preview";
pub const EVENT_REVEAL: &str = "reveal";

/// Value of [`InitPayload::kind`].
pub const INIT_KIND: &str = "connected";

/// Synchronisation snapshot sent to a newly joined subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    #[serde(rename = "type")]
    pub kind: String,
    /// Server time at connect.
    pub time: DateTime<Utc>,
    pub next_minute: MinuteStart,
    pub next_reveal: DateTime<Utc>,
    pub lead_time_secs: u64,
    /// Recent results, newest first.
    pub history: Vec<MinuteResult>,
}

impl InitPayload {
    pub fn new(
        time: DateTime<Utc>,
        next_minute: MinuteStart,
        next_reveal: DateTime<Utc>,
        lead_time_secs: u64,
        history: Vec<MinuteResult>,
    ) -> Self {
        Self {
            kind: INIT_KIND.to_string(),
            time,
            next_minute,
            next_reveal,
            lead_time_secs,
            history,
        }
    }
}

/// Early, number-only broadcast ahead of a reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewPayload {
    pub preview_at: DateTime<Utc>,
    pub number: Digit,
}

/// A named event ready for fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Init(InitPayload),
    Preview(PreviewPayload),
    Reveal(MinuteResult),
}

impl StreamEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Init(_) => EVENT_INIT,
            StreamEvent::Preview(_) => EVENT_PREVIEW,
            StreamEvent::Reveal(_) => EVENT_REVEAL,
        }
    }

    /// Serialize the payload (not the envelope) to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            StreamEvent::Init(payload) => serde_json::to_string(payload),
            StreamEvent::Preview(payload) => serde_json::to_string(payload),
            StreamEvent::Reveal(result) => serde_json::to_string(result),
        }
    }
}
