use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use types::ids::MinuteStart;
use types::result::MinuteResult;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Newest-first view of the bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub count: usize,
    pub capacity: usize,
    pub results: Vec<MinuteResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub server_time: DateTime<Utc>,
    pub next_minute: MinuteStart,
    pub next_reveal: DateTime<Utc>,
    pub ms_until_next_minute: u64,
    pub ms_until_reveal: u64,
    pub lead_time_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub subscribers: usize,
    pub history_len: usize,
    pub events_sent: u64,
    pub subscribers_dropped: u64,
}
