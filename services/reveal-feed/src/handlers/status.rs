use axum::{extract::State, Json};

use crate::clock::AlignRule;
use crate::models::{HealthResponse, StatusResponse};
use crate::state::AppState;

/// Timing view derived from the clock aligner alone.
///
/// `nextReveal` is always in the future, so `msUntilReveal` counts down to
/// it rather than reading zero after the pending reveal instant.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let now = state.clock.now();
    let next_reveal = state.aligner.upcoming_reveal(now);

    Json(StatusResponse {
        server_time: now,
        next_minute: state.aligner.next_boundary(now),
        next_reveal,
        ms_until_next_minute: state.aligner.ms_until(now, AlignRule::NextMinute),
        ms_until_reveal: state.aligner.delay_until(now, next_reveal).as_millis() as u64,
        lead_time_secs: state.aligner.lead_secs(),
    })
}

pub async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.broadcaster.stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        subscribers: state.registry.len(),
        history_len: state.history.len(),
        events_sent: stats.events_sent,
        subscribers_dropped: stats.subscribers_dropped,
    })
}
