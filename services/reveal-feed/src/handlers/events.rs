use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use types::events::{InitPayload, StreamEvent};

use crate::error::AppError;
use crate::registry::EventFrame;
use crate::state::AppState;

/// Long-lived SSE stream: `init` first, then `preview`/`reveal` broadcasts.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let subscription = state.registry.register(|| init_frame(&state))?;
    tracing::info!(
        subscriber = %subscription.id(),
        total = state.registry.len(),
        "Stream opened"
    );

    let stream = subscription.map(|frame| Ok(to_sse(frame)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive)))
}

/// Synchronisation snapshot for a new subscriber.
fn init_frame(state: &AppState) -> Result<EventFrame, AppError> {
    let now = state.clock.now();
    let next_minute = state.aligner.next_boundary(now);
    let event = StreamEvent::Init(InitPayload::new(
        now,
        next_minute,
        state.aligner.upcoming_reveal(now),
        state.aligner.lead_secs(),
        state.history.revealed(now, state.init_history_len),
    ));
    let data = event
        .to_json()
        .map_err(|e| AppError::InternalError(e.into()))?;
    Ok(EventFrame::new(None, event.name(), data))
}

fn to_sse(frame: EventFrame) -> Event {
    let event = Event::default().event(frame.event).data(&*frame.data);
    match frame.id {
        Some(id) => event.id(id.to_string()),
        None => event,
    }
}
