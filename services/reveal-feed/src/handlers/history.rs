use axum::{
    extract::{Query, State},
    Json,
};

use crate::error::AppError;
use crate::models::{HistoryQuery, HistoryResponse};
use crate::state::AppState;

pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    if query.limit == Some(0) {
        return Err(AppError::BadRequest("limit must be at least 1".into()));
    }

    let now = state.clock.now();
    let results = state
        .history
        .revealed(now, query.limit.unwrap_or(usize::MAX));

    Ok(Json(HistoryResponse {
        count: results.len(),
        capacity: state.history.capacity(),
        results,
    }))
}
