use axum::{Json, extract::State};
use std::sync::Arc;
use tracing::info;
use crate::models::{VoteRequest, VoteTally};
use crate::state::AppState;

// Record a vote - the vote preset allows one per client per 30 days
pub async fn vote_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VoteRequest>,
) -> Json<VoteTally> {
    *state.votes.entry(payload.kind).or_insert(0) += 1;
    info!(kind = ?payload.kind, "Vote recorded");
    Json(state.tally())
}

pub async fn votes_handler(State(state): State<Arc<AppState>>) -> Json<VoteTally> {
    Json(state.tally())
}
