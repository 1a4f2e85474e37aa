use axum::{
    Router,
    routing::{get, post},
};
use dashmap::DashMap;
use std::sync::Arc;

use crate::backoff::ViolationBackoff;
use crate::gate::{RateLimitGate, wrap};
use crate::handlers::{
    contact_handler, health_handler, login_handler, metrics_handler, quota_handler, vote_handler,
    votes_handler,
};
use crate::presets;
use crate::rate_limit::FixedWindowLimiter;
use crate::state::AppState;

// routes behind the general API preset, the only ones the quota endpoint reports on
pub const API_ROUTES: &[&str] = &["/api/votes"];

pub fn build_state(
    limiter: Arc<FixedWindowLimiter>,
    admin_password_sha256: Option<String>,
) -> Arc<AppState> {
    Arc::new(AppState {
        votes: DashMap::new(),
        admin_password_sha256,
        limiter,
        api_limits: presets::api(),
    })
}

// creating the router - each API route sits behind its preset
pub fn build_app(state: Arc<AppState>, backoff: Arc<ViolationBackoff>) -> Router {
    let limiter = state.limiter.clone();
    let gate = |name, options| RateLimitGate::new(name, options, limiter.clone(), backoff.clone());

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/auth/login", wrap(post(login_handler), gate("login", presets::login())))
        .route("/api/contact", wrap(post(contact_handler), gate("email", presets::email())))
        .route("/api/vote", wrap(post(vote_handler), gate("vote", presets::vote())))
        .route(API_ROUTES[0], wrap(get(votes_handler), gate("api", presets::api())))
        .route("/api/rate-limit/status", get(quota_handler))
        .with_state(state)
}
