use dashmap::DashMap;
use std::sync::Arc;
use crate::models::{VoteKind, VoteTally};
use crate::rate_limit::{FixedWindowLimiter, RateLimitOptions};
// app's shared state

pub struct AppState {
    pub votes: DashMap<VoteKind, u64>,
    pub admin_password_sha256: Option<String>, // hex digest, login is refused without it
    pub limiter: Arc<FixedWindowLimiter>,
    pub api_limits: RateLimitOptions, // preset reported by the quota endpoint
}

impl AppState {
    pub fn tally(&self) -> VoteTally {
        let count = |kind| self.votes.get(&kind).map(|v| *v).unwrap_or(0);
        VoteTally {
            support: count(VoteKind::Support),
            oppose: count(VoteKind::Oppose),
        }
    }
}
