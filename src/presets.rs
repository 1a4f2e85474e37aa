// Route presets for the site's API endpoints

use tokio::time::Duration;

use crate::rate_limit::{FailureMode, RateLimitOptions};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

// Login - 5 attempts per 15 minutes, never permissive when the store is down
pub fn login() -> RateLimitOptions {
    RateLimitOptions::new(Duration::from_secs(15 * MINUTE), 5)
        .with_message("Too many login attempts, please try again in 15 minutes.")
        .with_failure_mode(FailureMode::FailClosed)
}

// Contact email - 10 messages per hour, local counting during outages
pub fn email() -> RateLimitOptions {
    RateLimitOptions::new(Duration::from_secs(HOUR), 10)
        .with_message("Too many messages sent, please try again later.")
        .with_failure_mode(FailureMode::Degraded)
}

// General API - 100 requests per 15 minutes with escalating backoff
pub fn api() -> RateLimitOptions {
    RateLimitOptions::new(Duration::from_secs(15 * MINUTE), 100)
        .with_message("Too many requests, please try again later.")
        .with_backoff()
}

// Voting - one vote per client every 30 days, whichever way it goes
pub fn vote() -> RateLimitOptions {
    RateLimitOptions::new(Duration::from_secs(30 * DAY), 1)
        .with_message("You have already voted. Thank you for your support!")
        .with_failure_mode(FailureMode::FailClosed)
        .with_scope("vote")
}
