// fixed-window limiter, expiry set on first hit and repaired when missing

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::degraded::LocalCounters;
use crate::metrics::STORE_FAILURES;
use crate::store::{CounterStore, StoreError, TTL_NO_EXPIRY};

pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailureMode {
    #[default]
    FailOpen,
    FailClosed,
    Degraded,
}

impl FailureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::FailOpen => "fail_open",
            FailureMode::FailClosed => "fail_closed",
            FailureMode::Degraded => "degraded",
        }
    }
}

// per-route limiter configuration, built once when the route is registered
#[derive(Clone, Debug)]
pub struct RateLimitOptions {
    pub window: Duration,
    pub max: u32,
    pub message: String,
    pub failure_mode: FailureMode,
    // cap used in degraded mode; defaults to `max(1, max / 10)`
    pub degraded_max: Option<u32>,
    // counter name shared by several paths; defaults to the request path
    pub scope: Option<String>,
    pub backoff: bool,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            max: 100,
            message: DEFAULT_MESSAGE.to_string(),
            failure_mode: FailureMode::FailOpen,
            degraded_max: None,
            scope: None,
            backoff: false,
        }
    }
}

impl RateLimitOptions {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn with_degraded_max(mut self, cap: u32) -> Self {
        self.degraded_max = Some(cap);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_backoff(mut self) -> Self {
        self.backoff = true;
        self
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }

    pub fn degraded_cap(&self) -> u32 {
        self.degraded_max.unwrap_or_else(|| (self.max / 10).max(1))
    }

    // resource part of the counter key
    pub fn resource<'a>(&'a self, path: &'a str) -> &'a str {
        self.scope.as_deref().unwrap_or(path)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub retry_after: Option<u64>,
    pub violation_count: Option<u32>,
}

impl RateLimitDecision {
    pub fn allowed(limit: u32, remaining: u32, reset_time: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_time,
            retry_after: None,
            violation_count: None,
        }
    }

    pub fn denied(limit: u32, reset_time: DateTime<Utc>, retry_after: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_time,
            retry_after: Some(retry_after),
            violation_count: None,
        }
    }
}

pub fn rate_limit_key(client: &str, resource: &str) -> String {
    format!("ratelimit:{}:{}", client, resource)
}

fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

fn reset_in(ms: u64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::milliseconds(ms as i64)
}

pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
    local: Arc<dyn LocalCounters>,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn CounterStore>, local: Arc<dyn LocalCounters>) -> Self {
        Self { store, local }
    }

    pub async fn check(
        &self,
        client: &str,
        resource: &str,
        options: &RateLimitOptions,
    ) -> RateLimitDecision {
        let key = rate_limit_key(client, resource);

        match self.count_hit(&key, options).await {
            Ok(decision) => {
                debug!(
                    key = %key,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "Rate limit decision"
                );
                decision
            }
            Err(e) => self.on_store_failure(&key, options, &e),
        }
    }

    async fn count_hit(
        &self,
        key: &str,
        options: &RateLimitOptions,
    ) -> Result<RateLimitDecision, StoreError> {
        let window_ms = options.window_ms();

        let count = self.store.incr(key).await?;
        if count < 1 {
            return Err(StoreError::Malformed(format!("INCR returned {}", count)));
        }

        let mut ttl = self.store.pttl(key).await?;
        if count == 1 || ttl == TTL_NO_EXPIRY {
            if count > 1 {
                warn!(key, count, "Counter had no expiry, repairing");
            }
            self.store.pexpire(key, window_ms).await?;
            ttl = self.store.pttl(key).await?;
        }

        // actual TTL rather than the nominal window, the two drift apart
        let ttl_ms = if ttl > 0 { ttl as u64 } else { window_ms };
        let reset_time = reset_in(ttl_ms);

        let count = count as u64;
        let max = u64::from(options.max);
        if count > max {
            Ok(RateLimitDecision::denied(
                options.max,
                reset_time,
                ceil_secs(ttl_ms),
            ))
        } else {
            Ok(RateLimitDecision::allowed(
                options.max,
                (max - count) as u32,
                reset_time,
            ))
        }
    }

    fn on_store_failure(
        &self,
        key: &str,
        options: &RateLimitOptions,
        err: &StoreError,
    ) -> RateLimitDecision {
        error!(
            key,
            error = %err,
            mode = options.failure_mode.as_str(),
            "Counter store failed, applying failure policy"
        );
        STORE_FAILURES
            .with_label_values(&[options.failure_mode.as_str()])
            .inc();

        let window_ms = options.window_ms();
        match options.failure_mode {
            FailureMode::FailOpen => {
                RateLimitDecision::allowed(options.max, options.max, reset_in(window_ms))
            }
            FailureMode::FailClosed => {
                RateLimitDecision::denied(options.max, reset_in(window_ms), ceil_secs(window_ms))
            }
            FailureMode::Degraded => {
                let cap = options.degraded_cap();
                let window = self.local.hit(key, options.window);
                let left_ms = window
                    .reset_at
                    .saturating_duration_since(Instant::now())
                    .as_millis() as u64;
                let reset_time = reset_in(left_ms);

                if window.count > cap {
                    RateLimitDecision::denied(cap, reset_time, ceil_secs(left_ms).max(1))
                } else {
                    RateLimitDecision::allowed(cap, cap - window.count, reset_time)
                }
            }
        }
    }

    // current quota for `client` on `resource` without consuming a hit
    pub async fn status(
        &self,
        client: &str,
        resource: &str,
        options: &RateLimitOptions,
    ) -> RateLimitDecision {
        let key = rate_limit_key(client, resource);
        let window_ms = options.window_ms();

        let peek = async {
            let count = self.store.get(&key).await?.unwrap_or(0);
            let ttl = self.store.pttl(&key).await?;
            Ok::<_, StoreError>((count, ttl))
        };

        match peek.await {
            Ok((count, ttl)) => {
                let ttl_ms = if ttl > 0 { ttl as u64 } else { window_ms };
                let used = count.clamp(0, i64::from(u32::MAX)) as u32;
                let remaining = options.max.saturating_sub(used);
                if remaining == 0 {
                    RateLimitDecision::denied(options.max, reset_in(ttl_ms), ceil_secs(ttl_ms))
                } else {
                    RateLimitDecision::allowed(options.max, remaining, reset_in(ttl_ms))
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Counter store failed while reading quota");
                match options.failure_mode {
                    FailureMode::FailOpen => {
                        RateLimitDecision::allowed(options.max, options.max, reset_in(window_ms))
                    }
                    FailureMode::FailClosed => RateLimitDecision::denied(
                        options.max,
                        reset_in(window_ms),
                        ceil_secs(window_ms),
                    ),
                    FailureMode::Degraded => {
                        let cap = options.degraded_cap();
                        let now = Instant::now();
                        let (used, left_ms) = match self.local.get(&key) {
                            Some(w) if !w.is_expired(now) => (
                                w.count,
                                w.reset_at.saturating_duration_since(now).as_millis() as u64,
                            ),
                            _ => (0, window_ms),
                        };
                        let remaining = cap.saturating_sub(used);
                        if remaining == 0 {
                            RateLimitDecision::denied(cap, reset_in(left_ms), ceil_secs(left_ms).max(1))
                        } else {
                            RateLimitDecision::allowed(cap, remaining, reset_in(left_ms))
                        }
                    }
                }
            }
        }
    }
}
