use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, warn};

use crate::metrics::VIOLATIONS;
use crate::rate_limit::RateLimitDecision;
use crate::store::{CounterStore, StoreError, TTL_NO_EXPIRY};

#[derive(Clone, Copy, Debug)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    // how long a violation count survives without new denials
    pub violation_ttl: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            max: Duration::from_secs(3600),
            violation_ttl: Duration::from_secs(3600),
        }
    }
}

impl BackoffConfig {
    // `min(2^violations * base, max)` in seconds
    pub fn delay_secs(&self, violations: u32) -> u64 {
        let base = self.base.as_secs();
        let max = self.max.as_secs();
        2u64.checked_pow(violations)
            .and_then(|factor| factor.checked_mul(base))
            .map_or(max, |delay| delay.min(max))
    }
}

pub fn violation_key(client: &str) -> String {
    format!("violations:{}", client)
}

pub struct ViolationBackoff {
    store: Arc<dyn CounterStore>,
    config: BackoffConfig,
}

impl ViolationBackoff {
    pub fn new(store: Arc<dyn CounterStore>, config: BackoffConfig) -> Self {
        Self { store, config }
    }

    pub async fn apply(&self, client: &str, decision: RateLimitDecision) -> RateLimitDecision {
        let key = violation_key(client);

        if decision.allowed {
            if let Err(e) = self.store.delete(&key).await {
                error!(client, error = %e, "Failed to reset violation count");
            }
            return decision;
        }

        let violations = match self.record_violation(&key).await {
            Ok(count) => count,
            Err(e) => {
                error!(client, error = %e, "Failed to record violation, skipping backoff");
                0
            }
        };
        if violations == 0 {
            return decision;
        }

        let backoff = self.config.delay_secs(violations);
        VIOLATIONS.inc();
        warn!(client, violations, backoff_secs = backoff, "Repeated rate limit violation");

        RateLimitDecision {
            retry_after: Some(backoff),
            violation_count: Some(violations),
            ..decision
        }
    }

    async fn record_violation(&self, key: &str) -> Result<u32, StoreError> {
        let count = self.store.incr(key).await?;
        // repair a counter left without expiry by an earlier failed PEXPIRE
        let ttl = self.store.pttl(key).await?;
        if count == 1 || ttl == TTL_NO_EXPIRY {
            self.store
                .pexpire(key, self.config.violation_ttl.as_millis() as u64)
                .await?;
        }
        u32::try_from(count)
            .map_err(|_| StoreError::Malformed(format!("violation count {}", count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::tests::DownStore;
    use crate::store::MemoryCounterStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};

    // memory store whose first PEXPIRE fails
    struct LossyExpiry {
        inner: MemoryCounterStore,
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl CounterStore for LossyExpiry {
        async fn incr(&self, key: &str) -> Result<i64, StoreError> {
            self.inner.incr(key).await
        }
        async fn pttl(&self, key: &str) -> Result<i64, StoreError> {
            self.inner.pttl(key).await
        }
        async fn pexpire(&self, key: &str, ttl_ms: u64) -> Result<bool, StoreError> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.pexpire(key, ttl_ms).await
        }
        async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
            self.inner.get(key).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    fn denied() -> RateLimitDecision {
        RateLimitDecision::denied(5, Utc::now(), 900)
    }

    fn allowed() -> RateLimitDecision {
        RateLimitDecision::allowed(5, 4, Utc::now())
    }

    #[test]
    fn delay_doubles_up_to_cap() {
        let config = BackoffConfig::default();
        let expected = [60, 120, 240, 480, 960, 1920, 3600, 3600];
        for (n, want) in expected.iter().enumerate() {
            assert_eq!(config.delay_secs(n as u32), *want);
        }
        assert_eq!(config.delay_secs(64), 3600);
        assert_eq!(config.delay_secs(u32::MAX), 3600);
    }

    #[tokio::test]
    async fn consecutive_denials_escalate() {
        let backoff = ViolationBackoff::new(
            Arc::new(MemoryCounterStore::new()),
            BackoffConfig::default(),
        );

        for n in 1..=8u32 {
            let result = backoff.apply("1.2.3.4", denied()).await;
            assert!(!result.allowed);
            assert_eq!(result.violation_count, Some(n));
            assert_eq!(result.retry_after, Some((2u64.pow(n) * 60).min(3600)));
        }
    }

    #[tokio::test]
    async fn success_resets_violations() {
        let store = Arc::new(MemoryCounterStore::new());
        let backoff = ViolationBackoff::new(store.clone(), BackoffConfig::default());

        backoff.apply("c", denied()).await;
        backoff.apply("c", denied()).await;

        let original = allowed();
        let passed = backoff.apply("c", original.clone()).await;
        assert_eq!(passed, original);
        assert_eq!(store.get(&violation_key("c")).await.unwrap(), None);

        let again = backoff.apply("c", denied()).await;
        assert_eq!(again.violation_count, Some(1));
        assert_eq!(again.retry_after, Some(120));
    }

    #[tokio::test(start_paused = true)]
    async fn violation_count_expires() {
        let store = Arc::new(MemoryCounterStore::new());
        let config = BackoffConfig {
            violation_ttl: Duration::from_secs(5),
            ..BackoffConfig::default()
        };
        let backoff = ViolationBackoff::new(store, config);

        backoff.apply("c", denied()).await;
        backoff.apply("c", denied()).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(backoff.apply("c", denied()).await.violation_count, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn violation_count_without_expiry_is_repaired() {
        let store = Arc::new(LossyExpiry {
            inner: MemoryCounterStore::new(),
            failed_once: AtomicBool::new(false),
        });
        let backoff = ViolationBackoff::new(store.clone(), BackoffConfig::default());
        let key = violation_key("c");

        // first denial: counter created but its expiry is lost
        let first = backoff.apply("c", denied()).await;
        assert_eq!(first.violation_count, None);
        assert_eq!(store.pttl(&key).await.unwrap(), TTL_NO_EXPIRY);

        let second = backoff.apply("c", denied()).await;
        assert_eq!(second.violation_count, Some(2));
        assert!(store.pttl(&key).await.unwrap() > 0);

        tokio::time::advance(Duration::from_secs(10 * 3600)).await;
        let later = backoff.apply("c", denied()).await;
        assert_eq!(later.violation_count, Some(1));
        assert_eq!(later.retry_after, Some(120));
    }

    #[tokio::test]
    async fn store_failure_keeps_limiter_hint() {
        let backoff = ViolationBackoff::new(Arc::new(DownStore), BackoffConfig::default());

        let result = backoff.apply("c", denied()).await;
        assert!(!result.allowed);
        assert_eq!(result.retry_after, Some(900));
        assert_eq!(result.violation_count, None);

        let passed = backoff.apply("c", allowed()).await;
        assert!(passed.allowed);
    }
}
