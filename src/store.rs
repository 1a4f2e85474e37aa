// counter stores - redis when shared, memory for dev and tests

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

// ttl reply for a key that exists but never received an expiry
pub const TTL_NO_EXPIRY: i64 = -1;
// ttl reply for a key that does not exist
pub const TTL_MISSING: i64 = -2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed counter store reply: {0}")]
    Malformed(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.kind() == redis::ErrorKind::TypeError {
            StoreError::Malformed(e.to_string())
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    // remaining time to live in milliseconds, `TTL_NO_EXPIRY` or `TTL_MISSING`
    async fn pttl(&self, key: &str) -> Result<i64, StoreError>;

    // set the key's expiry; false when the key does not exist
    async fn pexpire(&self, key: &str, ttl_ms: u64) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

pub struct RedisCounterStore {
    connection_manager: ConnectionManager,
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection_manager = ConnectionManager::new(client).await?;

        let mut conn = connection_manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        debug!("Connected to redis counter store");
        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection_manager.clone();
        let count = redis::cmd("INCR")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(count)
    }

    async fn pttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection_manager.clone();
        let ttl = redis::cmd("PTTL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(ttl)
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> Result<bool, StoreError> {
        let mut conn = self.connection_manager.clone();
        let applied = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.connection_manager.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<Option<i64>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }
}

// Counter entry with optional expiry
#[derive(Clone, Debug)]
struct CounterEntry {
    value: i64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, CounterEntry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// in-process maps whose entries lapse and need sweeping
pub trait Purge: Send + Sync {
    // drop expired entries, returns how many were removed
    fn purge_expired(&self) -> usize;
    fn len(&self) -> usize;
}

impl Purge for MemoryCounterStore {
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(CounterEntry {
                value: 0,
                expires_at: None,
            });

        // expired counters start over without an expiry, like a fresh key
        if entry.is_expired(now) {
            entry.value = 0;
            entry.expires_at = None;
        }

        entry.value += 1;
        Ok(entry.value)
    }

    async fn pttl(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let ttl = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match entry.expires_at {
                Some(at) => at.saturating_duration_since(now).as_millis() as i64,
                None => TTL_NO_EXPIRY,
            },
            _ => TTL_MISSING,
        };
        Ok(ttl)
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + Duration::from_millis(ttl_ms));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

// Background sweep - runs every interval
pub async fn purge_worker<P: Purge + ?Sized>(target: Arc<P>, every: Duration, name: &'static str) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;
        let removed = target.purge_expired();
        if removed > 0 {
            debug!(map = name, removed, remaining = target.len(), "Purged expired entries");
        }
    }
}

// build the configured store, falling back to memory when redis is unreachable
pub async fn connect_store(
    redis_url: Option<&str>,
) -> (Arc<dyn CounterStore>, Option<Arc<MemoryCounterStore>>) {
    if let Some(url) = redis_url {
        match RedisCounterStore::connect(url).await {
            Ok(store) => {
                let shared: Arc<dyn CounterStore> = Arc::new(store);
                return (shared, None);
            }
            Err(e) => {
                warn!(error = %e, "Redis counter store unreachable, falling back to in-memory counters");
            }
        }
    }

    let memory = Arc::new(MemoryCounterStore::new());
    let shared: Arc<dyn CounterStore> = memory.clone();
    (shared, Some(memory))
}
