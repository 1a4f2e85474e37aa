// process-local counters for degraded mode
// not shared between instances, outage limit is cap * instance_count

use dashmap::DashMap;
use tokio::time::{Duration, Instant};

use crate::store::Purge;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalWindow {
    pub count: u32,
    pub reset_at: Instant,
}

impl LocalWindow {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.reset_at <= now
    }
}

pub trait LocalCounters: Send + Sync {
    fn get(&self, key: &str) -> Option<LocalWindow>;
    fn set(&self, key: &str, window: LocalWindow);
    fn delete(&self, key: &str);

    // count one hit against `key`, opening a new window when the old one lapsed
    fn hit(&self, key: &str, window: Duration) -> LocalWindow {
        let now = Instant::now();
        let next = match self.get(key) {
            Some(current) if !current.is_expired(now) => LocalWindow {
                count: current.count.saturating_add(1),
                reset_at: current.reset_at,
            },
            _ => LocalWindow {
                count: 1,
                reset_at: now + window,
            },
        };
        self.set(key, next);
        next
    }
}

#[derive(Default)]
pub struct ProcessLocalCounters {
    windows: DashMap<String, LocalWindow>,
}

impl ProcessLocalCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

// lapsed windows are only reset on the next hit, the sweep drops the rest
impl Purge for ProcessLocalCounters {
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now));
        before.saturating_sub(self.windows.len())
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

impl LocalCounters for ProcessLocalCounters {
    fn get(&self, key: &str) -> Option<LocalWindow> {
        self.windows.get(key).map(|w| *w)
    }

    fn set(&self, key: &str, window: LocalWindow) {
        self.windows.insert(key.to_string(), window);
    }

    fn delete(&self, key: &str) {
        self.windows.remove(key);
    }

    // single shard lock so concurrent hits on one key cannot lose counts
    fn hit(&self, key: &str, window: Duration) -> LocalWindow {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(LocalWindow {
            count: 0,
            reset_at: now + window,
        });

        if entry.is_expired(now) {
            entry.count = 0;
            entry.reset_at = now + window;
        }
        entry.count = entry.count.saturating_add(1);
        *entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn hits_accumulate_within_window() {
        let counters = ProcessLocalCounters::new();
        let window = Duration::from_secs(10);

        assert_eq!(counters.hit("a", window).count, 1);
        assert_eq!(counters.hit("a", window).count, 2);
        assert_eq!(counters.hit("b", window).count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lapsed_window_starts_over() {
        let counters = ProcessLocalCounters::new();
        let window = Duration::from_secs(10);
        let first = counters.hit("a", window);
        counters.hit("a", window);

        tokio::time::advance(window).await;
        let fresh = counters.hit("a", window);
        assert_eq!(fresh.count, 1);
        assert!(fresh.reset_at > first.reset_at);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_lapsed_windows() {
        let counters = ProcessLocalCounters::new();
        let window = Duration::from_secs(1);
        for i in 0..10_000 {
            counters.hit(&format!("ratelimit:10.0.{}.{}:/api/contact", i / 256, i % 256), window);
        }
        assert_eq!(counters.len(), 10_000);

        counters.hit("ratelimit:live:/api/contact", Duration::from_secs(7200));
        tokio::time::advance(Duration::from_secs(3600)).await;

        assert_eq!(counters.purge_expired(), 10_000);
        assert_eq!(counters.len(), 1);
        assert_eq!(counters.get("ratelimit:live:/api/contact").map(|w| w.count), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_worker_sweeps_on_interval() {
        let counters = std::sync::Arc::new(ProcessLocalCounters::new());
        counters.hit("k", Duration::from_secs(1));

        let worker = tokio::spawn(crate::store::purge_worker(
            counters.clone(),
            Duration::from_secs(60),
            "degraded",
        ));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(counters.len(), 0);
        worker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn default_hit_goes_through_get_and_set() {
        // map without its own hit override
        struct Plain(std::sync::Mutex<std::collections::HashMap<String, LocalWindow>>);
        impl LocalCounters for Plain {
            fn get(&self, key: &str) -> Option<LocalWindow> {
                self.0.lock().unwrap().get(key).copied()
            }
            fn set(&self, key: &str, window: LocalWindow) {
                self.0.lock().unwrap().insert(key.to_string(), window);
            }
            fn delete(&self, key: &str) {
                self.0.lock().unwrap().remove(key);
            }
        }

        let counters = Plain(Default::default());
        let window = Duration::from_secs(1);
        counters.hit("k", window);
        assert_eq!(counters.hit("k", window).count, 2);

        counters.delete("k");
        assert!(counters.get("k").is_none());
        assert_eq!(counters.hit("k", window).count, 1);
    }
}
