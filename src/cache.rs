//! Short-lived response cache with an injectable clock.
//!
//! Freshness decisions go through the [`Clock`] trait so tests can control
//! time instead of sleeping against the wall clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Source of monotonic time for freshness checks
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock backed [`Clock`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A string-keyed cache whose entries go stale after a fixed TTL.
///
/// Stale entries are kept until overwritten; `get` reports staleness so the
/// caller decides whether to serve or refetch.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: HashMap<String, (V, Instant)>,
    clock: Box<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Box::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            clock,
        }
    }

    /// Look up a key, returning the value and whether it is still fresh.
    pub fn get(&self, key: &str) -> Option<(V, bool)> {
        let now = self.clock.now();
        self.entries.get(key).map(|(value, stored_at)| {
            let is_fresh = now.duration_since(*stored_at) < self.ttl;
            (value.clone(), is_fresh)
        })
    }

    /// Store a value, restarting its freshness window.
    pub fn put(&mut self, key: &str, value: V) {
        let now = self.clock.now();
        self.entries.insert(key.to_string(), (value, now));
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Clock whose current time is advanced by hand
    #[derive(Clone)]
    struct ManualClock {
        base: Instant,
        offset: Arc<Mutex<Duration>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }

    #[test]
    fn test_fresh_within_ttl() {
        let clock = ManualClock::new();
        let mut cache = TtlCache::with_clock(Duration::from_secs(30), Box::new(clock.clone()));

        cache.put("bundle", 1u32);
        let (value, is_fresh) = cache.get("bundle").unwrap();
        assert_eq!(value, 1);
        assert!(is_fresh);

        clock.advance(Duration::from_secs(29));
        let (_, is_fresh) = cache.get("bundle").unwrap();
        assert!(is_fresh);
    }

    #[test]
    fn test_stale_after_ttl() {
        let clock = ManualClock::new();
        let mut cache = TtlCache::with_clock(Duration::from_secs(30), Box::new(clock.clone()));

        cache.put("bundle", 1u32);
        clock.advance(Duration::from_secs(31));

        let (value, is_fresh) = cache.get("bundle").unwrap();
        assert_eq!(value, 1);
        assert!(!is_fresh);
    }

    #[test]
    fn test_put_restarts_freshness() {
        let clock = ManualClock::new();
        let mut cache = TtlCache::with_clock(Duration::from_secs(30), Box::new(clock.clone()));

        cache.put("bundle", 1u32);
        clock.advance(Duration::from_secs(31));
        cache.put("bundle", 2u32);

        let (value, is_fresh) = cache.get("bundle").unwrap();
        assert_eq!(value, 2);
        assert!(is_fresh);
    }

    #[test]
    fn test_miss_and_invalidate() {
        let mut cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(30));
        assert!(cache.get("missing").is_none());

        cache.put("bundle", 1);
        cache.invalidate("bundle");
        assert!(cache.get("bundle").is_none());
    }
}
