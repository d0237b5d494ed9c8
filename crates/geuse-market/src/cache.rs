//! Process-wide TTL cache, guarded for concurrent readers and writers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default lifetime for pricing data.
pub const DEFAULT_TTL: Duration = Duration::from_secs(900);

pub struct TtlCache<V: Clone> {
    ttl: Duration,
    store: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            store: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut store = self.store.lock().expect("ttl cache poisoned");
        match store.get(key) {
            Some((expires_at, value)) if Instant::now() < *expires_at => Some(value.clone()),
            Some(_) => {
                store.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        let mut store = self.store.lock().expect("ttl cache poisoned");
        store.insert(key.into(), (Instant::now() + self.ttl, value));
    }

    pub fn invalidate(&self, key: Option<&str>) {
        let mut store = self.store.lock().expect("ttl cache poisoned");
        match key {
            Some(k) => {
                store.remove(k);
            }
            None => store.clear(),
        }
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_ttl() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(10));
        cache.set("k", 1);
        assert_eq!(cache.get("k"), Some(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn invalidate_clears_selected_or_all() {
        let cache: TtlCache<u32> = TtlCache::default();
        cache.set("a", 1);
        cache.set("b", 2);
        cache.invalidate(Some("a"));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        cache.invalidate(None);
        assert_eq!(cache.get("b"), None);
    }
}
