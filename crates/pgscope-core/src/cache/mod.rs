//! A bounded `fingerprint → bytes` store with freshness (TTL), capacity
//! (oldest-first eviction), and single-flight coalescing of concurrent
//! misses for the same fingerprint.

mod error;

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub use error::CacheError;

struct Entry {
    bytes: Vec<u8>,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

enum Slot {
    /// A publish is in flight; waiters block on the shared condvar until it
    /// resolves to `Ready` or is removed on failure.
    Pending,
    Ready(Entry),
}

struct Inner {
    slots: HashMap<String, Slot>,
    /// Insertion order, oldest first, for capacity eviction. A fingerprint
    /// may appear once; republishing moves it to the back.
    order: Vec<String>,
    total_bytes: usize,
    max_size: usize,
}

/// Outcome of a cache lookup-or-populate cycle.
pub enum Lookup {
    /// Fresh bytes, either already cached or just published by this caller.
    Hit(Vec<u8>),
    /// This caller must produce the bytes and call `publish` or `fail`.
    Miss,
}

pub struct Cache {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl Cache {
    pub fn new(max_size: usize) -> Self {
        Cache { inner: Mutex::new(Inner { slots: HashMap::new(), order: Vec::new(), total_bytes: 0, max_size }), condvar: Condvar::new() }
    }

    /// Looks up `fingerprint`. If fresh bytes are cached, returns them
    /// immediately. If a publish is already in flight for this fingerprint,
    /// blocks until it resolves. Otherwise marks this fingerprint pending and
    /// returns `Miss` — the caller must run the scrape and call `publish` or
    /// `fail`.
    pub fn get_or_claim(&self, fingerprint: &str) -> Lookup {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            match inner.slots.get(fingerprint) {
                Some(Slot::Ready(entry)) if entry.is_fresh(Instant::now()) => {
                    return Lookup::Hit(entry.bytes.clone());
                }
                Some(Slot::Ready(_)) => {
                    inner.slots.remove(fingerprint);
                    inner.order.retain(|f| f != fingerprint);
                    continue;
                }
                Some(Slot::Pending) => {
                    inner = self.condvar.wait(inner).unwrap_or_else(|p| p.into_inner());
                    continue;
                }
                None => {
                    inner.slots.insert(fingerprint.to_string(), Slot::Pending);
                    return Lookup::Miss;
                }
            }
        }
    }

    /// Publishes bytes for a fingerprint this caller claimed via `Miss`,
    /// waking any waiters. If the entry alone exceeds `max_size` it is not
    /// stored — the caller still receives its own bytes, uncached
    /// (`CACHE_OVERFLOW`, not surfaced to the client).
    pub fn publish(&self, fingerprint: &str, bytes: Vec<u8>, ttl: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if bytes.len() > inner.max_size {
            inner.slots.remove(fingerprint);
            self.condvar.notify_all();
            return;
        }
        evict_for_space(&mut inner, bytes.len());
        inner.total_bytes += bytes.len();
        inner.order.push(fingerprint.to_string());
        inner.slots.insert(fingerprint.to_string(), Slot::Ready(Entry { bytes, inserted_at: Instant::now(), ttl }));
        self.condvar.notify_all();
    }

    /// Releases a claimed-but-failed fingerprint; waiters observe a miss and
    /// must retry (they are not handed the error directly — the orchestrator
    /// surfaces 503 to its own caller instead).
    pub fn fail(&self, fingerprint: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.slots.remove(fingerprint);
        self.condvar.notify_all();
    }

    /// Drops every cached entry — backs the `clear prometheus` management
    /// verb and the reload epoch bump.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.slots.clear();
        inner.order.clear();
        inner.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_for_space(inner: &mut Inner, incoming: usize) {
    while inner.total_bytes + incoming > inner.max_size && !inner.order.is_empty() {
        let oldest = inner.order.remove(0);
        if let Some(Slot::Ready(entry)) = inner.slots.remove(&oldest) {
            inner.total_bytes = inner.total_bytes.saturating_sub(entry.bytes.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn miss_then_publish_then_hit() {
        let cache = Cache::new(1024);
        assert!(matches!(cache.get_or_claim("f1"), Lookup::Miss));
        cache.publish("f1", b"hello".to_vec(), Duration::from_secs(60));
        match cache.get_or_claim("f1") {
            Lookup::Hit(bytes) => assert_eq!(bytes, b"hello"),
            Lookup::Miss => panic!("expected hit"),
        }
    }

    #[test]
    fn expired_entries_are_treated_as_a_miss() {
        let cache = Cache::new(1024);
        cache.get_or_claim("f1");
        cache.publish("f1", b"stale".to_vec(), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(cache.get_or_claim("f1"), Lookup::Miss));
    }

    #[test]
    fn oversized_entry_is_not_stored() {
        let cache = Cache::new(4);
        cache.get_or_claim("f1");
        cache.publish("f1", b"toolong".to_vec(), Duration::from_secs(60));
        assert!(cache.is_empty());
        assert!(matches!(cache.get_or_claim("f1"), Lookup::Miss));
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let cache = Cache::new(10);
        cache.get_or_claim("a");
        cache.publish("a", vec![0u8; 6], Duration::from_secs(60));
        cache.get_or_claim("b");
        cache.publish("b", vec![0u8; 6], Duration::from_secs(60));
        // "a" should have been evicted to make room for "b".
        assert!(matches!(cache.get_or_claim("a"), Lookup::Miss));
        cache.fail("a");
        match cache.get_or_claim("b") {
            Lookup::Hit(bytes) => assert_eq!(bytes.len(), 6),
            Lookup::Miss => panic!("b should still be cached"),
        }
    }

    #[test]
    fn single_flight_coalesces_concurrent_claims() {
        let cache = Arc::new(Cache::new(1024));
        assert!(matches!(cache.get_or_claim("f1"), Lookup::Miss));

        let waiter_cache = Arc::clone(&cache);
        let waiter = thread::spawn(move || match waiter_cache.get_or_claim("f1") {
            Lookup::Hit(bytes) => bytes,
            Lookup::Miss => panic!("waiter should not win the claim"),
        });

        thread::sleep(Duration::from_millis(20));
        cache.publish("f1", b"winner".to_vec(), Duration::from_secs(60));

        let got = waiter.join().unwrap();
        assert_eq!(got, b"winner");
    }
}
