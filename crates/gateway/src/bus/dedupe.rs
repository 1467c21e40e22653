//! Inbound idempotency.
//!
//! Transports redeliver events (webhook retries, reconnect replays).  Each
//! inbound message ID is remembered for a TTL; a repeat within the window is
//! dropped by the dedupe middleware.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub struct DedupeStore {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record an event ID.  Returns `true` when the ID was already seen
    /// within the TTL (i.e. the event is a duplicate).
    pub fn seen(&self, id: &str) -> bool {
        let mut seen = self.seen.lock();
        let now = Instant::now();
        match seen.get(id) {
            Some(at) if now.duration_since(*at) < self.ttl => true,
            _ => {
                seen.insert(id.to_owned(), now);
                false
            }
        }
    }

    /// Drop expired entries.  Called periodically.
    pub fn prune(&self) {
        let now = Instant::now();
        self.seen
            .lock()
            .retain(|_, at| now.duration_since(*at) < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_a_duplicate() {
        let store = DedupeStore::new(Duration::from_secs(60));
        assert!(!store.seen("m1"));
        assert!(store.seen("m1"));
        assert!(!store.seen("m2"));
    }

    #[test]
    fn expired_entries_are_forgotten() {
        let store = DedupeStore::new(Duration::from_millis(0));
        assert!(!store.seen("m1"));
        // Zero TTL: the entry expires immediately.
        assert!(!store.seen("m1"));
    }

    #[test]
    fn prune_clears_expired() {
        let store = DedupeStore::new(Duration::from_millis(0));
        store.seen("m1");
        store.seen("m2");
        store.prune();
        assert!(store.is_empty());
    }
}
