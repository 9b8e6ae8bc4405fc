//! Bounded memory of processed event ids.

use kernbus_types::EventId;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Remembers ids of events that reached a terminal outcome.
///
/// Entries expire after `ttl` and the oldest entry is evicted when
/// `capacity` is reached, so memory stays bounded under sustained load.
#[derive(Debug)]
pub(crate) struct DedupCache {
    ttl: Duration,
    capacity: usize,
    order: VecDeque<(EventId, Instant)>,
    members: HashMap<EventId, Instant>,
}

impl DedupCache {
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            order: VecDeque::new(),
            members: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, id: EventId) {
        let now = Instant::now();
        self.evict_expired(now);

        while self.members.len() >= self.capacity {
            if !self.pop_oldest() {
                break;
            }
        }

        self.members.insert(id, now);
        self.order.push_back((id, now));
    }

    pub(crate) fn contains(&self, id: &EventId) -> bool {
        self.members
            .get(id)
            .is_some_and(|seen| seen.elapsed() < self.ttl)
    }

    /// Ids currently cached, including expired ones not yet evicted.
    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&(id, seen)) = self.order.front() {
            if now.duration_since(seen) < self.ttl {
                break;
            }
            self.order.pop_front();
            self.forget_if_current(id, seen);
        }
    }

    fn pop_oldest(&mut self) -> bool {
        match self.order.pop_front() {
            Some((id, seen)) => {
                self.forget_if_current(id, seen);
                true
            }
            None => false,
        }
    }

    // An id re-inserted after expiry leaves a stale order entry behind.
    fn forget_if_current(&mut self, id: EventId, seen: Instant) {
        if self.members.get(&id) == Some(&seen) {
            self.members.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_inserted_ids() {
        let mut cache = DedupCache::new(10, Duration::from_secs(60));
        let id = EventId::new();
        assert!(!cache.contains(&id));
        cache.insert(id);
        assert!(cache.contains(&id));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut cache = DedupCache::new(2, Duration::from_secs(60));
        let (a, b, c) = (EventId::new(), EventId::new(), EventId::new());
        cache.insert(a);
        cache.insert(b);
        cache.insert(c);

        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let mut cache = DedupCache::new(10, Duration::from_millis(100));
        let id = EventId::new();
        cache.insert(id);

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(cache.contains(&id));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(!cache.contains(&id));

        // expired entries are dropped on the next insert
        cache.insert(EventId::new());
        assert_eq!(cache.len(), 1);
    }
}
