//! Priority-keyed offload cache.
//!
//! Messages squeezed out of a live session land here, keyed by
//! `(session_id, seq)` with a priority. Eviction drains the lowest non-empty
//! priority bucket first, oldest entry first; a priority change removes the
//! key from its old bucket before inserting into the new one, so a key never
//! appears in two buckets.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::types::ContextMessage;

/// Cache key: one offloaded message of one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OffloadKey {
    pub session_id: String,
    pub seq: u64,
}

struct OffloadEntry {
    message: ContextMessage,
    priority: i64,
    stored_at: Instant,
}

#[derive(Default)]
struct OffloadInner {
    entries: HashMap<OffloadKey, OffloadEntry>,
    buckets: BTreeMap<i64, Vec<OffloadKey>>,
}

impl OffloadInner {
    fn bucket_insert(&mut self, key: OffloadKey, priority: i64) {
        let bucket = self.buckets.entry(priority).or_default();
        if !bucket.contains(&key) {
            bucket.push(key);
        }
    }

    fn bucket_remove(&mut self, key: &OffloadKey, priority: i64) {
        if let Some(bucket) = self.buckets.get_mut(&priority) {
            bucket.retain(|k| k != key);
            if bucket.is_empty() {
                self.buckets.remove(&priority);
            }
        }
    }

    /// Move a key between buckets without leaving a stale reference behind.
    fn reindex(&mut self, key: &OffloadKey, old_priority: i64, new_priority: i64) {
        self.bucket_remove(key, old_priority);
        self.bucket_insert(key.clone(), new_priority);
    }

    fn evict_lowest(&mut self) -> Option<OffloadKey> {
        let lowest = *self.buckets.keys().next()?;
        let bucket = self.buckets.get_mut(&lowest)?;
        let victim = bucket.remove(0);
        if bucket.is_empty() {
            self.buckets.remove(&lowest);
        }
        self.entries.remove(&victim);
        Some(victim)
    }
}

/// Cache statistics for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct OffloadStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub priorities: BTreeMap<i64, usize>,
}

pub struct OffloadCache {
    max_size: usize,
    ttl: Duration,
    inner: Mutex<OffloadInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl OffloadCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            ttl,
            inner: Mutex::new(OffloadInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Store a message under its key. At capacity, the lowest-priority,
    /// oldest entry is evicted first.
    pub fn offload(&self, key: OffloadKey, message: ContextMessage, priority: i64) {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.entries.get(&key) {
            let old_priority = existing.priority;
            inner.reindex(&key, old_priority, priority);
        } else {
            inner.bucket_insert(key.clone(), priority);
        }
        inner.entries.insert(
            key,
            OffloadEntry {
                message,
                priority,
                stored_at: Instant::now(),
            },
        );

        while inner.entries.len() > self.max_size {
            if let Some(victim) = inner.evict_lowest() {
                debug!(session = %victim.session_id, seq = victim.seq, "Evicted offloaded message");
            } else {
                break;
            }
        }
    }

    /// Load a message back. A hit bumps the entry's priority by one so
    /// frequently restored messages outlive cold ones.
    pub fn load(&self, key: &OffloadKey) -> Option<ContextMessage> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let message = entry.message.clone();
        let old_priority = entry.priority;
        entry.priority += 1;
        entry.stored_at = Instant::now();
        inner.reindex(key, old_priority, old_priority + 1);

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(message)
    }

    /// Remove a key outright. Returns whether it existed.
    pub fn remove(&self, key: &OffloadKey) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(key) {
            Some(entry) => {
                inner.bucket_remove(key, entry.priority);
                true
            }
            None => false,
        }
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<(OffloadKey, i64)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() > self.ttl)
            .map(|(key, entry)| (key.clone(), entry.priority))
            .collect();

        for (key, priority) in &expired {
            inner.entries.remove(key);
            inner.bucket_remove(key, *priority);
        }
        expired.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.buckets.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> OffloadStats {
        let inner = self.inner.lock();
        OffloadStats {
            size: inner.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            priorities: inner
                .buckets
                .iter()
                .map(|(priority, keys)| (*priority, keys.len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_common::ChatRole;

    fn key(session: &str, seq: u64) -> OffloadKey {
        OffloadKey {
            session_id: session.into(),
            seq,
        }
    }

    fn message(seq: u64) -> ContextMessage {
        ContextMessage {
            role: ChatRole::User,
            content: format!("message {seq}").into(),
            seq,
        }
    }

    fn cache(max_size: usize) -> OffloadCache {
        OffloadCache::new(max_size, Duration::from_secs(300))
    }

    #[test]
    fn load_returns_offloaded_message_and_counts_hit() {
        let cache = cache(10);
        cache.offload(key("s1", 1), message(1), 0);

        let loaded = cache.load(&key("s1", 1)).unwrap();
        assert_eq!(loaded.seq, 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);

        assert!(cache.load(&key("s1", 99)).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn priority_bump_moves_key_between_buckets() {
        let cache = cache(10);
        cache.offload(key("s1", 1), message(1), 0);
        cache.load(&key("s1", 1));

        let stats = cache.stats();
        // The key left bucket 0 entirely; it lives only in bucket 1 now.
        assert_eq!(stats.priorities.get(&0), None);
        assert_eq!(stats.priorities.get(&1), Some(&1));
    }

    #[test]
    fn eviction_takes_lowest_priority_bucket_first() {
        let cache = cache(2);
        cache.offload(key("s1", 1), message(1), 5);
        cache.offload(key("s1", 2), message(2), 0);
        cache.offload(key("s1", 3), message(3), 5);

        assert_eq!(cache.len(), 2);
        assert!(cache.load(&key("s1", 2)).is_none());
        assert!(cache.load(&key("s1", 1)).is_some());
        assert!(cache.load(&key("s1", 3)).is_some());
    }

    #[test]
    fn reoffload_with_new_priority_leaves_single_bucket_entry() {
        let cache = cache(10);
        cache.offload(key("s1", 1), message(1), 0);
        cache.offload(key("s1", 1), message(1), 7);

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        let total: usize = stats.priorities.values().sum();
        assert_eq!(total, 1);
        assert_eq!(stats.priorities.get(&7), Some(&1));
    }

    #[test]
    fn ttl_sweep_removes_stale_entries() {
        let cache = OffloadCache::new(10, Duration::from_millis(1));
        cache.offload(key("s1", 1), message(1), 0);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_clears_bucket_reference() {
        let cache = cache(10);
        cache.offload(key("s1", 1), message(1), 3);
        assert!(cache.remove(&key("s1", 1)));
        assert!(!cache.remove(&key("s1", 1)));
        assert!(cache.stats().priorities.is_empty());
    }
}
