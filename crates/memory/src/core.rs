//! Core memory: keyed, bounded, importance-ranked facts per user.
//!
//! A write-through cache fronts the store. The cache loads lazily behind a
//! double-checked async lock, reads serve from the in-memory snapshot, and
//! access counters batch into a single store update with at most one flush
//! in flight per user.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use murmur_common::{MurmurError, Result};
use murmur_store::{CoreFactRow, Store};

use crate::types::{validate_importance, MemoryStats};

/// Hours for the eviction recency factor to fall to 1/e.
const RECENCY_DECAY_HOURS: f64 = 168.0;

struct CoreState {
    cache: RwLock<HashMap<String, CoreFactRow>>,
    loaded: AtomicBool,
    load_lock: Mutex<()>,
    pending_access: std::sync::Mutex<HashSet<String>>,
    flush_in_flight: AtomicBool,
}

pub struct CoreMemory {
    user_id: String,
    store: Store,
    max_items: usize,
    state: Arc<CoreState>,
}

/// Composite eviction score; the lowest-scoring fact is evicted first.
fn eviction_score(fact: &CoreFactRow) -> f64 {
    let reference = fact.last_accessed.unwrap_or(fact.created_at);
    let age_hours = (Utc::now() - reference).num_seconds().max(0) as f64 / 3600.0;
    let recency_factor = (-age_hours / RECENCY_DECAY_HOURS).exp();
    fact.importance * recency_factor + (1.0 + fact.access_count as f64).ln()
}

impl CoreMemory {
    pub fn new(user_id: impl Into<String>, store: Store, max_items: usize) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            max_items,
            state: Arc::new(CoreState {
                cache: RwLock::new(HashMap::new()),
                loaded: AtomicBool::new(false),
                load_lock: Mutex::new(()),
                pending_access: std::sync::Mutex::new(HashSet::new()),
                flush_in_flight: AtomicBool::new(false),
            }),
        }
    }

    async fn ensure_loaded(&self) -> Result<()> {
        if self.state.loaded.load(Ordering::Acquire) {
            return Ok(());
        }

        let _guard = self.state.load_lock.lock().await;
        if self.state.loaded.load(Ordering::Acquire) {
            return Ok(());
        }

        let rows = self.store.core_list(&self.user_id, self.max_items).await?;
        {
            let mut cache = self.state.cache.write().await;
            for row in rows {
                cache.insert(row.key.clone(), row);
            }
            debug!(count = cache.len(), "Loaded core memory");
        }
        self.state.loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Queue an access-counter bump and make sure exactly one flush task is
    /// in flight for this user.
    fn schedule_access_update(&self, key: &str) {
        self.state
            .pending_access
            .lock()
            .expect("pending access set is never poisoned")
            .insert(key.to_string());

        if self
            .state
            .flush_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let state = Arc::clone(&self.state);
        let store = self.store.clone();
        let user_id = self.user_id.clone();
        tokio::spawn(async move {
            let keys: Vec<String> = {
                let mut pending = state
                    .pending_access
                    .lock()
                    .expect("pending access set is never poisoned");
                pending.drain().collect()
            };

            if !keys.is_empty() {
                match store.core_bump_access(&user_id, &keys).await {
                    Ok(()) => {
                        let mut cache = state.cache.write().await;
                        for key in &keys {
                            if let Some(fact) = cache.get_mut(key) {
                                fact.access_count += 1;
                                fact.last_accessed = Some(Utc::now());
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Access counter flush failed");
                    }
                }
            }
            state.flush_in_flight.store(false, Ordering::Release);
        });
    }

    /// Store or update a fact. Returns its id.
    pub async fn add(
        &self,
        key: &str,
        value: &str,
        importance: f64,
        metadata: Option<serde_json::Value>,
    ) -> Result<String> {
        if key.trim().is_empty() {
            return Err(MurmurError::memory("core", "key cannot be empty"));
        }
        if value.trim().is_empty() {
            return Err(MurmurError::memory_key("core", key, "value cannot be empty"));
        }
        validate_importance("core", importance)?;

        self.ensure_loaded().await?;

        // Evict before inserting a brand-new key at capacity.
        let is_new = !self.state.cache.read().await.contains_key(key);
        if is_new {
            while self.state.cache.read().await.len() >= self.max_items {
                self.evict_lowest().await?;
            }
        }

        let metadata = metadata.unwrap_or_else(|| serde_json::json!({}));
        let row = self
            .store
            .core_upsert(&self.user_id, key, value, importance, &metadata)
            .await?;
        let id = row.id.clone();
        self.state.cache.write().await.insert(key.to_string(), row);
        debug!(new = is_new, "Stored core fact");
        Ok(id)
    }

    /// Fetch a value from the snapshot. Access counters update in the
    /// background, not on the read path.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        if key.is_empty() {
            return Err(MurmurError::memory("core", "key cannot be empty"));
        }
        self.ensure_loaded().await?;

        let value = self
            .state
            .cache
            .read()
            .await
            .get(key)
            .map(|fact| fact.value.clone());
        if value.is_some() {
            self.schedule_access_update(key);
        }
        Ok(value)
    }

    /// All facts, optionally filtered by key substring.
    pub async fn list(&self, filter: Option<&str>) -> Result<Vec<CoreFactRow>> {
        self.ensure_loaded().await?;
        let cache = self.state.cache.read().await;
        let mut facts: Vec<CoreFactRow> = cache
            .values()
            .filter(|fact| match filter {
                Some(needle) => fact.key.contains(needle),
                None => true,
            })
            .cloned()
            .collect();
        facts.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(facts)
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        if key.is_empty() {
            return Err(MurmurError::memory("core", "key cannot be empty"));
        }
        self.ensure_loaded().await?;

        let deleted = self.store.core_delete(&self.user_id, key).await?;
        if deleted {
            self.state.cache.write().await.remove(key);
        }
        Ok(deleted)
    }

    /// Case-insensitive substring search over keys and values.
    pub async fn search_substring(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        self.ensure_loaded().await?;
        let needle = query.to_lowercase();
        let cache = self.state.cache.read().await;
        let mut keys: Vec<String> = cache
            .iter()
            .filter(|(key, fact)| {
                key.to_lowercase().contains(&needle) || fact.value.to_lowercase().contains(&needle)
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys.truncate(limit);
        Ok(keys)
    }

    /// Wait for queued access-counter updates to reach the store. Test and
    /// shutdown hook; production readers never block on this.
    pub async fn flush_access_updates(&self) -> Result<()> {
        loop {
            let drained = {
                let pending = self
                    .state
                    .pending_access
                    .lock()
                    .expect("pending access set is never poisoned");
                pending.is_empty()
            };
            if drained && !self.state.flush_in_flight.load(Ordering::Acquire) {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        self.ensure_loaded().await?;
        let cache = self.state.cache.read().await;
        let item_count = cache.len();
        let avg_importance = if item_count == 0 {
            0.0
        } else {
            cache.values().map(|f| f.importance).sum::<f64>() / item_count as f64
        };
        Ok(MemoryStats {
            tier: "core".into(),
            item_count,
            max_items: Some(self.max_items),
            usage_percent: Some(item_count as f64 / self.max_items as f64 * 100.0),
            avg_importance,
            total_access_count: cache.values().map(|f| f.access_count).sum(),
        })
    }

    async fn evict_lowest(&self) -> Result<()> {
        let victim = {
            let cache = self.state.cache.read().await;
            cache
                .values()
                .min_by(|a, b| {
                    eviction_score(a)
                        .partial_cmp(&eviction_score(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|fact| fact.key.clone())
        };
        let Some(key) = victim else {
            return Ok(());
        };

        warn!(hashed_key = %murmur_common::security::content_hash(&key), "Evicting core fact at capacity");
        self.store.core_delete(&self.user_id, &key).await?;
        self.state.cache.write().await.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(max_items: usize) -> CoreMemory {
        CoreMemory::new("u1", Store::open_in_memory().unwrap(), max_items)
    }

    #[tokio::test]
    async fn add_and_get_roundtrip() {
        let core = memory(10);
        core.add("timezone", "America/Sao_Paulo", 0.8, None)
            .await
            .unwrap();
        assert_eq!(
            core.get("timezone").await.unwrap().as_deref(),
            Some("America/Sao_Paulo")
        );
        assert!(core.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn re_storing_updates_not_duplicates() {
        let core = memory(10);
        core.add("timezone", "UTC", 0.5, None).await.unwrap();
        core.add("timezone", "Europe/Lisbon", 0.9, None).await.unwrap();

        let stats = core.stats().await.unwrap();
        assert_eq!(stats.item_count, 1);
        assert_eq!(
            core.get("timezone").await.unwrap().as_deref(),
            Some("Europe/Lisbon")
        );
    }

    #[tokio::test]
    async fn rejects_empty_key_and_value() {
        let core = memory(10);
        assert!(core.add(" ", "value", 0.5, None).await.is_err());
        assert!(core.add("key", "  ", 0.5, None).await.is_err());
        assert!(core.add("key", "value", 1.5, None).await.is_err());
    }

    #[tokio::test]
    async fn capacity_evicts_lowest_scoring_fact() {
        let core = memory(3);
        core.add("keep-a", "v", 0.9, None).await.unwrap();
        core.add("keep-b", "v", 0.8, None).await.unwrap();
        core.add("drop-me", "v", 0.01, None).await.unwrap();

        // Raise access counts on the keepers so the score gap is decisive.
        core.get("keep-a").await.unwrap();
        core.get("keep-b").await.unwrap();
        core.flush_access_updates().await.unwrap();

        core.add("newcomer", "v", 0.7, None).await.unwrap();

        let stats = core.stats().await.unwrap();
        assert_eq!(stats.item_count, 3);
        assert!(core.get("drop-me").await.unwrap().is_none());
        assert!(core.get("newcomer").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn access_counts_flush_in_one_batch() {
        let core = memory(10);
        core.add("a", "v", 0.5, None).await.unwrap();
        core.add("b", "v", 0.5, None).await.unwrap();

        core.get("a").await.unwrap();
        core.get("b").await.unwrap();
        core.get("a").await.unwrap();
        core.flush_access_updates().await.unwrap();

        let stats = core.stats().await.unwrap();
        // Each key flushes at most once per batch, so 2..=3 total bumps.
        assert!(stats.total_access_count >= 2);
    }

    #[tokio::test]
    async fn concurrent_loads_do_not_double_load() {
        let store = Store::open_in_memory().unwrap();
        store
            .core_upsert("u1", "seeded", "value", 0.5, &serde_json::json!({}))
            .await
            .unwrap();
        let core = Arc::new(CoreMemory::new("u1", store, 10));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let core = Arc::clone(&core);
            handles.push(tokio::spawn(async move { core.get("seeded").await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_some());
        }
        assert_eq!(core.stats().await.unwrap().item_count, 1);
    }

    #[tokio::test]
    async fn substring_search_covers_keys_and_values() {
        let core = memory(10);
        core.add("timezone", "America/Sao_Paulo", 0.5, None)
            .await
            .unwrap();
        core.add("editor", "helix", 0.5, None).await.unwrap();

        let by_key = core.search_substring("time", 10).await.unwrap();
        assert_eq!(by_key, vec!["timezone".to_string()]);

        let by_value = core.search_substring("helix", 10).await.unwrap();
        assert_eq!(by_value, vec!["editor".to_string()]);
    }

    #[tokio::test]
    async fn two_concurrent_writers_leave_one_value() {
        let store = Store::open_in_memory().unwrap();
        let a = Arc::new(CoreMemory::new("u1", store.clone(), 10));
        let b = Arc::new(CoreMemory::new("u1", store.clone(), 10));

        let (ra, rb) = tokio::join!(
            a.add("color", "red", 0.5, None),
            b.add("color", "blue", 0.5, None)
        );
        ra.unwrap();
        rb.unwrap();

        assert_eq!(store.core_count("u1").await.unwrap(), 1);
        let rows = store.core_list("u1", 10).await.unwrap();
        assert!(rows[0].value == "red" || rows[0].value == "blue");
    }
}
