//! Result Cache Module
//!
//! Stores the latest result per fingerprint.
//!
//! ## Design
//!
//! Freshness is decided by the caller: every lookup carries a [`MaxAge`]
//! compared against the entry's `computed_at` using the injected clock's
//! time. An entry found too old for the caller is dropped. Beyond
//! `max_entries` the least recently used entry is evicted.
//!
//! Results also get a monotonically increasing [`ResultId`] so finished jobs
//! can point at the payload they produced.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::data_source::QueryResultData;
use super::fingerprint::Fingerprint;

pub type ResultId = u64;

/// How old a cached result may be and still be reused
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MaxAge {
    /// Reuse the latest result regardless of age
    #[default]
    Any,
    /// Reuse only results computed within the window; zero skips the cache
    Within(Duration),
}

impl MaxAge {
    pub fn secs(secs: u64) -> Self {
        MaxAge::Within(Duration::from_secs(secs))
    }

    /// Negative values mean "any age", as API callers pass `-1`.
    pub fn from_secs_signed(secs: i64) -> Self {
        if secs < 0 {
            MaxAge::Any
        } else {
            MaxAge::secs(secs.unsigned_abs())
        }
    }

    /// Forced re-execution: the cache is not consulted at all.
    pub fn skips_cache(self) -> bool {
        self == MaxAge::Within(Duration::ZERO)
    }

    fn admits(self, computed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            MaxAge::Any => true,
            MaxAge::Within(window) => match (now - computed_at).to_std() {
                Ok(age) => age <= window,
                // Computed "in the future" by a skewed clock: fresh.
                Err(_) => true,
            },
        }
    }
}

/// One stored query result
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub id: ResultId,
    pub fingerprint: Fingerprint,
    /// Text that produced the payload, as executed
    pub query_text: String,
    pub payload: Arc<QueryResultData>,
    pub computed_at: DateTime<Utc>,
    pub runtime: Duration,
}

#[derive(Debug)]
struct CacheEntry {
    result: Arc<CachedResult>,
    last_accessed: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: usize,

    /// Number of cache misses
    pub misses: usize,

    /// Number of entries currently in cache
    pub size: usize,

    /// Number of entries evicted for capacity
    pub evictions: usize,

    /// Number of entries dropped as too old for a caller
    pub expirations: usize,
}

impl CacheStats {
    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    by_id: HashMap<ResultId, Fingerprint>,
    next_id: ResultId,
    tick: u64,
    stats: CacheStats,
}

impl CacheState {
    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.entries.remove(fingerprint)?;
        self.by_id.remove(&entry.result.id);
        Some(entry)
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(fp, _)| fp.clone());
        if let Some(fp) = oldest {
            self.remove(&fp);
            self.stats.evictions += 1;
        }
    }
}

/// Thread-safe LRU result cache keyed by fingerprint.
#[derive(Debug)]
pub struct ResultCache {
    state: Mutex<CacheState>,
    max_entries: usize,
}

impl ResultCache {
    pub fn new(max_entries: usize) -> Self {
        ResultCache {
            state: Mutex::new(CacheState {
                next_id: 1,
                ..CacheState::default()
            }),
            max_entries: max_entries.max(1),
        }
    }

    /// Latest result for `fingerprint` if `max_age` admits it at `now`.
    pub fn get_latest(
        &self,
        fingerprint: &Fingerprint,
        max_age: MaxAge,
        now: DateTime<Utc>,
    ) -> Option<Arc<CachedResult>> {
        if max_age.skips_cache() {
            return None;
        }

        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;

        let admitted = state
            .entries
            .get(fingerprint)
            .map(|entry| max_age.admits(entry.result.computed_at, now));

        match admitted {
            Some(true) => {
                let entry = state.entries.get_mut(fingerprint)?;
                entry.last_accessed = tick;
                let result = Arc::clone(&entry.result);
                state.stats.hits += 1;
                Some(result)
            }
            Some(false) => {
                state.remove(fingerprint);
                state.stats.expirations += 1;
                state.stats.misses += 1;
                None
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Store a fresh result, replacing the previous one for the fingerprint.
    pub fn store(
        &self,
        fingerprint: Fingerprint,
        query_text: impl Into<String>,
        payload: QueryResultData,
        computed_at: DateTime<Utc>,
        runtime: Duration,
    ) -> Arc<CachedResult> {
        let mut state = self.state.lock();
        state.remove(&fingerprint);
        if state.entries.len() >= self.max_entries {
            state.evict_lru();
        }

        let id = state.next_id;
        state.next_id += 1;
        state.tick += 1;

        let result = Arc::new(CachedResult {
            id,
            fingerprint: fingerprint.clone(),
            query_text: query_text.into(),
            payload: Arc::new(payload),
            computed_at,
            runtime,
        });
        state.by_id.insert(id, fingerprint.clone());
        let tick = state.tick;
        state.entries.insert(
            fingerprint,
            CacheEntry {
                result: Arc::clone(&result),
                last_accessed: tick,
            },
        );
        result
    }

    /// Look a result up by id, without touching recency or statistics.
    pub fn get(&self, id: ResultId) -> Option<Arc<CachedResult>> {
        let state = self.state.lock();
        let fingerprint = state.by_id.get(&id)?;
        state
            .entries
            .get(fingerprint)
            .map(|entry| Arc::clone(&entry.result))
    }

    /// Drop a result by id. Returns whether it was present.
    pub fn remove(&self, id: ResultId) -> bool {
        let mut state = self.state.lock();
        match state.by_id.get(&id).cloned() {
            Some(fingerprint) => state.remove(&fingerprint).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.by_id.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            size: state.entries.len(),
            ..state.stats.clone()
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        ResultCache::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn fp(text: &str) -> Fingerprint {
        Fingerprint::new(1, text)
    }

    fn put(cache: &ResultCache, text: &str, at: DateTime<Utc>) -> Arc<CachedResult> {
        cache.store(fp(text), text, QueryResultData::default(), at, Duration::ZERO)
    }

    #[test]
    fn test_hit_within_max_age() {
        let cache = ResultCache::new(10);
        let t0 = Utc::now();
        let stored = put(&cache, "select 1", t0);

        let now = t0 + ChronoDuration::seconds(1);
        let hit = cache.get_latest(&fp("select 1"), MaxAge::secs(60), now).unwrap();
        assert_eq!(hit.id, stored.id);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_boundary_age_is_a_hit() {
        let cache = ResultCache::new(10);
        let t0 = Utc::now();
        put(&cache, "select 1", t0);
        let now = t0 + ChronoDuration::seconds(60);
        assert!(cache.get_latest(&fp("select 1"), MaxAge::secs(60), now).is_some());
    }

    #[test]
    fn test_too_old_is_dropped() {
        let cache = ResultCache::new(10);
        let t0 = Utc::now();
        put(&cache, "select 1", t0);

        let now = t0 + ChronoDuration::seconds(61);
        assert!(cache.get_latest(&fp("select 1"), MaxAge::secs(60), now).is_none());
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.get_latest(&fp("select 1"), MaxAge::Any, now).is_none());
    }

    #[test]
    fn test_zero_max_age_never_hits() {
        let cache = ResultCache::new(10);
        let t0 = Utc::now();
        put(&cache, "select 1", t0);
        assert!(cache.get_latest(&fp("select 1"), MaxAge::secs(0), t0).is_none());
        // Skipped lookups are neither hits nor misses.
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_any_age() {
        let cache = ResultCache::new(10);
        let t0 = Utc::now();
        put(&cache, "select 1", t0);
        let later = t0 + ChronoDuration::days(365);
        assert!(cache.get_latest(&fp("select 1"), MaxAge::Any, later).is_some());
        assert_eq!(MaxAge::from_secs_signed(-1), MaxAge::Any);
    }

    #[test]
    fn test_result_ids_increase_and_replace() {
        let cache = ResultCache::new(10);
        let t0 = Utc::now();
        let first = put(&cache, "select 1", t0);
        let second = put(&cache, "select 1", t0);
        assert!(second.id > first.id);
        assert!(cache.get(first.id).is_none());
        assert_eq!(cache.get(second.id).unwrap().id, second.id);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResultCache::new(2);
        let t0 = Utc::now();
        put(&cache, "select 1", t0);
        put(&cache, "select 2", t0);
        // Touch 1 so 2 becomes the least recently used.
        cache.get_latest(&fp("select 1"), MaxAge::Any, t0).unwrap();
        put(&cache, "select 3", t0);

        assert_eq!(cache.len(), 2);
        assert!(cache.get_latest(&fp("select 2"), MaxAge::Any, t0).is_none());
        assert!(cache.get_latest(&fp("select 1"), MaxAge::Any, t0).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_remove_by_id() {
        let cache = ResultCache::new(10);
        let stored = put(&cache, "select 1", Utc::now());
        assert!(cache.remove(stored.id));
        assert!(!cache.remove(stored.id));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
