//! In-process answer cache with LRU eviction and TTL expiry.
//!
//! Keyed by the normalized question plus a fingerprint of the caller's
//! accessible document set, so callers with different access never share
//! entries.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use docqa_core::retrieval::ChunkRef;
use lru::LruCache;
use tracing::debug;

use crate::config::CacheConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedAnswer {
    pub answer: String,
    pub used_chunks: Vec<ChunkRef>,
}

struct CacheEntry {
    value: CachedAnswer,
    created_at: Instant,
}

#[derive(Clone)]
pub struct AnswerCache {
    entries: Arc<Mutex<LruCache<String, CacheEntry>>>,
    ttl: Duration,
    enabled: bool,
}

impl AnswerCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl,
            enabled: true,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let mut cache = Self::new(Duration::from_secs(config.ttl_secs), config.max_entries);
        cache.enabled = config.enabled && config.ttl_secs > 0;
        cache
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        let mut cache = Self::new(Duration::ZERO, 1);
        cache.enabled = false;
        cache
    }

    pub fn key(normalized_question: &str, access_fingerprint: &str) -> String {
        format!("{}\u{1f}{}", access_fingerprint, normalized_question)
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<CachedAnswer> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.lock();
        if let Some(entry) = entries.get(key) {
            if entry.created_at.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
            entries.pop(key);
            debug!("answer cache: dropped expired entry");
        }
        None
    }

    pub fn put(&self, key: String, value: CachedAnswer) {
        if !self.enabled {
            return;
        }
        self.lock().put(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
