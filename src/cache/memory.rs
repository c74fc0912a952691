use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::{CacheEntry, CacheStore, Fingerprint};
use crate::error::CacheError;
use crate::metrics::CACHE_SIZE;

struct Slot {
    entry: CacheEntry,
    created_at: Instant,
}

// ttl = None keeps entries until the process exits
pub struct MemoryCache {
    entries: DashMap<String, Slot>,
    ttl: Option<Duration>,
}

impl MemoryCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expired(&self, slot: &Slot) -> bool {
        self.ttl
            .is_some_and(|ttl| slot.created_at.elapsed() >= ttl)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let key = fingerprint.as_str();
        let stale = match self.entries.get(key) {
            Some(slot) if !self.expired(&slot) => return Ok(Some(slot.entry.clone())),
            Some(_) => true,
            None => false,
        };
        if stale {
            self.entries.remove(key);
            CACHE_SIZE.set(self.entries.len() as f64);
        }
        Ok(None)
    }

    async fn put(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(
            fingerprint.as_str().to_string(),
            Slot {
                entry: entry.clone(),
                created_at: Instant::now(),
            },
        );
        CACHE_SIZE.set(self.entries.len() as f64);
        Ok(())
    }
}
