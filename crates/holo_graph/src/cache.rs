//! LRU cache of encoded tag rows, keyed by space, vertex and tag.
//!
//! Lookups that join vertex rows read through it. Every processor that
//! rewrites or removes a tag row evicts the entry before issuing the write.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use lru::LruCache;
use serde::Serialize;

use crate::types::{GraphSpaceId, TagId, VertexId};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RowKey {
    space: GraphSpaceId,
    vid: VertexId,
    tag: TagId,
}

impl RowKey {
    fn new(space: GraphSpaceId, vid: &str, tag: TagId) -> Self {
        Self {
            space,
            vid: vid.to_string(),
            tag,
        }
    }
}

/// Counters reported by `VertexCache::stats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

pub struct VertexCache {
    rows: Mutex<LruCache<RowKey, Vec<u8>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl VertexCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            rows: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// `None` when `capacity` is zero, which disables caching.
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(Self::new)
    }

    pub fn get(&self, space: GraphSpaceId, vid: &str, tag: TagId) -> Option<Vec<u8>> {
        let hit = self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&RowKey::new(space, vid, tag))
            .cloned();
        let counter = if hit.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    pub fn insert(&self, space: GraphSpaceId, vid: &str, tag: TagId, row: Vec<u8>) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(RowKey::new(space, vid, tag), row);
    }

    pub fn evict(&self, space: GraphSpaceId, vid: &str, tag: TagId) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(&RowKey::new(space, vid, tag));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self
                .rows
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }
}
