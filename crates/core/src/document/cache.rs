//! LRU memo of resolved indirect objects.

use crate::error::Diagnostic;
use crate::model::objects::PDFObject;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::trace;

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Counters reported by [`crate::document::PDFDocument::cache_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

/// A resolved object together with the anomalies met while resolving it.
#[derive(Debug, Clone)]
pub(crate) struct CachedObject {
    pub object: Arc<PDFObject>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Most recently used entries live at the back of the map.
pub(crate) struct ObjectCache {
    capacity: usize,
    map: IndexMap<u32, CachedObject>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl ObjectCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: IndexMap::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub(crate) fn get(&mut self, objid: u32) -> Option<CachedObject> {
        let Some(index) = self.map.get_index_of(&objid) else {
            self.misses += 1;
            return None;
        };
        self.hits += 1;
        let last = self.map.len() - 1;
        if index != last {
            self.map.move_index(index, last);
        }
        self.map.get_index(last).map(|(_, v)| v.clone())
    }

    /// Keeps an existing entry: the first completed resolution wins.
    pub(crate) fn insert(&mut self, objid: u32, value: CachedObject) -> CachedObject {
        if self.capacity == 0 {
            return value;
        }
        if let Some(existing) = self.map.get(&objid) {
            return existing.clone();
        }
        self.map.insert(objid, value.clone());
        if self.map.len() > self.capacity {
            if let Some((evicted, _)) = self.map.shift_remove_index(0) {
                trace!(objid = evicted, "evicted from object cache");
            }
            self.evictions += 1;
        }
        value
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            len: self.map.len(),
            capacity: self.capacity,
        }
    }
}
