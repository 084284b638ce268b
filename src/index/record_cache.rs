use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use lru::LruCache;
use parking_lot::Mutex;
use crate::core::types::MsgIdx;
use crate::index::record::MessageRecord;

/// Bounded cache of parsed metadata records.
pub struct RecordCache {
    cache: Mutex<LruCache<MsgIdx, MessageRecord>>,
    pub size_limit: usize,
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl RecordCache {
    pub fn new(size_limit: usize) -> Self {
        let cap = NonZeroUsize::new(size_limit).unwrap_or(NonZeroUsize::MIN);
        RecordCache {
            cache: Mutex::new(LruCache::new(cap)),
            size_limit: cap.get(),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, idx: MsgIdx) -> Option<MessageRecord> {
        let mut cache = self.cache.lock();
        match cache.get(&idx) {
            Some(record) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(record.clone())
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, record: MessageRecord) {
        self.cache.lock().put(record.idx, record);
    }

    pub fn invalidate(&self, idx: MsgIdx) {
        self.cache.lock().pop(&idx);
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.size_limit,
        }
    }
}
