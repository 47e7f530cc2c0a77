use std::{num::NonZeroUsize, sync::Arc};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use crate::{config::global_config, dataset::DatasetError};

use super::ChunkCache;

type ChunkIndices = Vec<u64>;

/// A chunk cache with a fixed chunk capacity.
///
/// The least recently used chunk is evicted when a chunk is inserted into a full cache.
/// The cache is locked while a missing chunk is loaded, so concurrent readers of the same cache load chunks one at a time.
pub struct ChunkCacheLruChunkLimit {
    cache: Mutex<LruCache<ChunkIndices, Bytes>>,
}

impl ChunkCacheLruChunkLimit {
    /// Create a new [`ChunkCacheLruChunkLimit`] with a capacity in chunks of `chunk_capacity`.
    #[must_use]
    pub fn new(chunk_capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(chunk_capacity)),
        }
    }
}

impl Default for ChunkCacheLruChunkLimit {
    /// Create a cache with the [default chunk cache slots](crate::config::Config#default-chunk-cache-slots).
    fn default() -> Self {
        let slots = usize::try_from(global_config().chunk_cache_slots())
            .ok()
            .and_then(NonZeroUsize::new)
            .unwrap_or(NonZeroUsize::MIN);
        Self::new(slots)
    }
}

impl ChunkCache for ChunkCacheLruChunkLimit {
    fn get(&self, chunk_indices: &[u64]) -> Option<Bytes> {
        self.cache.lock().get(chunk_indices).cloned()
    }

    fn insert(&self, chunk_indices: ChunkIndices, chunk: Bytes) {
        self.cache.lock().put(chunk_indices, chunk);
    }

    fn try_get_or_insert_with<F>(
        &self,
        chunk_indices: Vec<u64>,
        f: F,
    ) -> Result<Bytes, Arc<DatasetError>>
    where
        F: FnOnce() -> Result<Bytes, DatasetError>,
    {
        let mut cache = self.cache.lock();
        if let Some(chunk) = cache.get(&chunk_indices) {
            return Ok(chunk.clone());
        }
        log::trace!("chunk cache miss {chunk_indices:?}");
        let chunk = f().map_err(Arc::new)?;
        cache.put(chunk_indices, chunk.clone());
        Ok(chunk)
    }

    fn flush(&self) {
        self.cache.lock().clear();
    }

    fn len(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::chunk_cache::test_util;

    #[test]
    fn chunk_cache_lru_chunk_limit_idempotent() {
        test_util::chunk_cache_idempotent(&ChunkCacheLruChunkLimit::default());
        test_util::chunk_cache_load_error(&ChunkCacheLruChunkLimit::new(NonZeroUsize::MIN));
    }

    #[test]
    fn chunk_cache_lru_chunk_limit_evicts_least_recent() {
        let cache = ChunkCacheLruChunkLimit::new(NonZeroUsize::new(2).unwrap());
        cache.insert(vec![0], Bytes::from_static(&[0]));
        cache.insert(vec![1], Bytes::from_static(&[1]));
        assert!(cache.get(&[0]).is_some());
        cache.insert(vec![2], Bytes::from_static(&[2]));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&[1]).is_none());
        assert!(cache.get(&[0]).is_some());
        assert!(cache.get(&[2]).is_some());
    }
}
