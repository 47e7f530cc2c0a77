use std::sync::Arc;

use bytes::Bytes;
use moka::{
    policy::EvictionPolicy,
    sync::{Cache, CacheBuilder},
};

use crate::{config::global_config, dataset::DatasetError};

use super::ChunkCache;

type ChunkIndices = Vec<u64>;

/// A chunk cache with a fixed capacity in bytes.
///
/// Least recently used chunks are evicted until the decoded bytes of all cached chunks fit the capacity.
/// A chunk larger than the capacity is never retained.
pub struct ChunkCacheLruSizeLimit {
    cache: Cache<ChunkIndices, Bytes>,
}

impl ChunkCacheLruSizeLimit {
    /// Create a new [`ChunkCacheLruSizeLimit`] with a capacity in bytes of `capacity`.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        let cache = CacheBuilder::new(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .weigher(|_k, v: &Bytes| u32::try_from(v.len()).unwrap_or(u32::MAX))
            .build();
        Self { cache }
    }

    /// Return the size of the cache in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.cache.run_pending_tasks();
        usize::try_from(self.cache.weighted_size()).unwrap_or(usize::MAX)
    }
}

impl Default for ChunkCacheLruSizeLimit {
    /// Create a cache with the [default chunk cache size](crate::config::Config#default-chunk-cache-size).
    fn default() -> Self {
        Self::new(global_config().chunk_cache_size())
    }
}

impl ChunkCache for ChunkCacheLruSizeLimit {
    fn get(&self, chunk_indices: &[u64]) -> Option<Bytes> {
        self.cache.get(&chunk_indices.to_vec())
    }

    fn insert(&self, chunk_indices: ChunkIndices, chunk: Bytes) {
        self.cache.insert(chunk_indices, chunk);
    }

    fn try_get_or_insert_with<F>(
        &self,
        chunk_indices: Vec<u64>,
        f: F,
    ) -> Result<Bytes, Arc<DatasetError>>
    where
        F: FnOnce() -> Result<Bytes, DatasetError>,
    {
        self.cache.try_get_with(chunk_indices, || {
            log::trace!("chunk cache miss");
            f()
        })
    }

    fn flush(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    fn len(&self) -> usize {
        self.cache.run_pending_tasks();
        usize::try_from(self.cache.entry_count()).unwrap_or(usize::MAX)
    }
}
