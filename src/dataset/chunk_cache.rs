//! Chunk caches.
//!
//! A chunk cache holds decoded chunks keyed by their chunk grid indices, so a chunk that is read again is neither fetched nor decoded again.
//! Implementations:
//!  - [`ChunkCacheLruSizeLimit`]: least recently used eviction under a byte budget,
//!  - [`ChunkCacheLruChunkLimit`]: least recently used eviction under a chunk slot budget,
//!  - [`ChunkCacheNone`]: a cache that never stores a chunk.
//!
//! Every implementation invokes the loader of [`ChunkCache::try_get_or_insert_with`] at most once per chunk between evictions, including under concurrent access.

use std::sync::Arc;

use bytes::Bytes;

use super::DatasetError;

mod chunk_cache_lru_chunk_limit;
mod chunk_cache_lru_size_limit;
mod chunk_cache_none;

pub use chunk_cache_lru_chunk_limit::ChunkCacheLruChunkLimit;
pub use chunk_cache_lru_size_limit::ChunkCacheLruSizeLimit;
pub use chunk_cache_none::ChunkCacheNone;

/// Traits for a chunk cache.
pub trait ChunkCache: Send + Sync {
    /// Retrieve a chunk from the cache. Returns [`None`] if the chunk is not present.
    ///
    /// The chunk cache implementation may modify the cache (e.g. update LRU cache) on retrieval.
    fn get(&self, chunk_indices: &[u64]) -> Option<Bytes>;

    /// Insert a chunk into the cache.
    fn insert(&self, chunk_indices: Vec<u64>, chunk: Bytes);

    /// Get a chunk from the cache, or insert the chunk returned by `f` if it is not present.
    ///
    /// # Errors
    /// Returns an error if `f` returns an error.
    fn try_get_or_insert_with<F>(
        &self,
        chunk_indices: Vec<u64>,
        f: F,
    ) -> Result<Bytes, Arc<DatasetError>>
    where
        F: FnOnce() -> Result<Bytes, DatasetError>;

    /// Evict every chunk.
    fn flush(&self);

    /// Return the number of chunks in the cache.
    #[must_use]
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    #[must_use]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
