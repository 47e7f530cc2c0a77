use std::sync::Arc;

use bytes::Bytes;

use crate::dataset::DatasetError;

use super::ChunkCache;

/// A chunk cache that never stores a chunk.
///
/// Every retrieval is a miss, so every read fetches and decodes its chunks.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChunkCacheNone;

impl ChunkCache for ChunkCacheNone {
    fn get(&self, _chunk_indices: &[u64]) -> Option<Bytes> {
        None
    }

    fn insert(&self, _chunk_indices: Vec<u64>, _chunk: Bytes) {}

    fn try_get_or_insert_with<F>(
        &self,
        _chunk_indices: Vec<u64>,
        f: F,
    ) -> Result<Bytes, Arc<DatasetError>>
    where
        F: FnOnce() -> Result<Bytes, DatasetError>,
    {
        f().map_err(Arc::new)
    }

    fn flush(&self) {}

    fn len(&self) -> usize {
        0
    }
}
