//! A storage adapter which logs reads.

use std::sync::Arc;

use itertools::Itertools;

use crate::{
    byte_range::ByteRange,
    storage::{Bytes, ReadableStorageTraits, StorageError},
};

#[cfg(feature = "async")]
use crate::storage::AsyncReadableStorageTraits;

/// The usage log storage adapter. Logs storage method calls at the [`log::Level::Debug`] level.
///
/// It is intended to aid in debugging and optimising performance by revealing storage access patterns.
/// Applying dataset methods through this adapter logs lines like:
/// ```text
/// [dataset] get_partial_values([4096..4128]) -> len=Ok([32])
/// [dataset] get_partial_values([8192..8320]) -> len=Ok([128])
/// [dataset] size() -> Ok(16384)
/// ```
#[derive(Debug)]
pub struct UsageLogStorageAdapter<TStorage: ?Sized> {
    storage: Arc<TStorage>,
    prefix: String,
}

impl<TStorage: ?Sized> UsageLogStorageAdapter<TStorage> {
    /// Create a new usage log storage adapter wrapping `storage`. Each log line starts with `prefix`.
    pub fn new(storage: Arc<TStorage>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    fn log_partial_values(&self, byte_ranges: &[ByteRange], result: &Result<Vec<Bytes>, StorageError>) {
        log::debug!(
            "{}get_partial_values([{}]) -> len={:?}",
            self.prefix,
            byte_ranges.iter().format(", "),
            result
                .as_ref()
                .map(|values| values.iter().map(Bytes::len).collect_vec())
        );
    }
}

impl<TStorage: ?Sized + ReadableStorageTraits> ReadableStorageTraits
    for UsageLogStorageAdapter<TStorage>
{
    fn get_partial_values(&self, byte_ranges: &[ByteRange]) -> Result<Vec<Bytes>, StorageError> {
        let result = self.storage.get_partial_values(byte_ranges);
        self.log_partial_values(byte_ranges, &result);
        result
    }

    fn size(&self) -> Result<u64, StorageError> {
        let result = self.storage.size();
        log::debug!("{}size() -> {result:?}", self.prefix);
        result
    }
}

#[cfg(feature = "async")]
#[async_trait::async_trait]
impl<TStorage: ?Sized + AsyncReadableStorageTraits> AsyncReadableStorageTraits
    for UsageLogStorageAdapter<TStorage>
{
    async fn get_partial_values(
        &self,
        byte_ranges: &[ByteRange],
    ) -> Result<Vec<Bytes>, StorageError> {
        let result = self.storage.get_partial_values(byte_ranges).await;
        self.log_partial_values(byte_ranges, &result);
        result
    }

    async fn size(&self) -> Result<u64, StorageError> {
        let result = self.storage.size().await;
        log::debug!("{}size() -> {result:?}", self.prefix);
        result
    }
}
