//! A storage adapter which records performance metrics.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    byte_range::ByteRange,
    storage::{Bytes, ReadableStorageTraits, StorageError},
};

#[cfg(feature = "async")]
use crate::storage::AsyncReadableStorageTraits;

/// The performance metrics storage adapter. Accumulates metrics, such as bytes read and read requests.
///
/// It is intended to aid in testing by allowing the application to validate that metrics match expected values for specific operations.
/// For example, a cached chunk should not issue further reads.
#[derive(Debug)]
pub struct PerformanceMetricsStorageAdapter<TStorage: ?Sized> {
    storage: Arc<TStorage>,
    bytes_read: AtomicUsize,
    reads: AtomicUsize,
}

impl<TStorage: ?Sized> PerformanceMetricsStorageAdapter<TStorage> {
    /// Create a new performance metrics storage adapter wrapping `storage`.
    #[must_use]
    pub fn new(storage: Arc<TStorage>) -> Self {
        Self {
            storage,
            bytes_read: AtomicUsize::default(),
            reads: AtomicUsize::default(),
        }
    }

    /// Returns the number of bytes read.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Returns the number of read requests.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.bytes_read.store(0, Ordering::Relaxed);
        self.reads.store(0, Ordering::Relaxed);
    }

    fn record(&self, values: &[Bytes], requests: usize) {
        let bytes_read = values.iter().map(Bytes::len).sum();
        self.bytes_read.fetch_add(bytes_read, Ordering::Relaxed);
        self.reads.fetch_add(requests, Ordering::Relaxed);
    }
}

impl<TStorage: ?Sized + ReadableStorageTraits> ReadableStorageTraits
    for PerformanceMetricsStorageAdapter<TStorage>
{
    fn get_partial_values(&self, byte_ranges: &[ByteRange]) -> Result<Vec<Bytes>, StorageError> {
        let values = self.storage.get_partial_values(byte_ranges)?;
        self.record(&values, byte_ranges.len());
        Ok(values)
    }

    fn size(&self) -> Result<u64, StorageError> {
        self.storage.size()
    }
}

#[cfg(feature = "async")]
#[async_trait::async_trait]
impl<TStorage: ?Sized + AsyncReadableStorageTraits> AsyncReadableStorageTraits
    for PerformanceMetricsStorageAdapter<TStorage>
{
    async fn get_partial_values(
        &self,
        byte_ranges: &[ByteRange],
    ) -> Result<Vec<Bytes>, StorageError> {
        let values = self.storage.get_partial_values(byte_ranges).await?;
        self.record(&values, byte_ranges.len());
        Ok(values)
    }

    async fn size(&self) -> Result<u64, StorageError> {
        self.storage.size().await
    }
}
