//! Byte-range sources.
//!
//! A byte-range source is any addressable store that can return `length` bytes starting at an absolute `offset`.
//! This is the only I/O contract the chunk index, filter pipeline and dataset reader depend upon.
//! Every read names its offset explicitly, so a single source can be shared between threads without any cursor state.
//!
//! Implementations:
//!  - [`MemoryStore`]: an in-memory byte buffer.
//!  - [`FilesystemStore`]: a file on the local filesystem.
//!
//! Storage adapters wrap another source:
//!  - [`UsageLogStorageAdapter`](storage_adapter::UsageLogStorageAdapter): logs every read.
//!  - [`PerformanceMetricsStorageAdapter`](storage_adapter::PerformanceMetricsStorageAdapter): counts reads and bytes read.

mod filesystem_store;
mod memory_store;
pub mod storage_adapter;

#[cfg(feature = "async")]
mod storage_async;

use std::sync::Arc;

use thiserror::Error;

use crate::byte_range::{ByteLength, ByteOffset, ByteRange, InvalidByteRangeError};

pub use bytes::Bytes;
pub use filesystem_store::{FilesystemStore, FilesystemStoreCreateError};
pub use memory_store::MemoryStore;

#[cfg(feature = "async")]
pub use storage_async::{AsyncReadableStorage, AsyncReadableStorageTraits};

/// [`Arc`] wrapped readable storage.
pub type ReadableStorage = Arc<dyn ReadableStorageTraits>;

/// Readable storage traits.
pub trait ReadableStorageTraits: Send + Sync {
    /// Read exactly `length` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the bytes cannot be read in full or there is an error with the underlying store.
    fn read(&self, offset: ByteOffset, length: ByteLength) -> Result<Bytes, StorageError> {
        let byte_range = ByteRange::new(offset, length);
        self.get_partial_values(&[byte_range])?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::Other(format!("no value returned for {byte_range}")))
    }

    /// Read `length` bytes starting at `offset`, filling any bytes beyond the end of the source with zeros.
    ///
    /// Raw data regions may legitimately extend past the end of a source that was truncated after allocation.
    /// Metadata reads must use [`read`](ReadableStorageTraits::read) instead.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an error with the underlying store.
    fn read_zero_padded(
        &self,
        offset: ByteOffset,
        length: ByteLength,
    ) -> Result<Bytes, StorageError> {
        let size = self.size()?;
        let available = size.saturating_sub(offset).min(length);
        if available == length {
            return self.read(offset, length);
        }
        let length_usize = usize::try_from(length)
            .map_err(|_| InvalidByteRangeError::new(ByteRange::new(offset, length), size))?;
        let mut bytes = if available > 0 {
            self.read(offset, available)?.to_vec()
        } else {
            Vec::with_capacity(length_usize)
        };
        bytes.resize(length_usize, 0);
        Ok(bytes.into())
    }

    /// Retrieve partial bytes from a list of byte ranges.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if any byte range cannot be read in full or there is an underlying storage error.
    fn get_partial_values(&self, byte_ranges: &[ByteRange]) -> Result<Vec<Bytes>, StorageError>;

    /// Return the total size of the source in bytes.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the store does not support size() or there is an underlying error with the store.
    fn size(&self) -> Result<u64, StorageError>;
}

impl<TStorage: ?Sized + ReadableStorageTraits> ReadableStorageTraits for Arc<TStorage> {
    fn read(&self, offset: ByteOffset, length: ByteLength) -> Result<Bytes, StorageError> {
        TStorage::read(self, offset, length)
    }

    fn read_zero_padded(
        &self,
        offset: ByteOffset,
        length: ByteLength,
    ) -> Result<Bytes, StorageError> {
        TStorage::read_zero_padded(self, offset, length)
    }

    fn get_partial_values(&self, byte_ranges: &[ByteRange]) -> Result<Vec<Bytes>, StorageError> {
        TStorage::get_partial_values(self, byte_ranges)
    }

    fn size(&self) -> Result<u64, StorageError> {
        TStorage::size(self)
    }
}

/// A storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// An invalid byte range.
    #[error("invalid byte range {0}")]
    InvalidByteRangeError(#[from] InvalidByteRangeError),
    /// The requested method is not supported.
    #[error("{0}")]
    Unsupported(String),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}
