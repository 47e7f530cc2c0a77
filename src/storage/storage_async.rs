use std::sync::Arc;

use crate::byte_range::{ByteLength, ByteOffset, ByteRange};

use super::{Bytes, StorageError};

/// [`Arc`] wrapped asynchronous readable storage.
pub type AsyncReadableStorage = Arc<dyn AsyncReadableStorageTraits>;

/// Async readable storage traits.
///
/// The asynchronous counterpart of [`ReadableStorageTraits`](super::ReadableStorageTraits).
/// Reads suspend at the I/O boundary rather than blocking a worker.
#[async_trait::async_trait]
pub trait AsyncReadableStorageTraits: Send + Sync {
    /// Read exactly `length` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the bytes cannot be read in full or there is an error with the underlying store.
    async fn read(&self, offset: ByteOffset, length: ByteLength) -> Result<Bytes, StorageError> {
        let byte_range = ByteRange::new(offset, length);
        self.get_partial_values(&[byte_range])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::Other(format!("no value returned for {byte_range}")))
    }

    /// Read `length` bytes starting at `offset`, filling any bytes beyond the end of the source with zeros.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an error with the underlying store.
    async fn read_zero_padded(
        &self,
        offset: ByteOffset,
        length: ByteLength,
    ) -> Result<Bytes, StorageError> {
        let size = self.size().await?;
        let available = size.saturating_sub(offset).min(length);
        if available == length {
            return self.read(offset, length).await;
        }
        let length = usize::try_from(length)
            .map_err(|_| StorageError::Other(format!("read of {length} bytes exceeds usize")))?;
        let mut bytes = if available > 0 {
            self.read(offset, available).await?.to_vec()
        } else {
            Vec::with_capacity(length)
        };
        bytes.resize(length, 0);
        Ok(bytes.into())
    }

    /// Retrieve partial bytes from a list of byte ranges.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if any byte range cannot be read in full or there is an underlying storage error.
    async fn get_partial_values(
        &self,
        byte_ranges: &[ByteRange],
    ) -> Result<Vec<Bytes>, StorageError>;

    /// Return the total size of the source in bytes.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the store does not support size() or there is an underlying error with the store.
    async fn size(&self) -> Result<u64, StorageError>;
}

#[async_trait::async_trait]
impl<TStorage: ?Sized + AsyncReadableStorageTraits> AsyncReadableStorageTraits for Arc<TStorage> {
    async fn read(&self, offset: ByteOffset, length: ByteLength) -> Result<Bytes, StorageError> {
        TStorage::read(self, offset, length).await
    }

    async fn read_zero_padded(
        &self,
        offset: ByteOffset,
        length: ByteLength,
    ) -> Result<Bytes, StorageError> {
        TStorage::read_zero_padded(self, offset, length).await
    }

    async fn get_partial_values(
        &self,
        byte_ranges: &[ByteRange],
    ) -> Result<Vec<Bytes>, StorageError> {
        TStorage::get_partial_values(self, byte_ranges).await
    }

    async fn size(&self) -> Result<u64, StorageError> {
        TStorage::size(self).await
    }
}
