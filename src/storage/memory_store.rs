//! An in-memory store.

use parking_lot::RwLock;

use crate::{
    byte_range::{extract_byte_range, ByteOffset, ByteRange, InvalidByteRangeError},
    storage::{Bytes, ReadableStorageTraits, StorageError},
};

/// An in-memory store.
///
/// The store holds a single contiguous byte buffer which is addressed like a file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Vec<u8>>,
}

impl MemoryStore {
    /// Create a new, empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new memory store holding `bytes`.
    #[must_use]
    pub fn new_with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(bytes),
        }
    }

    /// Write `value` at `offset`, growing the store with zeros if required.
    ///
    /// # Errors
    /// Returns [`InvalidByteRangeError`] if the end of the write does not fit in memory.
    pub fn set_partial(&self, offset: ByteOffset, value: &[u8]) -> Result<(), InvalidByteRangeError> {
        let mut data = self.data.write();
        let byte_range = ByteRange::new(offset, value.len() as u64);
        let end = byte_range
            .end()
            .and_then(|end| usize::try_from(end).ok())
            .ok_or_else(|| InvalidByteRangeError::new(byte_range, data.len() as u64))?;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[end - value.len()..end].copy_from_slice(value);
        Ok(())
    }

    /// Corrupt the byte at `offset` by inverting its bits. Has no effect if `offset` is beyond the end of the store.
    pub fn invert_byte(&self, offset: ByteOffset) {
        let mut data = self.data.write();
        if let Some(byte) = usize::try_from(offset).ok().and_then(|i| data.get_mut(i)) {
            *byte = !*byte;
        }
    }

    /// Return the number of bytes held by the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the store holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for MemoryStore {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new_with_bytes(bytes)
    }
}

impl ReadableStorageTraits for MemoryStore {
    fn get_partial_values(&self, byte_ranges: &[ByteRange]) -> Result<Vec<Bytes>, StorageError> {
        let data = self.data.read();
        let mut out = Vec::with_capacity(byte_ranges.len());
        for byte_range in byte_ranges {
            let bytes = extract_byte_range(&data, *byte_range)?;
            out.push(Bytes::copy_from_slice(bytes));
        }
        Ok(out)
    }

    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.data.read().len() as u64)
    }
}

#[cfg(feature = "async")]
#[async_trait::async_trait]
impl crate::storage::AsyncReadableStorageTraits for MemoryStore {
    async fn get_partial_values(
        &self,
        byte_ranges: &[ByteRange],
    ) -> Result<Vec<Bytes>, StorageError> {
        ReadableStorageTraits::get_partial_values(self, byte_ranges)
    }

    async fn size(&self) -> Result<u64, StorageError> {
        ReadableStorageTraits::size(self)
    }
}
