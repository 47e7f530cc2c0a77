//! Byte ranges.
//!
//! A [`ByteRange`] is an absolute `offset` and `length` within a [byte-range source](crate::storage).
//! Every read issued by this crate names its offset explicitly, there is no shared file cursor.
//!
//! [`extract_byte_ranges`] is a convenience function for extracting byte ranges from a slice of bytes.

use std::ops::Range;

use thiserror::Error;

/// A byte offset.
pub type ByteOffset = u64;

/// A byte length.
pub type ByteLength = u64;

/// A byte range.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ByteRange {
    offset: ByteOffset,
    length: ByteLength,
}

impl ByteRange {
    /// Create a new byte range of `length` bytes starting at `offset`.
    #[must_use]
    pub const fn new(offset: ByteOffset, length: ByteLength) -> Self {
        Self { offset, length }
    }

    /// Return the start of the byte range.
    #[must_use]
    pub const fn offset(&self) -> ByteOffset {
        self.offset
    }

    /// Return the length of the byte range.
    #[must_use]
    pub const fn length(&self) -> ByteLength {
        self.length
    }

    /// Return the exclusive end of the byte range, or [`None`] if it overflows [`u64`].
    #[must_use]
    pub const fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }

    /// Convert the byte range to a [`Range<u64>`].
    ///
    /// Returns [`None`] if the end of the byte range overflows [`u64`].
    #[must_use]
    pub fn to_range(&self) -> Option<Range<u64>> {
        Some(self.offset..self.end()?)
    }

    /// Convert the byte range to a [`Range<usize>`] within bytes of length `size`.
    ///
    /// # Errors
    /// Returns [`InvalidByteRangeError`] if the byte range is not within `size`.
    pub fn to_range_usize(&self, size: u64) -> Result<Range<usize>, InvalidByteRangeError> {
        let err = || InvalidByteRangeError::new(*self, size);
        let end = self.end().filter(|end| *end <= size).ok_or_else(err)?;
        let start = usize::try_from(self.offset).map_err(|_| err())?;
        let end = usize::try_from(end).map_err(|_| err())?;
        Ok(start..end)
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self.end() {
            Some(end) => write!(f, "{}..{end}", self.offset),
            None => write!(f, "{}..(+{})", self.offset, self.length),
        }
    }
}

/// An invalid byte range error.
#[derive(Copy, Clone, Debug, Error)]
#[error("invalid byte range {0} for bytes of length {1}")]
pub struct InvalidByteRangeError(ByteRange, u64);

impl InvalidByteRangeError {
    /// Create a new [`InvalidByteRangeError`].
    #[must_use]
    pub fn new(byte_range: ByteRange, bytes_len: u64) -> Self {
        Self(byte_range, bytes_len)
    }

    /// Return the offending byte range.
    #[must_use]
    pub const fn byte_range(&self) -> ByteRange {
        self.0
    }
}

fn validate_byte_ranges(
    byte_ranges: &[ByteRange],
    bytes_len: u64,
) -> Result<(), InvalidByteRangeError> {
    for byte_range in byte_ranges {
        if byte_range.end().map_or(true, |end| end > bytes_len) {
            return Err(InvalidByteRangeError(*byte_range, bytes_len));
        }
    }
    Ok(())
}

/// Extract a single byte range from bytes.
///
/// # Errors
/// Returns [`InvalidByteRangeError`] if any bytes are requested beyond the end of `bytes`.
pub fn extract_byte_range(
    bytes: &[u8],
    byte_range: ByteRange,
) -> Result<&[u8], InvalidByteRangeError> {
    let range = byte_range.to_range_usize(bytes.len() as u64)?;
    Ok(&bytes[range])
}

/// Extract byte ranges from bytes.
///
/// # Errors
/// Returns [`InvalidByteRangeError`] if any bytes are requested beyond the end of `bytes`.
pub fn extract_byte_ranges(
    bytes: &[u8],
    byte_ranges: &[ByteRange],
) -> Result<Vec<Vec<u8>>, InvalidByteRangeError> {
    validate_byte_ranges(byte_ranges, bytes.len() as u64)?;
    byte_ranges
        .iter()
        .map(|byte_range| extract_byte_range(bytes, *byte_range).map(<[u8]>::to_vec))
        .collect()
}
