//! On-disk format primitives.
//!
//! Every chunk index structure is fetched from a [byte-range source](crate::storage) as one block of bytes with an explicit address,
//! then decoded with a [`FormatReader`]: a cursor owned by the decoding function and local to that block.
//! Decoding functions take the reader as an explicit parameter and return a value, so no read position is shared between calls.
//!
//! All multi-byte integers are little-endian.
//! File addresses and lengths have a variable width declared by the container superblock and captured by a [`FormatContext`].

mod checksum;
mod format_reader;
#[cfg(test)]
pub(crate) mod format_writer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use checksum::checksum_lookup3;
pub use format_reader::FormatReader;

/// The address used to represent an undefined (never allocated) location.
///
/// On disk an undefined address has all bits set for the offset size of the file.
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

/// The size in bytes of a stored lookup3 checksum.
pub const CHECKSUM_SIZE: usize = 4;

/// Returns true if `address` is the [undefined address](UNDEFINED_ADDRESS).
#[must_use]
pub const fn is_undefined_address(address: u64) -> bool {
    address == UNDEFINED_ADDRESS
}

/// The widths of file addresses ("offsets") and lengths, declared by the superblock of a file.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FormatContextSerde", into = "FormatContextSerde")]
pub struct FormatContext {
    offset_size: u8,
    length_size: u8,
}

#[derive(Serialize, Deserialize)]
struct FormatContextSerde {
    offset_size: u8,
    length_size: u8,
}

impl TryFrom<FormatContextSerde> for FormatContext {
    type Error = FormatError;

    fn try_from(value: FormatContextSerde) -> Result<Self, Self::Error> {
        Self::new(value.offset_size, value.length_size)
    }
}

impl From<FormatContext> for FormatContextSerde {
    fn from(value: FormatContext) -> Self {
        Self {
            offset_size: value.offset_size,
            length_size: value.length_size,
        }
    }
}

impl Default for FormatContext {
    /// 8 byte offsets and lengths.
    fn default() -> Self {
        Self {
            offset_size: 8,
            length_size: 8,
        }
    }
}

impl FormatContext {
    /// Create a new format context.
    ///
    /// # Errors
    /// Returns [`FormatError::InvalidFieldSize`] if `offset_size` or `length_size` is not 2, 4 or 8.
    pub fn new(offset_size: u8, length_size: u8) -> Result<Self, FormatError> {
        for size in [offset_size, length_size] {
            if !matches!(size, 2 | 4 | 8) {
                return Err(FormatError::InvalidFieldSize(usize::from(size)));
            }
        }
        Ok(Self {
            offset_size,
            length_size,
        })
    }

    /// Return the size of a file address in bytes.
    #[must_use]
    pub const fn offset_size(&self) -> u8 {
        self.offset_size
    }

    /// Return the size of a file length in bytes.
    #[must_use]
    pub const fn length_size(&self) -> u8 {
        self.length_size
    }
}

/// Verify the lookup3 `stored` checksum of `bytes` if [checksum validation](crate::config::Config#validate-checksums) is enabled.
///
/// # Errors
/// Returns [`FormatError::ChecksumMismatch`] if the checksum does not match.
pub fn verify_checksum(
    structure: &'static str,
    address: u64,
    bytes: &[u8],
    stored: u32,
) -> Result<(), FormatError> {
    if crate::config::global_config().validate_checksums() {
        let computed = checksum_lookup3(bytes);
        if computed != stored {
            return Err(FormatError::ChecksumMismatch {
                structure,
                address,
                stored,
                computed,
            });
        }
    }
    Ok(())
}

/// A format error.
#[derive(Clone, Debug, Error)]
#[allow(missing_docs)]
pub enum FormatError {
    /// The leading signature of a structure did not match.
    #[error("malformed {structure} signature at address {address}: expected {expected:?}, found {found:?}")]
    MalformedSignature {
        structure: &'static str,
        address: u64,
        expected: String,
        found: String,
    },
    /// A structure version is not supported.
    #[error("unsupported {structure} version {version} at address {address}")]
    UnsupportedVersion {
        structure: &'static str,
        address: u64,
        version: u8,
    },
    /// A stored checksum does not match the computed checksum.
    #[error("{structure} checksum mismatch at address {address}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        structure: &'static str,
        address: u64,
        stored: u32,
        computed: u32,
    },
    /// A structure ended before all of its fields were read.
    #[error("unexpected end of structure at address {address}: needed {needed} bytes at position {position}, {available} available")]
    UnexpectedEnd {
        address: u64,
        position: usize,
        needed: usize,
        available: usize,
    },
    /// An invalid integer field width.
    #[error("invalid field size {0}")]
    InvalidFieldSize(usize),
    /// A decoded value is not valid or cannot be represented.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// An unsupported feature of the format.
    #[error("{0}")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_context() {
        let context = FormatContext::default();
        assert_eq!(context.offset_size(), 8);
        assert_eq!(context.length_size(), 8);
        assert!(FormatContext::new(4, 8).is_ok());
        assert!(FormatContext::new(3, 8).is_err());
        assert!(FormatContext::new(8, 16).is_err());
    }

    #[test]
    fn format_context_serde() {
        let context: FormatContext =
            serde_json::from_str(r#"{"offset_size":4,"length_size":8}"#).unwrap();
        assert_eq!(context, FormatContext::new(4, 8).unwrap());
        assert!(serde_json::from_str::<FormatContext>(r#"{"offset_size":5,"length_size":8}"#).is_err());
        assert_eq!(
            serde_json::to_string(&context).unwrap(),
            r#"{"offset_size":4,"length_size":8}"#
        );
    }

    #[test]
    fn undefined_address() {
        assert!(is_undefined_address(UNDEFINED_ADDRESS));
        assert!(!is_undefined_address(0));
    }
}
