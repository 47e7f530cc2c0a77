use super::{FormatContext, FormatError, UNDEFINED_ADDRESS};

/// A little-endian cursor over a block of bytes fetched from a known file `address`.
///
/// The reader is created by the function that fetched the block and is passed explicitly to decoding functions.
#[derive(Debug, Clone)]
pub struct FormatReader<'a> {
    bytes: &'a [u8],
    address: u64,
    position: usize,
}

impl<'a> FormatReader<'a> {
    /// Create a new reader over `bytes`, which were read from file `address`.
    #[must_use]
    pub const fn new(bytes: &'a [u8], address: u64) -> Self {
        Self {
            bytes,
            address,
            position: 0,
        }
    }

    /// Return the file address of the start of the block.
    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Return the current position relative to the start of the block.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Return the number of bytes remaining.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Return all bytes of the block before the current position.
    #[must_use]
    pub fn consumed(&self) -> &'a [u8] {
        &self.bytes[..self.position]
    }

    /// Read the next `count` bytes.
    ///
    /// # Errors
    /// Returns [`FormatError::UnexpectedEnd`] if fewer than `count` bytes remain.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], FormatError> {
        if count > self.remaining() {
            return Err(FormatError::UnexpectedEnd {
                address: self.address,
                position: self.position,
                needed: count,
                available: self.remaining(),
            });
        }
        let bytes = &self.bytes[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    /// Skip the next `count` bytes.
    ///
    /// # Errors
    /// Returns [`FormatError::UnexpectedEnd`] if fewer than `count` bytes remain.
    pub fn skip(&mut self, count: usize) -> Result<(), FormatError> {
        self.read_bytes(count).map(|_| ())
    }

    /// Read a `u8`.
    ///
    /// # Errors
    /// Returns [`FormatError::UnexpectedEnd`] if the block is exhausted.
    pub fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a little-endian `u16`.
    ///
    /// # Errors
    /// Returns [`FormatError::UnexpectedEnd`] if the block is exhausted.
    pub fn read_u16(&mut self) -> Result<u16, FormatError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian `u32`.
    ///
    /// # Errors
    /// Returns [`FormatError::UnexpectedEnd`] if the block is exhausted.
    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian `u64`.
    ///
    /// # Errors
    /// Returns [`FormatError::UnexpectedEnd`] if the block is exhausted.
    pub fn read_u64(&mut self) -> Result<u64, FormatError> {
        self.read_uint(8)
    }

    /// Read a little-endian unsigned integer of `width` bytes (1 to 8).
    ///
    /// # Errors
    /// Returns [`FormatError::InvalidFieldSize`] if `width` is not in `1..=8`, or [`FormatError::UnexpectedEnd`] if the block is exhausted.
    pub fn read_uint(&mut self, width: usize) -> Result<u64, FormatError> {
        if !(1..=8).contains(&width) {
            return Err(FormatError::InvalidFieldSize(width));
        }
        let bytes = self.read_bytes(width)?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0u64, |value, byte| (value << 8) | u64::from(*byte)))
    }

    /// Read a file address of the context offset size.
    ///
    /// An address with all bits set is returned as [`UNDEFINED_ADDRESS`] regardless of the offset size.
    ///
    /// # Errors
    /// Returns [`FormatError::UnexpectedEnd`] if the block is exhausted.
    pub fn read_offset(&mut self, context: &FormatContext) -> Result<u64, FormatError> {
        let width = usize::from(context.offset_size());
        let address = self.read_uint(width)?;
        if width < 8 && address == (1u64 << (8 * width)) - 1 {
            Ok(UNDEFINED_ADDRESS)
        } else {
            Ok(address)
        }
    }

    /// Read a file length of the context length size.
    ///
    /// # Errors
    /// Returns [`FormatError::UnexpectedEnd`] if the block is exhausted.
    pub fn read_length(&mut self, context: &FormatContext) -> Result<u64, FormatError> {
        self.read_uint(usize::from(context.length_size()))
    }

    /// Read a 4 byte signature and check it matches `expected`.
    ///
    /// # Errors
    /// Returns [`FormatError::MalformedSignature`] if the signature does not match.
    pub fn read_signature(
        &mut self,
        structure: &'static str,
        expected: &[u8; 4],
    ) -> Result<(), FormatError> {
        let found = self.read_bytes(4)?;
        if found == expected {
            Ok(())
        } else {
            Err(FormatError::MalformedSignature {
                structure,
                address: self.address,
                expected: String::from_utf8_lossy(expected).into_owned(),
                found: String::from_utf8_lossy(found).into_owned(),
            })
        }
    }

    /// Read a version byte and check it equals `supported`.
    ///
    /// # Errors
    /// Returns [`FormatError::UnsupportedVersion`] if the version is not supported.
    pub fn read_version(&mut self, structure: &'static str, supported: u8) -> Result<u8, FormatError> {
        let version = self.read_u8()?;
        if version == supported {
            Ok(version)
        } else {
            Err(FormatError::UnsupportedVersion {
                structure,
                address: self.address,
                version,
            })
        }
    }

    /// Read a stored lookup3 checksum and verify it against all bytes consumed so far.
    ///
    /// # Errors
    /// Returns [`FormatError::ChecksumMismatch`] if the checksum does not match and [checksum validation](crate::config::Config#validate-checksums) is enabled.
    pub fn read_checksum(&mut self, structure: &'static str) -> Result<(), FormatError> {
        let covered = self.consumed();
        let stored = self.read_u32()?;
        super::verify_checksum(structure, self.address, covered, stored)
    }
}
