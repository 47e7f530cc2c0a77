//! Little-endian encoding helpers for building synthetic structures in tests.

use super::{checksum_lookup3, FormatContext, UNDEFINED_ADDRESS};

#[derive(Debug, Default)]
pub(crate) struct FormatWriter {
    bytes: Vec<u8>,
}

impl FormatWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn uint(&mut self, value: u64, width: usize) -> &mut Self {
        let bytes = value.to_le_bytes();
        self.bytes(&bytes[..width])
    }

    pub fn offset(&mut self, context: &FormatContext, address: u64) -> &mut Self {
        let width = usize::from(context.offset_size());
        if address == UNDEFINED_ADDRESS {
            self.bytes(&vec![0xff; width])
        } else {
            self.uint(address, width)
        }
    }

    pub fn length(&mut self, context: &FormatContext, length: u64) -> &mut Self {
        self.uint(length, usize::from(context.length_size()))
    }

    /// Append the lookup3 checksum of everything written so far.
    pub fn checksum(&mut self) -> &mut Self {
        let checksum = checksum_lookup3(&self.bytes);
        self.u32(checksum)
    }

    /// Pad with zeros up to `len` bytes.
    pub fn pad_to(&mut self, len: usize) -> &mut Self {
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}
