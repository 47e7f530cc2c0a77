//! The `fletcher32` filter (id 3).
//!
//! Appends a Fletcher-32 checksum of the chunk, stored little-endian.
//! Decoding strips the checksum, and verifies it if [checksum validation](crate::config::Config#validate-checksums) is enabled.

use crate::{config::global_config, plugin::PluginCreateError};

use super::{FilterDescription, FilterError, FilterPlugin, FilterTraits};

const IDENTIFIER: &str = "fletcher32";

/// The filter identifier of the `fletcher32` filter.
pub const FILTER_ID: u16 = 3;

const CHECKSUM_SIZE: usize = std::mem::size_of::<u32>();

// Register the filter.
inventory::submit! {
    FilterPlugin::new(IDENTIFIER, is_id_fletcher32, create_filter_fletcher32)
}

fn is_id_fletcher32(id: u16) -> bool {
    id == FILTER_ID
}

fn create_filter_fletcher32(
    _description: &FilterDescription,
) -> Result<Box<dyn FilterTraits>, PluginCreateError> {
    Ok(Box::new(Fletcher32Filter))
}

/// A `fletcher32` filter implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fletcher32Filter;

impl FilterTraits for Fletcher32Filter {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn encode(&self, decoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        let checksum = checksum_fletcher32(decoded_value).to_le_bytes();
        let mut encoded_value = Vec::with_capacity(decoded_value.len() + CHECKSUM_SIZE);
        encoded_value.extend_from_slice(decoded_value);
        encoded_value.extend_from_slice(&checksum);
        Ok(encoded_value)
    }

    fn decode(&self, encoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        let Some(split) = encoded_value.len().checked_sub(CHECKSUM_SIZE) else {
            return Err(FilterError::DecodeFailure {
                filter: IDENTIFIER,
                reason: format!(
                    "{} bytes is too short to hold a checksum",
                    encoded_value.len()
                ),
            });
        };
        let (decoded_value, stored) = encoded_value.split_at(split);
        if global_config().validate_checksums() {
            let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
            let computed = checksum_fletcher32(decoded_value);
            if stored != computed {
                return Err(FilterError::DecodeFailure {
                    filter: IDENTIFIER,
                    reason: format!(
                        "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
                    ),
                });
            }
        }
        Ok(decoded_value.to_vec())
    }
}

/// Compute the Fletcher-32 checksum of `bytes` over big-endian 16-bit words.
///
/// An odd trailing byte is treated as the high byte of a final word.
#[must_use]
pub fn checksum_fletcher32(bytes: &[u8]) -> u32 {
    // The largest number of sums that can be performed without overflow
    const BLOCK_WORDS: usize = 360;

    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    let words = bytes.chunks_exact(2);
    let remainder = words.remainder();
    let words: Vec<&[u8]> = words.collect();
    for block in words.chunks(BLOCK_WORDS) {
        for word in block {
            sum1 += u32::from(u16::from_be_bytes([word[0], word[1]]));
            sum2 += sum1;
        }
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }

    if let Some(byte) = remainder.first() {
        sum1 += u32::from(*byte) << 8;
        sum2 += sum1;
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }

    sum1 = (sum1 & 0xffff) + (sum1 >> 16);
    sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    (sum2 << 16) | sum1
}
