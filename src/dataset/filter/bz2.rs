//! The `bzip2` filter (id 307).
//!
//! Applies bzip2 compression. The first client data value is the block size (1 to 9) used when encoding.

use std::io::Read;

use crate::plugin::{PluginCreateError, PluginParametersInvalidError};

use super::{FilterDescription, FilterError, FilterPlugin, FilterTraits};

const IDENTIFIER: &str = "bzip2";

/// The filter identifier of the `bzip2` filter.
pub const FILTER_ID: u16 = 307;

/// The block size used if the client data is empty.
const DEFAULT_BLOCK_SIZE: u32 = 9;

// Register the filter.
inventory::submit! {
    FilterPlugin::new(IDENTIFIER, is_id_bz2, create_filter_bz2)
}

fn is_id_bz2(id: u16) -> bool {
    id == FILTER_ID
}

fn create_filter_bz2(
    description: &FilterDescription,
) -> Result<Box<dyn FilterTraits>, PluginCreateError> {
    let block_size = description
        .client_data()
        .first()
        .copied()
        .unwrap_or(DEFAULT_BLOCK_SIZE);
    let filter = Bz2Filter::new(block_size).map_err(|_| {
        PluginParametersInvalidError::new(IDENTIFIER, "filter", description.client_data().to_vec())
    })?;
    Ok(Box::new(filter))
}

/// A `bzip2` filter implementation.
#[derive(Clone, Debug)]
pub struct Bz2Filter {
    compression: bzip2::Compression,
}

impl Bz2Filter {
    /// Create a new `bzip2` filter with a block size of `block_size` (in units of 100 kB).
    ///
    /// # Errors
    /// Returns [`FilterError::InvalidParameters`] if `block_size` is not in `1..=9`.
    pub fn new(block_size: u32) -> Result<Self, FilterError> {
        if !(1..=9).contains(&block_size) {
            return Err(FilterError::InvalidParameters(format!(
                "bzip2 block size {block_size} is not in 1..=9"
            )));
        }
        Ok(Self {
            compression: bzip2::Compression::new(block_size),
        })
    }
}

impl FilterTraits for Bz2Filter {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn encode(&self, decoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        let mut encoder = bzip2::read::BzEncoder::new(decoded_value, self.compression);
        let mut out: Vec<u8> = Vec::new();
        encoder
            .read_to_end(&mut out)
            .map_err(|err| FilterError::EncodeFailure {
                filter: IDENTIFIER,
                reason: err.to_string(),
            })?;
        Ok(out)
    }

    fn decode(&self, encoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        let mut decoder = bzip2::read::BzDecoder::new(encoded_value);
        let mut out: Vec<u8> = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|err| FilterError::DecodeFailure {
                filter: IDENTIFIER,
                reason: err.to_string(),
            })?;
        Ok(out)
    }
}
