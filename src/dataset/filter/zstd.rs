//! The `zstd` filter (id 32015).
//!
//! Applies Zstandard compression. The first client data value is the compression level used when encoding.

use crate::plugin::{PluginCreateError, PluginParametersInvalidError};

use super::{FilterDescription, FilterError, FilterPlugin, FilterTraits};

const IDENTIFIER: &str = "zstd";

/// The filter identifier of the `zstd` filter.
pub const FILTER_ID: u16 = 32015;

/// The compression level used if the client data is empty.
const DEFAULT_LEVEL: i32 = 3;

// Register the filter.
inventory::submit! {
    FilterPlugin::new(IDENTIFIER, is_id_zstd, create_filter_zstd)
}

fn is_id_zstd(id: u16) -> bool {
    id == FILTER_ID
}

fn create_filter_zstd(
    description: &FilterDescription,
) -> Result<Box<dyn FilterTraits>, PluginCreateError> {
    let level = match description.client_data().first() {
        Some(level) => i32::try_from(*level).map_err(|_| {
            PluginParametersInvalidError::new(IDENTIFIER, "filter", description.client_data().to_vec())
        })?,
        None => DEFAULT_LEVEL,
    };
    Ok(Box::new(ZstdFilter::new(level)))
}

/// A `zstd` filter implementation.
#[derive(Clone, Debug)]
pub struct ZstdFilter {
    level: i32,
}

impl ZstdFilter {
    /// Create a new `zstd` filter with compression `level`.
    #[must_use]
    pub const fn new(level: i32) -> Self {
        Self { level }
    }
}

impl FilterTraits for ZstdFilter {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn encode(&self, decoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        zstd::encode_all(decoded_value, self.level).map_err(|err| FilterError::EncodeFailure {
            filter: IDENTIFIER,
            reason: err.to_string(),
        })
    }

    fn decode(&self, encoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        zstd::decode_all(encoded_value).map_err(|err| FilterError::DecodeFailure {
            filter: IDENTIFIER,
            reason: err.to_string(),
        })
    }
}
