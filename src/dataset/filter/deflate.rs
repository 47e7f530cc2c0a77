//! The `deflate` filter (id 1).
//!
//! Applies zlib compression. The first client data value is the compression level (0 to 9) used when encoding.

use std::io::Write;

use flate2::{write::ZlibEncoder, Compression, Decompress, FlushDecompress, Status};

use crate::plugin::{PluginCreateError, PluginParametersInvalidError};

use super::{FilterDescription, FilterError, FilterPlugin, FilterTraits};

const IDENTIFIER: &str = "deflate";

/// The filter identifier of the `deflate` filter.
pub const FILTER_ID: u16 = 1;

/// The compression level used if the client data is empty.
const DEFAULT_LEVEL: u32 = 6;

/// The minimum initial capacity of the decode buffer.
const MIN_CAPACITY: usize = 1024;

// Register the filter.
inventory::submit! {
    FilterPlugin::new(IDENTIFIER, is_id_deflate, create_filter_deflate)
}

fn is_id_deflate(id: u16) -> bool {
    id == FILTER_ID
}

fn create_filter_deflate(
    description: &FilterDescription,
) -> Result<Box<dyn FilterTraits>, PluginCreateError> {
    let level = description
        .client_data()
        .first()
        .copied()
        .unwrap_or(DEFAULT_LEVEL);
    let filter = DeflateFilter::new(level).map_err(|_| {
        PluginParametersInvalidError::new(IDENTIFIER, "filter", description.client_data().to_vec())
    })?;
    Ok(Box::new(filter))
}

/// A `deflate` filter implementation.
#[derive(Clone, Debug)]
pub struct DeflateFilter {
    level: u32,
}

impl DeflateFilter {
    /// Create a new `deflate` filter.
    ///
    /// # Errors
    /// Returns [`FilterError::InvalidParameters`] if `level` is greater than 9.
    pub fn new(level: u32) -> Result<Self, FilterError> {
        if level > 9 {
            return Err(FilterError::InvalidParameters(format!(
                "deflate compression level {level} is not in 0..=9"
            )));
        }
        Ok(Self { level })
    }
}

impl FilterTraits for DeflateFilter {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn encode(&self, decoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(decoded_value)
            .and_then(|()| encoder.finish())
            .map_err(|err| FilterError::EncodeFailure {
                filter: IDENTIFIER,
                reason: err.to_string(),
            })
    }

    fn decode(&self, encoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        inflate(encoded_value).map_err(|reason| FilterError::DecodeFailure {
            filter: IDENTIFIER,
            reason,
        })
    }
}

/// Inflate a zlib stream whose decoded size is unknown, doubling the output buffer whenever it fills.
fn inflate(encoded_value: &[u8]) -> Result<Vec<u8>, String> {
    let mut decompress = Decompress::new(true);
    let mut decoded = Vec::with_capacity(encoded_value.len().saturating_mul(2).max(MIN_CAPACITY));
    loop {
        let progress = (decompress.total_in(), decompress.total_out());
        let consumed = usize::try_from(decompress.total_in()).map_err(|err| err.to_string())?;
        let status = decompress
            .decompress_vec(
                &encoded_value[consumed..],
                &mut decoded,
                FlushDecompress::None,
            )
            .map_err(|err| err.to_string())?;
        if status == Status::StreamEnd {
            return Ok(decoded);
        }
        if decoded.len() == decoded.capacity() {
            decoded.reserve(decoded.capacity());
        } else if progress == (decompress.total_in(), decompress.total_out()) {
            return Err("truncated zlib stream".to_string());
        }
    }
}
