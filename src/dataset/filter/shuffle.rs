//! The `shuffle` filter (id 2).
//!
//! Groups the bytes of fixed-size elements by significance: all first bytes, then all second bytes, and so on.
//! The first client data value is the element size in bytes.
//! Trailing bytes that do not form a whole element are stored unshuffled.

use crate::plugin::{PluginCreateError, PluginParametersInvalidError};

use super::{FilterDescription, FilterError, FilterPlugin, FilterTraits};

const IDENTIFIER: &str = "shuffle";

/// The filter identifier of the `shuffle` filter.
pub const FILTER_ID: u16 = 2;

// Register the filter.
inventory::submit! {
    FilterPlugin::new(IDENTIFIER, is_id_shuffle, create_filter_shuffle)
}

fn is_id_shuffle(id: u16) -> bool {
    id == FILTER_ID
}

fn create_filter_shuffle(
    description: &FilterDescription,
) -> Result<Box<dyn FilterTraits>, PluginCreateError> {
    let element_size = description
        .client_data()
        .first()
        .and_then(|element_size| usize::try_from(*element_size).ok())
        .filter(|element_size| *element_size > 0)
        .ok_or_else(|| {
            PluginParametersInvalidError::new(IDENTIFIER, "filter", description.client_data().to_vec())
        })?;
    Ok(Box::new(ShuffleFilter::new(element_size)))
}

/// A `shuffle` filter implementation.
#[derive(Clone, Debug)]
pub struct ShuffleFilter {
    element_size: usize,
}

impl ShuffleFilter {
    /// Create a new `shuffle` filter for elements of `element_size` bytes.
    #[must_use]
    pub const fn new(element_size: usize) -> Self {
        Self { element_size }
    }
}

impl FilterTraits for ShuffleFilter {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn encode(&self, decoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        let element_size = self.element_size;
        if element_size <= 1 {
            return Ok(decoded_value.to_vec());
        }
        let num_elements = decoded_value.len() / element_size;
        let mut encoded_value = vec![0; decoded_value.len()];
        for (element, bytes) in decoded_value
            .chunks_exact(element_size)
            .enumerate()
        {
            for (byte_index, byte) in bytes.iter().enumerate() {
                encoded_value[byte_index * num_elements + element] = *byte;
            }
        }
        let shuffled = num_elements * element_size;
        encoded_value[shuffled..].copy_from_slice(&decoded_value[shuffled..]);
        Ok(encoded_value)
    }

    fn decode(&self, encoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        let element_size = self.element_size;
        if element_size <= 1 {
            return Ok(encoded_value.to_vec());
        }
        let num_elements = encoded_value.len() / element_size;
        let mut decoded_value = vec![0; encoded_value.len()];
        for (element, bytes) in decoded_value
            .chunks_exact_mut(element_size)
            .enumerate()
        {
            for (byte_index, byte) in bytes.iter_mut().enumerate() {
                *byte = encoded_value[byte_index * num_elements + element];
            }
        }
        let shuffled = num_elements * element_size;
        decoded_value[shuffled..].copy_from_slice(&encoded_value[shuffled..]);
        Ok(decoded_value)
    }
}
