use serde::{Deserialize, Serialize};

use super::{chunk_index::ChunkIndexDescriptor, filter::FilterDescription};

/// The storage layout of a dataset, as declared by its data layout message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum DatasetLayout {
    /// The raw data is held by the layout message itself.
    Compact {
        /// The raw data.
        data: Vec<u8>,
    },
    /// The raw data is one unfiltered block at `address`.
    ///
    /// An undefined address means the data was never written.
    Contiguous {
        /// The address of the raw data.
        address: u64,
        /// The allocated size of the raw data in bytes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },
    /// The raw data is split into chunks located by a chunk index.
    Chunked {
        /// The chunk shape.
        chunk_shape: Vec<u64>,
        /// The chunk index.
        index: ChunkIndexDescriptor,
        /// The filter pipeline, in the order the filters were applied when writing.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        filters: Vec<FilterDescription>,
    },
}

impl DatasetLayout {
    /// Return the chunk shape of a chunked layout.
    #[must_use]
    pub fn chunk_shape(&self) -> Option<&[u64]> {
        match self {
            Self::Chunked { chunk_shape, .. } => Some(chunk_shape),
            Self::Compact { .. } | Self::Contiguous { .. } => None,
        }
    }
}
