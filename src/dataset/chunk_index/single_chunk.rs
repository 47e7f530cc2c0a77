//! The single chunk index.
//!
//! The dataset is exactly one chunk, located by the layout message itself.

use crate::format::is_undefined_address;

use super::{ChunkIndexContext, ChunkLocation, DatasetError, FilteredChunk};

/// A single chunk index.
#[derive(Debug)]
pub struct SingleChunkIndex {
    context: ChunkIndexContext,
    location: Option<ChunkLocation>,
}

impl SingleChunkIndex {
    /// Create a new single chunk index for the chunk at `address`.
    ///
    /// The stored size and filter mask of a filtered chunk are given by `filtered_chunk`.
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidLayout`] if the dataset has more than one chunk, or if `filtered_chunk` does not match whether the dataset is filtered.
    pub fn new(
        context: ChunkIndexContext,
        address: u64,
        filtered_chunk: Option<FilteredChunk>,
    ) -> Result<Self, DatasetError> {
        if context.grid_shape().iter().any(|chunks| *chunks > 1) {
            return Err(DatasetError::InvalidLayout(format!(
                "a single chunk index cannot hold extent {:?} with chunk shape {:?}",
                context.extent(),
                context.chunk_shape()
            )));
        }
        let location = match (context.filtered(), filtered_chunk) {
            (true, Some(filtered_chunk)) => {
                ChunkLocation::new(address, filtered_chunk.size, filtered_chunk.filter_mask)
            }
            (false, None) => ChunkLocation::new(address, context.chunk_size_bytes(), 0),
            (true, None) => {
                return Err(DatasetError::InvalidLayout(
                    "a filtered single chunk needs its stored size and filter mask".to_string(),
                ))
            }
            (false, Some(_)) => {
                return Err(DatasetError::InvalidLayout(
                    "an unfiltered single chunk cannot have a stored size and filter mask"
                        .to_string(),
                ))
            }
        };
        Ok(Self {
            context,
            location: (!is_undefined_address(address)).then_some(location),
        })
    }

    /// Return the dataset geometry of the index.
    #[must_use]
    pub const fn context(&self) -> &ChunkIndexContext {
        &self.context
    }

    /// Locate the chunk.
    #[must_use]
    pub const fn locate(&self) -> Option<ChunkLocation> {
        self.location
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        dataset::chunk_index::{ChunkIndex, ChunkIndexDescriptor, ChunkIndexType},
        format::{FormatContext, UNDEFINED_ADDRESS},
        storage::MemoryStore,
    };

    use super::*;

    fn context(extent: Vec<u64>, filtered: bool) -> ChunkIndexContext {
        let max_extent = extent.iter().copied().map(Some).collect();
        ChunkIndexContext::new(
            FormatContext::default(),
            extent,
            max_extent,
            vec![4, 4],
            8,
            filtered,
        )
        .unwrap()
    }

    #[test]
    fn single_chunk_locate() {
        let store = MemoryStore::new();
        let index = ChunkIndex::new(
            &ChunkIndexDescriptor::new(ChunkIndexType::SingleChunk, 800),
            context(vec![4, 3], false),
        )
        .unwrap();
        assert_eq!(
            index.locate(&store, &[0, 0]).unwrap(),
            Some(ChunkLocation::new(800, 128, 0))
        );
        assert!(index.locate(&store, &[0, 1]).is_err());

        let index = ChunkIndex::new(
            &ChunkIndexDescriptor::new_single_chunk_filtered(800, 37, 1),
            context(vec![4, 4], true),
        )
        .unwrap();
        assert_eq!(
            index.locate(&store, &[0, 0]).unwrap(),
            Some(ChunkLocation::new(800, 37, 1))
        );
    }

    #[test]
    fn single_chunk_absent() {
        let index = SingleChunkIndex::new(context(vec![4, 4], false), UNDEFINED_ADDRESS, None).unwrap();
        assert_eq!(index.locate(), None);
    }

    #[test]
    fn single_chunk_invalid() {
        assert!(SingleChunkIndex::new(context(vec![5, 4], false), 0, None).is_err());
        assert!(SingleChunkIndex::new(context(vec![4, 4], true), 0, None).is_err());
        assert!(SingleChunkIndex::new(
            context(vec![4, 4], false),
            0,
            Some(FilteredChunk {
                size: 1,
                filter_mask: 0
            })
        )
        .is_err());
    }
}
