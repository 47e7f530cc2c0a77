//! The implicit chunk index.
//!
//! Every chunk of the maximum extent is allocated contiguously in row-major chunk grid order, so the address of a chunk is computed rather than looked up.
//! The dataset must have a fixed maximum extent and no filters.

use crate::format::is_undefined_address;

use super::{linear_index, ChunkIndexContext, ChunkLocation, DatasetError};

/// An implicit chunk index.
#[derive(Debug)]
pub struct ImplicitIndex {
    context: ChunkIndexContext,
    address: u64,
    max_down_chunks: Vec<u64>,
}

impl ImplicitIndex {
    /// Create a new implicit index for chunks stored from `address`.
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidLayout`] if the dataset is filtered or has an unlimited dimension.
    pub fn new(context: ChunkIndexContext, address: u64) -> Result<Self, DatasetError> {
        if context.filtered() {
            return Err(DatasetError::InvalidLayout(
                "an implicit chunk index cannot have filtered chunks".to_string(),
            ));
        }
        if !context.unlimited_dimensions().is_empty() {
            return Err(DatasetError::InvalidLayout(format!(
                "an implicit chunk index requires a fixed maximum extent, got {:?}",
                context.max_extent()
            )));
        }
        let max_down_chunks = context.max_down_chunks()?;
        Ok(Self {
            context,
            address,
            max_down_chunks,
        })
    }

    /// Return the dataset geometry of the index.
    #[must_use]
    pub const fn context(&self) -> &ChunkIndexContext {
        &self.context
    }

    /// Locate the chunk at `chunk_indices`, which must be inside the chunk grid.
    #[must_use]
    pub fn locate(&self, chunk_indices: &[u64]) -> Option<ChunkLocation> {
        if is_undefined_address(self.address) {
            return None;
        }
        let chunk_size_bytes = self.context.chunk_size_bytes();
        let index = linear_index(chunk_indices, &self.max_down_chunks);
        index
            .checked_mul(chunk_size_bytes)
            .and_then(|offset| self.address.checked_add(offset))
            .map(|address| ChunkLocation::new(address, chunk_size_bytes, 0))
    }
}
