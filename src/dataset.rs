//! Datasets.
//!
//! A [`ChunkedDataset`] reads the raw data of an HDF5 dataset from a byte-range source.
//! It is created with a [`DatasetBuilder`] from the dataset extent, element size and [`DatasetLayout`], or from [`DatasetMetadata`].
//!
//! A read transfers the elements of a file [`Selection`] into the elements of a memory selection of a destination buffer, in lockstep.
//! For a chunked dataset, each run of the file selection is partitioned across the chunks it touches, and each chunk is:
//!  - taken from the [`ChunkCache`] of the dataset if present, otherwise
//!  - located with the [`ChunkIndex`](chunk_index::ChunkIndex), read from storage and decoded by the [`FilterPipeline`](filter::FilterPipeline), then cached.
//!
//! Chunks that were never written are read as the [`FillValue`] of the dataset, without touching the cache or the filter pipeline.
//!
//! Synchronous reads are provided for storage implementing [`ReadableStorageTraits`](crate::storage::ReadableStorageTraits):
//!  - [`read`](ChunkedDataset::read), [`read_selection`](ChunkedDataset::read_selection), [`read_elements`](ChunkedDataset::read_elements) and [`read_ndarray`](ChunkedDataset::read_ndarray),
//!  - [`retrieve_chunk`](ChunkedDataset::retrieve_chunk), [`retrieve_chunk_if_exists`](ChunkedDataset::retrieve_chunk_if_exists) and [`retrieve_chunks`](ChunkedDataset::retrieve_chunks).
//!
//! With the `async` feature, `async_` prefixed variants are provided for storage implementing `AsyncReadableStorageTraits`.

pub mod chunk_cache;
pub mod chunk_index;
pub mod filter;

mod dataset_builder;
mod dataset_errors;
mod dataset_layout;
mod dataset_metadata;
mod dataset_sync_readable;
mod fill_value;

#[cfg(feature = "async")]
mod dataset_async_readable;

pub use dataset_builder::DatasetBuilder;
pub use dataset_errors::DatasetError;
pub use dataset_layout::DatasetLayout;
pub use dataset_metadata::DatasetMetadata;
pub use fill_value::FillValue;

use std::sync::Arc;

use crate::{
    selection::{Extent, Selection, SelectionWalker},
    storage::Bytes,
};

use self::{
    chunk_cache::{ChunkCache, ChunkCacheLruSizeLimit},
    chunk_index::{ChunkIndex, ChunkIndexContext, ChunkLocation},
    filter::FilterPipeline,
};

/// The raw data of a dataset, resolved from its [`DatasetLayout`].
#[derive(Debug)]
enum DatasetData {
    Compact(Bytes),
    Contiguous {
        address: u64,
    },
    Chunked {
        index: ChunkIndex,
        filters: FilterPipeline,
    },
}

impl DatasetData {
    const fn class(&self) -> &'static str {
        match self {
            Self::Compact(_) => "compact",
            Self::Contiguous { .. } => "contiguous",
            Self::Chunked { .. } => "chunked",
        }
    }
}

/// A dataset reader.
///
/// The dataset owns its chunk index and chunk cache for its lifetime.
/// Index structures and decoded chunks are cached behind locks, so a dataset can be read from several threads at once.
pub struct ChunkedDataset<TStorage: ?Sized, CC = ChunkCacheLruSizeLimit> {
    storage: Arc<TStorage>,
    extent: Extent,
    element_size: usize,
    fill_value: FillValue,
    data: DatasetData,
    cache: CC,
}

impl<TStorage: ?Sized, CC> core::fmt::Debug for ChunkedDataset<TStorage, CC> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChunkedDataset")
            .field("extent", &self.extent)
            .field("element_size", &self.element_size)
            .field("fill_value", &self.fill_value)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl<TStorage: ?Sized, CC: ChunkCache> ChunkedDataset<TStorage, CC> {
    /// Get the underlying storage backing the dataset.
    #[must_use]
    pub fn storage(&self) -> Arc<TStorage> {
        self.storage.clone()
    }

    /// Get the extent.
    #[must_use]
    pub fn extent(&self) -> &[u64] {
        &self.extent
    }

    /// Get the dimensionality.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.extent.len()
    }

    /// Get the number of elements.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.extent.iter().product()
    }

    /// Get the element size in bytes.
    #[must_use]
    pub const fn element_size(&self) -> usize {
        self.element_size
    }

    /// Get the fill value.
    #[must_use]
    pub const fn fill_value(&self) -> &FillValue {
        &self.fill_value
    }

    /// Get the chunk shape. Returns [`None`] if the dataset is not chunked.
    #[must_use]
    pub fn chunk_shape(&self) -> Option<&[u64]> {
        self.chunk_index().map(|index| index.context().chunk_shape())
    }

    /// Get the chunk index. Returns [`None`] if the dataset is not chunked.
    #[must_use]
    pub const fn chunk_index(&self) -> Option<&ChunkIndex> {
        match &self.data {
            DatasetData::Chunked { index, .. } => Some(index),
            DatasetData::Compact(_) | DatasetData::Contiguous { .. } => None,
        }
    }

    /// Get the filter pipeline. Returns [`None`] if the dataset is not chunked.
    #[must_use]
    pub const fn filters(&self) -> Option<&FilterPipeline> {
        match &self.data {
            DatasetData::Chunked { filters, .. } => Some(filters),
            DatasetData::Compact(_) | DatasetData::Contiguous { .. } => None,
        }
    }

    /// Get the chunk cache.
    #[must_use]
    pub const fn cache(&self) -> &CC {
        &self.cache
    }

    /// Validate `file_selection` against the extent, then allocate a zeroed buffer for its elements.
    ///
    /// Returns the buffer and the number of selected elements.
    fn allocate_selection(
        &self,
        file_selection: &Selection,
    ) -> Result<(Vec<u8>, u64), DatasetError> {
        file_selection.walk(&self.extent)?;
        let num_elements = file_selection.num_elements(&self.extent);
        let expected = num_elements.saturating_mul(self.element_size as u64);
        let size = usize::try_from(expected).map_err(|_| DatasetError::InvalidDestinationSize {
            expected,
            got: 0,
        })?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| DatasetError::InvalidDestinationSize { expected, got: 0 })?;
        bytes.resize(size, 0);
        Ok((bytes, num_elements))
    }

    /// Validate a read of `file_selection` into `memory_selection` of a destination with `memory_extent` and `destination_len` bytes.
    ///
    /// Every check happens before any storage is read.
    fn plan_read(
        &self,
        destination_len: usize,
        file_selection: &Selection,
        memory_selection: &Selection,
        memory_extent: &[u64],
    ) -> Result<ReadPlan, DatasetError> {
        let file_steps = file_selection.walk(&self.extent)?;
        let memory_steps = memory_selection.walk(memory_extent)?;
        let file = file_selection.num_elements(&self.extent);
        let memory = memory_selection.num_elements(memory_extent);
        if file != memory {
            return Err(DatasetError::SelectionSizeMismatch { file, memory });
        }
        let expected = memory_extent
            .iter()
            .try_fold(self.element_size as u64, |size, dim| size.checked_mul(*dim))
            .unwrap_or(u64::MAX);
        if destination_len as u64 != expected {
            return Err(DatasetError::InvalidDestinationSize {
                expected,
                got: destination_len as u64,
            });
        }
        Ok(ReadPlan {
            file_steps,
            memory: MemoryCursor::new(memory_steps, memory_extent),
        })
    }

    /// The chunk index and filter pipeline of a chunked dataset.
    fn chunked(&self) -> Result<(&ChunkIndex, &FilterPipeline), DatasetError> {
        match &self.data {
            DatasetData::Chunked { index, filters } => Ok((index, filters)),
            data => Err(DatasetError::InvalidLayout(format!(
                "a {} dataset has no chunks",
                data.class()
            ))),
        }
    }

    /// The decoded bytes of an absent chunk.
    fn fill_chunk(&self, context: &ChunkIndexContext) -> Result<Bytes, DatasetError> {
        let num_elements = usize::try_from(context.chunk_shape().iter().product::<u64>())
            .map_err(|_| DatasetError::InvalidLayout("the chunk size overflows".to_string()))?;
        Ok(self.fill_value.repeat(num_elements, self.element_size).into())
    }

    /// The byte offset of the element at `coordinates` in the row-major raw data of the dataset.
    fn element_byte_offset(&self, coordinates: &[u64]) -> u64 {
        ravel_indices(coordinates, &self.extent) * self.element_size as u64
    }
}

/// A validated read.
struct ReadPlan {
    file_steps: SelectionWalker,
    memory: MemoryCursor,
}

/// The position of a read in the memory selection of the destination.
struct MemoryCursor {
    steps: SelectionWalker,
    extent: Extent,
    offset: u64,
    remaining: u64,
}

impl MemoryCursor {
    fn new(steps: SelectionWalker, extent: &[u64]) -> Self {
        Self {
            steps,
            extent: extent.to_vec(),
            offset: 0,
            remaining: 0,
        }
    }

    /// Take up to `max` elements of the memory selection, returning the element offset of the run in the destination and its length.
    fn take(&mut self, max: u64) -> Result<(u64, u64), DatasetError> {
        while self.remaining == 0 {
            let step = self.steps.next().ok_or_else(|| {
                DatasetError::InvalidSelection(crate::selection::SelectionError::InvalidSelection(
                    "the memory selection ended before the file selection".to_string(),
                ))
            })?;
            self.offset = ravel_indices(step.coordinates(), &self.extent);
            self.remaining = step.run_length();
        }
        let length = max.min(self.remaining);
        let offset = self.offset;
        self.offset += length;
        self.remaining -= length;
        Ok((offset, length))
    }
}

/// The linear (row-major) index of `indices` in `shape`.
fn ravel_indices(indices: &[u64], shape: &[u64]) -> u64 {
    let mut index = 0;
    for (i, size) in std::iter::zip(indices, shape) {
        index = index * size + i;
    }
    index
}

fn byte_range(
    element_offset: u64,
    length: u64,
    element_size: usize,
) -> Result<std::ops::Range<usize>, DatasetError> {
    let to_usize = |elements: u64| {
        usize::try_from(elements)
            .ok()
            .and_then(|elements| elements.checked_mul(element_size))
            .ok_or_else(|| DatasetError::InvalidLayout(format!("{elements} elements overflow")))
    };
    let start = to_usize(element_offset)?;
    Ok(start..start + to_usize(length)?)
}

/// Copy `length` elements from `source`, starting at element `source_offset`, into the next runs of the memory selection of `destination`.
///
/// The elements are filled with `fill_value` if `source` is [`None`].
fn copy_elements(
    destination: &mut [u8],
    memory: &mut MemoryCursor,
    source: Option<&[u8]>,
    mut source_offset: u64,
    mut length: u64,
    element_size: usize,
    fill_value: &FillValue,
) -> Result<(), DatasetError> {
    while length > 0 {
        let (destination_offset, run) = memory.take(length)?;
        let destination_range = byte_range(destination_offset, run, element_size)?;
        let destination_len = destination.len();
        let output = destination.get_mut(destination_range.clone()).ok_or(
            DatasetError::InvalidDestinationSize {
                expected: destination_range.end as u64,
                got: destination_len as u64,
            },
        )?;
        if let Some(source) = source {
            let source_range = byte_range(source_offset, run, element_size)?;
            let input = source.get(source_range.clone()).ok_or_else(|| {
                DatasetError::InvalidLayout(format!(
                    "bytes {source_range:?} are outside of {} bytes of raw data",
                    source.len()
                ))
            })?;
            output.copy_from_slice(input);
        } else {
            fill_value.fill(output);
        }
        source_offset += run;
        length -= run;
    }
    Ok(())
}

/// Decode the `encoded` bytes of the chunk at `chunk_indices` stored at `location`.
///
/// # Errors
/// Returns [`DatasetError::ChunkSizeMismatch`] if the decoded chunk is not the size of a chunk, or a filter error.
fn decode_chunk(
    context: &ChunkIndexContext,
    filters: &FilterPipeline,
    chunk_indices: &[u64],
    location: &ChunkLocation,
    encoded: Bytes,
) -> Result<Bytes, DatasetError> {
    let decoded = if filters.is_empty() {
        encoded
    } else {
        Bytes::from(filters.decode(encoded.to_vec(), location.filter_mask)?)
    };
    let expected = context.chunk_size_bytes();
    if decoded.len() as u64 != expected {
        return Err(DatasetError::ChunkSizeMismatch {
            chunk_indices: chunk_indices.to_vec(),
            expected,
            got: decoded.len() as u64,
        });
    }
    Ok(decoded)
}

/// The shape of the elements read with `selection` from a dataset with `extent`.
///
/// This is the shape of a regular hyperslab (`count * block` in each dimension), the extent for [`Selection::All`], and otherwise one dimension with the number of selected elements.
#[must_use]
pub fn selection_shape(selection: &Selection, extent: &[u64]) -> Vec<u64> {
    match selection {
        Selection::All => extent.to_vec(),
        Selection::RegularHyperslab(hyperslab) => {
            std::iter::zip(hyperslab.count(), hyperslab.block())
                .map(|(count, block)| count.saturating_mul(*block))
                .collect()
        }
        Selection::IrregularHyperslab(_) | Selection::Points(_) => {
            vec![selection.num_elements(extent)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{HyperslabBuilder, PointSelection, RegularHyperslab};

    #[test]
    fn ravel() {
        assert_eq!(ravel_indices(&[], &[]), 0);
        assert_eq!(ravel_indices(&[3], &[10]), 3);
        assert_eq!(ravel_indices(&[1, 2, 3], &[4, 5, 6]), 30 + 12 + 3);
    }

    #[test]
    fn memory_cursor() {
        let selection = Selection::from(
            HyperslabBuilder::new(2)
                .with_start(vec![0, 1])
                .with_count(vec![2, 1])
                .with_block(vec![1, 3])
                .build()
                .unwrap(),
        );
        let extent = [3, 5];
        let mut cursor = MemoryCursor::new(selection.walk(&extent).unwrap(), &extent);
        assert_eq!(cursor.take(2).unwrap(), (1, 2));
        assert_eq!(cursor.take(5).unwrap(), (3, 1));
        assert_eq!(cursor.take(5).unwrap(), (6, 3));
        assert!(cursor.take(1).is_err());
    }

    #[test]
    fn copy_elements_fill() {
        let extent = [6];
        let selection = Selection::All;
        let mut cursor = MemoryCursor::new(selection.walk(&extent).unwrap(), &extent);
        let mut destination = vec![0u8; 12];
        let fill_value = FillValue::from(0xffffu16);
        let source = [1u8, 0, 2, 0, 3, 0, 4, 0];
        copy_elements(&mut destination, &mut cursor, Some(&source), 1, 3, 2, &fill_value).unwrap();
        copy_elements(&mut destination, &mut cursor, None, 0, 2, 2, &fill_value).unwrap();
        assert_eq!(destination, [2, 0, 3, 0, 4, 0, 255, 255, 255, 255, 0, 0]);
        assert!(copy_elements(&mut destination, &mut cursor, Some(&source), 3, 2, 2, &fill_value).is_err());
    }

    #[test]
    fn selection_shapes() {
        let extent = [10, 10];
        assert_eq!(selection_shape(&Selection::All, &extent), vec![10, 10]);
        let hyperslab = RegularHyperslab::new(vec![0, 1], vec![3, 4], vec![2, 2], vec![2, 1]).unwrap();
        assert_eq!(
            selection_shape(&Selection::from(hyperslab), &extent),
            vec![4, 2]
        );
        let points = PointSelection::new(vec![vec![0, 0], vec![9, 9], vec![5, 5]]).unwrap();
        assert_eq!(selection_shape(&Selection::from(points), &extent), vec![3]);
    }
}
