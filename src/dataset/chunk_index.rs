//! Chunk indexes.
//!
//! A chunk index maps the chunk grid indices of a chunk (its "scaled" coordinate) to the location of its stored bytes.
//! The variant is fixed by the layout of a dataset and selected once with [`ChunkIndex::new`]:
//!  - [`SingleChunkIndex`]: the dataset is exactly one chunk,
//!  - [`ImplicitIndex`]: chunks are stored contiguously in grid order with no index structure,
//!  - [`FixedArrayIndex`]: a fixed array of chunk addresses, for datasets with a fixed maximum extent,
//!  - [`ExtensibleArrayIndex`]: an extensible array of chunk addresses, for datasets with one unlimited dimension,
//!  - [`BTreeV1Index`]: a version 1 B-tree keyed by chunk offset,
//!  - [`BTreeV2Index`]: a version 2 B-tree keyed by scaled chunk offset, for datasets with several unlimited dimensions.
//!
//! A chunk that was never written has an [undefined address](crate::format::UNDEFINED_ADDRESS) and is located as [`None`].
//!
//! Index structures are parsed lazily and cached per index, so an index can be shared by concurrent readers.

pub mod btree_v1;
pub mod btree_v2;
pub mod extensible_array;
pub mod fixed_array;
pub mod implicit;
pub mod single_chunk;

#[cfg(test)]
pub(crate) mod test_util;

use std::{collections::HashMap, hash::Hash, sync::Arc, sync::OnceLock};

use derive_more::Display;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{
    format::{is_undefined_address, FormatContext, FormatError, FormatReader},
    selection::Extent,
    storage::{Bytes, ReadableStorageTraits},
};

#[cfg(feature = "async")]
use crate::storage::AsyncReadableStorageTraits;

pub use btree_v1::BTreeV1Index;
pub use btree_v2::BTreeV2Index;
pub use extensible_array::ExtensibleArrayIndex;
pub use fixed_array::FixedArrayIndex;
pub use implicit::ImplicitIndex;
pub use single_chunk::SingleChunkIndex;

use super::DatasetError;

/// The location of the stored bytes of a chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkLocation {
    /// The file address of the stored chunk.
    pub address: u64,
    /// The stored (encoded) size of the chunk in bytes.
    pub size: u64,
    /// The filter mask of the chunk. Bit `i` is set if filter `i` was skipped when the chunk was written.
    #[serde(default)]
    pub filter_mask: u32,
}

impl ChunkLocation {
    /// Create a new chunk location.
    #[must_use]
    pub const fn new(address: u64, size: u64, filter_mask: u32) -> Self {
        Self {
            address,
            size,
            filter_mask,
        }
    }
}

/// The type of a chunk index, with the code used for it in a data layout message.
///
/// The version 1 B-tree is the index of the legacy layout message and has no code of its own, so it uses `0`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ChunkIndexType {
    /// A version 1 B-tree.
    #[display("version 1 B-tree")]
    BTreeV1 = 0,
    /// A single chunk.
    #[display("single chunk")]
    SingleChunk = 1,
    /// An implicit index.
    #[display("implicit")]
    Implicit = 2,
    /// A fixed array.
    #[display("fixed array")]
    FixedArray = 3,
    /// An extensible array.
    #[display("extensible array")]
    ExtensibleArray = 4,
    /// A version 2 B-tree.
    #[display("version 2 B-tree")]
    BTreeV2 = 5,
}

/// The stored size and filter mask of the chunk of a filtered single chunk dataset.
///
/// These are held by the layout message rather than an index structure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilteredChunk {
    /// The stored size of the chunk in bytes.
    pub size: u64,
    /// The filter mask of the chunk.
    #[serde(default)]
    pub filter_mask: u32,
}

/// The chunk index part of a data layout message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkIndexDescriptor {
    #[serde(rename = "type")]
    index_type: ChunkIndexType,
    address: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filtered_chunk: Option<FilteredChunk>,
}

impl ChunkIndexDescriptor {
    /// Create a new chunk index descriptor of type `index_type`, with its index (or chunk) at `address`.
    #[must_use]
    pub const fn new(index_type: ChunkIndexType, address: u64) -> Self {
        Self {
            index_type,
            address,
            filtered_chunk: None,
        }
    }

    /// Create a descriptor for a filtered single chunk dataset.
    #[must_use]
    pub const fn new_single_chunk_filtered(address: u64, size: u64, filter_mask: u32) -> Self {
        Self {
            index_type: ChunkIndexType::SingleChunk,
            address,
            filtered_chunk: Some(FilteredChunk { size, filter_mask }),
        }
    }

    /// Return the index type.
    #[must_use]
    pub const fn index_type(&self) -> ChunkIndexType {
        self.index_type
    }

    /// Return the address of the index structure, or of the data for single chunk and implicit indexes.
    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Return the stored size and filter mask of a filtered single chunk.
    #[must_use]
    pub const fn filtered_chunk(&self) -> Option<FilteredChunk> {
        self.filtered_chunk
    }
}

/// The geometry of a chunked dataset that a chunk index depends upon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkIndexContext {
    format: FormatContext,
    extent: Extent,
    max_extent: Vec<Option<u64>>,
    chunk_shape: Vec<u64>,
    element_size: usize,
    filtered: bool,
}

impl ChunkIndexContext {
    /// Create a new chunk index context.
    ///
    /// `max_extent` holds the maximum size of each dimension, [`None`] if it is unlimited.
    /// `filtered` is true if the dataset has a non-empty filter pipeline, which changes the encoding of index entries.
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidLayout`] if the dimensionalities differ, a chunk dimension or the element size is zero, or the extent exceeds the maximum extent.
    pub fn new(
        format: FormatContext,
        extent: Extent,
        max_extent: Vec<Option<u64>>,
        chunk_shape: Vec<u64>,
        element_size: usize,
        filtered: bool,
    ) -> Result<Self, DatasetError> {
        if extent.len() != chunk_shape.len() || max_extent.len() != chunk_shape.len() {
            return Err(DatasetError::InvalidLayout(format!(
                "extent {extent:?}, maximum extent {max_extent:?} and chunk shape {chunk_shape:?} have different dimensionalities"
            )));
        }
        if chunk_shape.contains(&0) || element_size == 0 {
            return Err(DatasetError::InvalidLayout(format!(
                "chunk shape {chunk_shape:?} and element size {element_size} must be non-zero"
            )));
        }
        if std::iter::zip(&extent, &max_extent).any(|(size, max)| max.is_some_and(|max| *size > max)) {
            return Err(DatasetError::InvalidLayout(format!(
                "extent {extent:?} exceeds maximum extent {max_extent:?}"
            )));
        }
        let context = Self {
            format,
            extent,
            max_extent,
            chunk_shape,
            element_size,
            filtered,
        };
        if context.chunk_byte_size().is_none() {
            return Err(DatasetError::InvalidLayout(
                "the chunk size in bytes overflows".to_string(),
            ));
        }
        Ok(context)
    }

    /// Return the format context.
    #[must_use]
    pub const fn format(&self) -> &FormatContext {
        &self.format
    }

    /// Return the dimensionality.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.chunk_shape.len()
    }

    /// Return the current extent.
    #[must_use]
    pub fn extent(&self) -> &[u64] {
        &self.extent
    }

    /// Return the maximum extent. [`None`] marks an unlimited dimension.
    #[must_use]
    pub fn max_extent(&self) -> &[Option<u64>] {
        &self.max_extent
    }

    /// Return the chunk shape.
    #[must_use]
    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    /// Return the element size in bytes.
    #[must_use]
    pub const fn element_size(&self) -> usize {
        self.element_size
    }

    /// Returns true if chunks are filtered.
    #[must_use]
    pub const fn filtered(&self) -> bool {
        self.filtered
    }

    fn chunk_byte_size(&self) -> Option<u64> {
        self.chunk_shape
            .iter()
            .try_fold(self.element_size as u64, |size, dim| size.checked_mul(*dim))
    }

    /// Return the size of an unfiltered chunk in bytes.
    #[must_use]
    pub fn chunk_size_bytes(&self) -> u64 {
        // Checked on creation
        self.chunk_byte_size().unwrap_or(u64::MAX)
    }

    /// Return the number of chunks in each dimension of the current extent.
    #[must_use]
    pub fn grid_shape(&self) -> Vec<u64> {
        std::iter::zip(&self.extent, &self.chunk_shape)
            .map(|(size, chunk)| size.div_ceil(*chunk))
            .collect()
    }

    /// Return the number of chunks in each dimension of the maximum extent. [`None`] marks an unlimited dimension.
    #[must_use]
    pub fn max_grid_shape(&self) -> Vec<Option<u64>> {
        std::iter::zip(&self.max_extent, &self.chunk_shape)
            .map(|(max, chunk)| max.map(|max| max.div_ceil(*chunk)))
            .collect()
    }

    /// Return the indices of the unlimited dimensions.
    #[must_use]
    pub fn unlimited_dimensions(&self) -> Vec<usize> {
        self.max_extent
            .iter()
            .enumerate()
            .filter_map(|(dim, max)| max.is_none().then_some(dim))
            .collect()
    }

    /// Check that `chunk_indices` are inside the chunk grid of the current extent.
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidChunkGridIndices`] if they are not.
    pub fn validate_chunk_indices(&self, chunk_indices: &[u64]) -> Result<(), DatasetError> {
        let grid_shape = self.grid_shape();
        if chunk_indices.len() == grid_shape.len()
            && std::iter::zip(chunk_indices, &grid_shape).all(|(index, shape)| index < shape)
        {
            Ok(())
        } else {
            Err(DatasetError::InvalidChunkGridIndices(
                chunk_indices.to_vec(),
                grid_shape,
            ))
        }
    }

    /// The row-major "down" products of the maximum chunk grid.
    ///
    /// An unlimited dimension is only valid in the slowest varying position, where its size is not used.
    fn max_down_chunks(&self) -> Result<Vec<u64>, DatasetError> {
        let max_grid_shape = self.max_grid_shape();
        if max_grid_shape.iter().skip(1).any(Option::is_none) {
            return Err(DatasetError::InvalidLayout(format!(
                "maximum extent {:?} has an unlimited dimension that is not the slowest varying",
                self.max_extent
            )));
        }
        let max_grid_shape: Vec<u64> = max_grid_shape.iter().map(|size| size.unwrap_or(1)).collect();
        down_products(&max_grid_shape).ok_or_else(|| {
            DatasetError::InvalidLayout("the number of chunks overflows".to_string())
        })
    }
}

/// The row-major "down" products of `shape`: the product of every faster varying dimension.
fn down_products(shape: &[u64]) -> Option<Vec<u64>> {
    let mut down = vec![1u64; shape.len()];
    for dim in (0..shape.len().saturating_sub(1)).rev() {
        down[dim] = down[dim + 1].checked_mul(shape[dim + 1])?;
    }
    Some(down)
}

/// The linear index of `indices` with precomputed "down" products.
fn linear_index(indices: &[u64], down: &[u64]) -> u64 {
    std::iter::zip(indices, down).map(|(index, down)| index * down).sum()
}

/// Return the number of bytes used to store the size of a filtered chunk in index entries.
///
/// This is one more byte than needed to store `chunk_size_bytes`, limited to 8.
#[must_use]
pub fn chunk_size_length(chunk_size_bytes: u64) -> usize {
    let bits = chunk_size_bytes.max(1).ilog2() as usize;
    (1 + (bits + 8) / 8).min(8)
}

/// The encoding of a chunk location in a Fixed Array, Extensible Array or version 2 B-tree.
///
/// An unfiltered entry holds only the address.
/// A filtered entry holds the address, the stored size in [`chunk_size_length`] bytes and the filter mask.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ChunkEntryEncoding {
    format: FormatContext,
    chunk_size_bytes: u64,
    size_length: Option<usize>,
}

impl ChunkEntryEncoding {
    pub(crate) fn new(context: &ChunkIndexContext) -> Self {
        let chunk_size_bytes = context.chunk_size_bytes();
        Self {
            format: *context.format(),
            chunk_size_bytes,
            size_length: context
                .filtered()
                .then(|| chunk_size_length(chunk_size_bytes)),
        }
    }

    /// Return the encoded size of an entry in bytes.
    pub(crate) fn size(&self) -> usize {
        let offset_size = usize::from(self.format.offset_size());
        self.size_length
            .map_or(offset_size, |size_length| offset_size + size_length + 4)
    }

    /// Return the client identifier of structures holding these entries.
    pub(crate) fn client_id(&self) -> u8 {
        u8::from(self.size_length.is_some())
    }

    /// Check the client identifier and entry size declared by an index structure.
    pub(crate) fn validate(
        &self,
        structure: &'static str,
        client_id: u8,
        entry_size: usize,
    ) -> Result<(), FormatError> {
        if client_id != self.client_id() {
            return Err(FormatError::InvalidValue(format!(
                "{structure} has client id {client_id}, expected {}",
                self.client_id()
            )));
        }
        if entry_size != self.size() {
            return Err(FormatError::InvalidValue(format!(
                "{structure} has entries of {entry_size} bytes, expected {}",
                self.size()
            )));
        }
        Ok(())
    }

    /// Decode an entry. An entry with an undefined address is [`None`].
    pub(crate) fn decode(
        &self,
        reader: &mut FormatReader,
    ) -> Result<Option<ChunkLocation>, FormatError> {
        let address = reader.read_offset(&self.format)?;
        let location = match self.size_length {
            Some(size_length) => {
                let size = reader.read_uint(size_length)?;
                let filter_mask = reader.read_u32()?;
                ChunkLocation::new(address, size, filter_mask)
            }
            None => ChunkLocation::new(address, self.chunk_size_bytes, 0),
        };
        Ok((!is_undefined_address(address)).then_some(location))
    }

    pub(crate) fn decode_many(
        &self,
        reader: &mut FormatReader,
        count: u64,
    ) -> Result<Vec<Option<ChunkLocation>>, FormatError> {
        let count = usize::try_from(count)
            .map_err(|_| FormatError::InvalidValue(format!("{count} entries do not fit in memory")))?;
        if count.saturating_mul(self.size()) > reader.remaining() {
            return Err(FormatError::UnexpectedEnd {
                address: reader.address(),
                position: reader.position(),
                needed: count.saturating_mul(self.size()),
                available: reader.remaining(),
            });
        }
        (0..count).map(|_| self.decode(reader)).collect()
    }
}

/// A cache of parsed index structures keyed by their file address (or another key).
#[derive(Debug)]
pub(crate) struct NodeCache<K, T> {
    nodes: RwLock<HashMap<K, Arc<T>>>,
}

impl<K, T> Default for NodeCache<K, T> {
    fn default() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Copy, T> NodeCache<K, T> {
    pub(crate) fn get(&self, key: K) -> Option<Arc<T>> {
        self.nodes.read().get(&key).cloned()
    }

    /// Insert `node`, unless another reader inserted it first.
    pub(crate) fn insert(&self, key: K, node: T) -> Arc<T> {
        self.nodes
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(node))
            .clone()
    }

    pub(crate) fn get_or_try_insert_with<E>(
        &self,
        key: K,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        match self.get(key) {
            Some(node) => Ok(node),
            None => Ok(self.insert(key, f()?)),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.nodes.read().len()
    }
}

/// Initialise `cell` with `f` if it is empty.
///
/// Concurrent callers may both run `f`, but only one value is kept.
pub(crate) fn get_or_try_init<T, E>(
    cell: &OnceLock<T>,
    f: impl FnOnce() -> Result<T, E>,
) -> Result<&T, E> {
    match cell.get() {
        Some(value) => Ok(value),
        None => {
            let value = f()?;
            Ok(cell.get_or_init(|| value))
        }
    }
}

/// Read an index structure of `length` bytes at `address`.
pub(crate) fn read_structure(
    storage: &dyn ReadableStorageTraits,
    structure: &'static str,
    address: u64,
    length: usize,
) -> Result<Bytes, DatasetError> {
    if is_undefined_address(address) {
        return Err(FormatError::InvalidValue(format!("{structure} has an undefined address")).into());
    }
    log::trace!("reading {structure} at address {address} ({length} bytes)");
    Ok(storage.read(address, length as u64)?)
}

/// Read an index structure of `length` bytes at `address`.
#[cfg(feature = "async")]
pub(crate) async fn async_read_structure(
    storage: &dyn AsyncReadableStorageTraits,
    structure: &'static str,
    address: u64,
    length: usize,
) -> Result<Bytes, DatasetError> {
    if is_undefined_address(address) {
        return Err(FormatError::InvalidValue(format!("{structure} has an undefined address")).into());
    }
    log::trace!("reading {structure} at address {address} ({length} bytes)");
    Ok(storage.read(address, length as u64).await?)
}

/// A chunk index.
///
/// The variant is selected once when a dataset is opened.
#[derive(Debug)]
pub enum ChunkIndex {
    /// A single chunk.
    SingleChunk(SingleChunkIndex),
    /// An implicit index.
    Implicit(ImplicitIndex),
    /// A fixed array index.
    FixedArray(FixedArrayIndex),
    /// An extensible array index.
    ExtensibleArray(ExtensibleArrayIndex),
    /// A version 1 B-tree index.
    BTreeV1(BTreeV1Index),
    /// A version 2 B-tree index.
    BTreeV2(BTreeV2Index),
}

impl ChunkIndex {
    /// Create the chunk index described by `descriptor` for a dataset with geometry `context`.
    ///
    /// No index structure is read until the first chunk is located.
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidLayout`] if the index type is incompatible with the dataset geometry.
    pub fn new(
        descriptor: &ChunkIndexDescriptor,
        context: ChunkIndexContext,
    ) -> Result<Self, DatasetError> {
        log::debug!(
            "opening {} chunk index at address {} for extent {:?} and chunk shape {:?}",
            descriptor.index_type(),
            descriptor.address(),
            context.extent(),
            context.chunk_shape()
        );
        let address = descriptor.address();
        Ok(match descriptor.index_type() {
            ChunkIndexType::SingleChunk => Self::SingleChunk(SingleChunkIndex::new(
                context,
                address,
                descriptor.filtered_chunk(),
            )?),
            ChunkIndexType::Implicit => Self::Implicit(ImplicitIndex::new(context, address)?),
            ChunkIndexType::FixedArray => {
                Self::FixedArray(FixedArrayIndex::new(context, address)?)
            }
            ChunkIndexType::ExtensibleArray => {
                Self::ExtensibleArray(ExtensibleArrayIndex::new(context, address)?)
            }
            ChunkIndexType::BTreeV1 => Self::BTreeV1(BTreeV1Index::new(context, address)),
            ChunkIndexType::BTreeV2 => Self::BTreeV2(BTreeV2Index::new(context, address)),
        })
    }

    /// Return the index type.
    #[must_use]
    pub const fn index_type(&self) -> ChunkIndexType {
        match self {
            Self::SingleChunk(_) => ChunkIndexType::SingleChunk,
            Self::Implicit(_) => ChunkIndexType::Implicit,
            Self::FixedArray(_) => ChunkIndexType::FixedArray,
            Self::ExtensibleArray(_) => ChunkIndexType::ExtensibleArray,
            Self::BTreeV1(_) => ChunkIndexType::BTreeV1,
            Self::BTreeV2(_) => ChunkIndexType::BTreeV2,
        }
    }

    /// Return the dataset geometry of the index.
    #[must_use]
    pub const fn context(&self) -> &ChunkIndexContext {
        match self {
            Self::SingleChunk(index) => index.context(),
            Self::Implicit(index) => index.context(),
            Self::FixedArray(index) => index.context(),
            Self::ExtensibleArray(index) => index.context(),
            Self::BTreeV1(index) => index.context(),
            Self::BTreeV2(index) => index.context(),
        }
    }

    /// Locate the chunk at `chunk_indices`. Returns [`None`] if the chunk was never written.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if `chunk_indices` are outside the chunk grid, an index structure cannot be read, or an index structure is malformed.
    pub fn locate(
        &self,
        storage: &dyn ReadableStorageTraits,
        chunk_indices: &[u64],
    ) -> Result<Option<ChunkLocation>, DatasetError> {
        self.context().validate_chunk_indices(chunk_indices)?;
        let location = match self {
            Self::SingleChunk(index) => index.locate(),
            Self::Implicit(index) => index.locate(chunk_indices),
            Self::FixedArray(index) => index.locate(storage, chunk_indices)?,
            Self::ExtensibleArray(index) => index.locate(storage, chunk_indices)?,
            Self::BTreeV1(index) => index.locate(storage, chunk_indices)?,
            Self::BTreeV2(index) => index.locate(storage, chunk_indices)?,
        };
        Ok(Self::log_location(chunk_indices, location))
    }

    /// Asynchronously locate the chunk at `chunk_indices`. Returns [`None`] if the chunk was never written.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if `chunk_indices` are outside the chunk grid, an index structure cannot be read, or an index structure is malformed.
    #[cfg(feature = "async")]
    pub async fn async_locate(
        &self,
        storage: &dyn AsyncReadableStorageTraits,
        chunk_indices: &[u64],
    ) -> Result<Option<ChunkLocation>, DatasetError> {
        self.context().validate_chunk_indices(chunk_indices)?;
        let location = match self {
            Self::SingleChunk(index) => index.locate(),
            Self::Implicit(index) => index.locate(chunk_indices),
            Self::FixedArray(index) => index.async_locate(storage, chunk_indices).await?,
            Self::ExtensibleArray(index) => index.async_locate(storage, chunk_indices).await?,
            Self::BTreeV1(index) => index.async_locate(storage, chunk_indices).await?,
            Self::BTreeV2(index) => index.async_locate(storage, chunk_indices).await?,
        };
        Ok(Self::log_location(chunk_indices, location))
    }

    fn log_location(
        chunk_indices: &[u64],
        location: Option<ChunkLocation>,
    ) -> Option<ChunkLocation> {
        let location = location.filter(|location| !is_undefined_address(location.address));
        match &location {
            Some(location) => log::trace!(
                "chunk {chunk_indices:?} located at address {} ({} bytes, filter mask {:#x})",
                location.address,
                location.size,
                location.filter_mask
            ),
            None => log::trace!("chunk {chunk_indices:?} is absent"),
        }
        location
    }
}
