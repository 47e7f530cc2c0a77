use std::sync::Arc;

use thiserror::Error;

use crate::{
    format::FormatError,
    selection::{Coordinates, Extent, SelectionError},
    storage::StorageError,
};

use super::filter::FilterError;

/// A dataset error.
///
/// Lower level errors are converted into the category that describes them, so callers can match on the category:
///  - [`FormatError`]s become [`MalformedSignature`](DatasetError::MalformedSignature), [`UnsupportedVersion`](DatasetError::UnsupportedVersion) or [`InvalidFormat`](DatasetError::InvalidFormat),
///  - [`SelectionError`]s become [`OutOfBounds`](DatasetError::OutOfBounds) or [`InvalidSelection`](DatasetError::InvalidSelection),
///  - [`FilterError`]s become [`UnsupportedFilter`](DatasetError::UnsupportedFilter) or [`DecodeFailure`](DatasetError::DecodeFailure),
///  - [`StorageError`]s become [`IoFailure`](DatasetError::IoFailure).
#[derive(Clone, Debug, Error)]
#[allow(missing_docs)]
pub enum DatasetError {
    /// The signature of an index structure does not match.
    #[error(transparent)]
    MalformedSignature(FormatError),
    /// The version of an index structure is not supported.
    #[error(transparent)]
    UnsupportedVersion(FormatError),
    /// An index structure is otherwise invalid, truncated or corrupt.
    #[error(transparent)]
    InvalidFormat(FormatError),
    /// The selection exceeds the extent.
    #[error(transparent)]
    OutOfBounds(SelectionError),
    /// The selection is malformed or does not match the dimensionality of the dataset.
    #[error(transparent)]
    InvalidSelection(SelectionError),
    /// The file and memory selections have different numbers of elements.
    #[error("file selection has {file} elements, memory selection has {memory}")]
    SelectionSizeMismatch { file: u64, memory: u64 },
    /// A chunk needs a filter that is not registered.
    #[error("filter {name} (id {id}) is not registered")]
    UnsupportedFilter { id: u16, name: String },
    /// The byte-range source failed.
    #[error(transparent)]
    IoFailure(Arc<StorageError>),
    /// A filter failed to decode a chunk.
    #[error(transparent)]
    DecodeFailure(FilterError),
    /// The dataset layout is inconsistent.
    #[error("invalid dataset layout: {0}")]
    InvalidLayout(String),
    /// A decoded chunk does not have the size of a chunk.
    #[error("chunk {chunk_indices:?} decoded to {got} bytes, expected {expected}")]
    ChunkSizeMismatch {
        chunk_indices: Coordinates,
        expected: u64,
        got: u64,
    },
    /// The destination buffer does not have the size of the memory extent.
    #[error("destination buffer has {got} bytes, expected {expected}")]
    InvalidDestinationSize { expected: u64, got: u64 },
    /// The size of a requested element type does not match the element size of the dataset.
    #[error("element type has size {got}, the dataset element size is {expected}")]
    IncompatibleElementSize { expected: usize, got: usize },
    /// The chunk grid indices are outside the chunk grid.
    #[error("chunk grid indices {_0:?} are not valid for a chunk grid with shape {_1:?}")]
    InvalidChunkGridIndices(Coordinates, Extent),
}

impl From<FormatError> for DatasetError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::MalformedSignature { .. } => Self::MalformedSignature(err),
            FormatError::UnsupportedVersion { .. } => Self::UnsupportedVersion(err),
            _ => Self::InvalidFormat(err),
        }
    }
}

impl From<SelectionError> for DatasetError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::OutOfBounds(..) => Self::OutOfBounds(err),
            SelectionError::InvalidSelection(_) | SelectionError::IncompatibleDimensionality(_) => {
                Self::InvalidSelection(err)
            }
        }
    }
}

impl From<FilterError> for DatasetError {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::UnsupportedFilter { id, name } => Self::UnsupportedFilter { id, name },
            _ => Self::DecodeFailure(err),
        }
    }
}

impl From<StorageError> for DatasetError {
    fn from(err: StorageError) -> Self {
        Self::IoFailure(Arc::new(err))
    }
}

impl From<Arc<DatasetError>> for DatasetError {
    fn from(err: Arc<DatasetError>) -> Self {
        Arc::unwrap_or_clone(err)
    }
}
