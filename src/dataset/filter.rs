//! The filter pipeline.
//!
//! A filter is a reversible `bytes->bytes` transform (compression, byte shuffling, checksumming) applied to each chunk before it was written.
//! A [`FilterPipeline`] holds the ordered [`FilterDescription`]s of a dataset and undoes them in reverse order when a chunk is read.
//! The per-chunk filter mask marks stages that were skipped when that chunk was written: bit `i` set means stage `i` (0-based, in pipeline order) was not applied.
//!
//! Filters are resolved from their numeric identifier through a process-wide registry of [`FilterPlugin`]s, populated at compile time with [`inventory`].
//! Built-in filters:
//!  - `deflate` (id 1): zlib compression (feature `deflate`).
//!  - `shuffle` (id 2): byte shuffling by element size.
//!  - `fletcher32` (id 3): a Fletcher-32 checksum appended to the chunk.
//!  - `scaleoffset` (id 6): offsets from the chunk minimum packed into the fewest bits.
//!  - `bzip2` (id 307): bzip2 compression (feature `bz2`).
//!  - `zstd` (id 32015): Zstandard compression (feature `zstd`).
//!
//! The `nbit` filter (id 5) is not built in.
//! An unregistered identifier is only an error if a chunk actually needs that stage to be undone.

#[cfg(feature = "bz2")]
pub mod bz2;
#[cfg(feature = "deflate")]
pub mod deflate;
pub mod fletcher32;
pub mod scale_offset;
pub mod shuffle;
#[cfg(feature = "zstd")]
pub mod zstd;

mod filter_description;

pub use filter_description::{decode_filter_pipeline_message, FilterDescription};

use thiserror::Error;

use crate::plugin::{Plugin, PluginCreateError};

/// The maximum number of filters in a pipeline, limited by the width of a chunk filter mask.
pub const MAX_FILTERS: usize = 32;

/// A filter plugin.
pub type FilterPlugin = Plugin<Box<dyn FilterTraits>>;
inventory::collect!(FilterPlugin);

/// Traits for a filter.
pub trait FilterTraits: dyn_clone::DynClone + core::fmt::Debug + Send + Sync {
    /// Return the identifier of the filter.
    fn identifier(&self) -> &'static str;

    /// Apply the filter, as done when a chunk is written.
    ///
    /// # Errors
    /// Returns [`FilterError`] if the filter fails.
    fn encode(&self, decoded_value: &[u8]) -> Result<Vec<u8>, FilterError>;

    /// Undo the filter.
    ///
    /// # Errors
    /// Returns [`FilterError`] if the filter fails, for example if the encoded value is corrupt.
    fn decode(&self, encoded_value: &[u8]) -> Result<Vec<u8>, FilterError>;
}

dyn_clone::clone_trait_object!(FilterTraits);

/// Create a filter from a [`FilterDescription`] using the registered [`FilterPlugin`]s.
///
/// # Errors
/// Returns [`PluginCreateError`] if no plugin is registered for the filter identifier or its client data is invalid.
pub fn filter_from_description(
    description: &FilterDescription,
) -> Result<Box<dyn FilterTraits>, PluginCreateError> {
    for plugin in inventory::iter::<FilterPlugin> {
        if plugin.match_id(description.id()) {
            return plugin.create(description);
        }
    }
    Err(PluginCreateError::Unsupported {
        name: format!("{} (id {})", description.name_or_unnamed(), description.id()),
        plugin_type: "filter".to_string(),
    })
}

#[derive(Clone, Debug)]
struct FilterStage {
    description: FilterDescription,
    filter: Result<Box<dyn FilterTraits>, FilterError>,
}

/// An ordered filter pipeline.
#[derive(Clone, Debug, Default)]
pub struct FilterPipeline {
    stages: Vec<FilterStage>,
}

impl FilterPipeline {
    /// Create a new filter pipeline from `descriptions`, in the order the filters are applied when writing.
    ///
    /// Each filter is resolved from the registry now.
    /// A filter that cannot be resolved is only reported when a chunk needs it.
    ///
    /// # Errors
    /// Returns [`FilterError::InvalidPipeline`] if there are more than [`MAX_FILTERS`] descriptions.
    pub fn new(descriptions: Vec<FilterDescription>) -> Result<Self, FilterError> {
        if descriptions.len() > MAX_FILTERS {
            return Err(FilterError::InvalidPipeline(format!(
                "{} filters exceeds the maximum of {MAX_FILTERS}",
                descriptions.len()
            )));
        }
        let stages = descriptions
            .into_iter()
            .map(|description| {
                let filter = filter_from_description(&description)
                    .map_err(|err| FilterError::from_create_error(&description, err));
                FilterStage {
                    description,
                    filter,
                }
            })
            .collect();
        Ok(Self { stages })
    }

    /// Return true if the pipeline has no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Return the number of filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Return the filter descriptions, in the order the filters are applied when writing.
    pub fn descriptions(&self) -> impl Iterator<Item = &FilterDescription> {
        self.stages.iter().map(|stage| &stage.description)
    }

    /// Undo the filters of a chunk stored with `filter_mask`, last applied first.
    ///
    /// # Errors
    /// Returns [`FilterError`] if a required filter is not registered or fails.
    pub fn decode(&self, encoded_value: Vec<u8>, filter_mask: u32) -> Result<Vec<u8>, FilterError> {
        let mut bytes = encoded_value;
        for (index, stage) in self.stages.iter().enumerate().rev() {
            if filter_mask & (1 << index) != 0 {
                log::trace!(
                    "filter {} skipped by mask {filter_mask:#x}",
                    stage.description.name_or_unnamed()
                );
                continue;
            }
            let filter = stage.filter.as_ref().map_err(Clone::clone)?;
            bytes = filter.decode(&bytes)?;
        }
        Ok(bytes)
    }

    /// Apply every filter in order.
    ///
    /// # Errors
    /// Returns [`FilterError`] if a filter is not registered or fails.
    pub fn encode(&self, decoded_value: Vec<u8>) -> Result<Vec<u8>, FilterError> {
        let mut bytes = decoded_value;
        for stage in &self.stages {
            let filter = stage.filter.as_ref().map_err(Clone::clone)?;
            bytes = filter.encode(&bytes)?;
        }
        Ok(bytes)
    }
}

/// A filter error.
#[derive(Clone, Debug, Error)]
#[allow(missing_docs)]
pub enum FilterError {
    /// No filter is registered for the identifier.
    #[error("filter {name} (id {id}) is not registered")]
    UnsupportedFilter { id: u16, name: String },
    /// A filter failed to undo its transform.
    #[error("{filter} filter failed to decode: {reason}")]
    DecodeFailure { filter: &'static str, reason: String },
    /// A filter failed to apply its transform.
    #[error("{filter} filter failed to encode: {reason}")]
    EncodeFailure { filter: &'static str, reason: String },
    /// The client data of a filter is invalid.
    #[error("invalid filter parameters: {0}")]
    InvalidParameters(String),
    /// The pipeline is invalid.
    #[error("invalid filter pipeline: {0}")]
    InvalidPipeline(String),
}

impl FilterError {
    fn from_create_error(description: &FilterDescription, err: PluginCreateError) -> Self {
        match err {
            PluginCreateError::Unsupported { .. } => Self::UnsupportedFilter {
                id: description.id(),
                name: description.name_or_unnamed().to_string(),
            },
            PluginCreateError::ParametersInvalid(err) => Self::InvalidParameters(err.to_string()),
            PluginCreateError::Other(err) => Self::InvalidParameters(err),
        }
    }
}
