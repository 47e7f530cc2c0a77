use std::sync::Arc;

use crate::{format::FormatContext, selection::Extent};

use super::{
    chunk_cache::{ChunkCache, ChunkCacheLruSizeLimit},
    chunk_index::{ChunkIndex, ChunkIndexContext},
    filter::FilterPipeline,
    ChunkedDataset, DatasetData, DatasetError, DatasetLayout, DatasetMetadata, FillValue,
};

/// A [`ChunkedDataset`] builder.
///
/// The dataset builder is initialised from an extent, an element size and a [`DatasetLayout`].
///  - The maximum extent defaults to the current extent.
///  - The fill value is undefined, so unwritten elements read as zero bytes.
///  - File addresses and lengths are 8 bytes.
///
/// No storage is read by [`build`](DatasetBuilder::build); chunk index structures are read lazily when chunks are located.
///
/// For example:
///
/// ```rust
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # use std::sync::Arc;
/// use h5chunk::dataset::{DatasetBuilder, DatasetLayout, FillValue};
/// use h5chunk::selection::{HyperslabBuilder, Selection};
/// use h5chunk::storage::MemoryStore;
///
/// let store = Arc::new(MemoryStore::new_with_bytes((0..16).collect()));
/// let dataset = DatasetBuilder::new(
///     vec![4, 4], // extent
///     1,          // element size
///     DatasetLayout::Contiguous { address: 0, size: None },
/// )
/// .fill_value(FillValue::from(0u8))
/// .build(store)?;
///
/// let hyperslab = HyperslabBuilder::new(2)
///     .with_start(vec![1, 1])
///     .with_count(vec![2, 2])
///     .build()?;
/// let bytes = dataset.read_selection(&Selection::from(hyperslab))?;
/// assert_eq!(bytes, vec![5, 6, 9, 10]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct DatasetBuilder {
    /// Current extent.
    pub extent: Extent,
    /// Maximum extent, [`None`] in a dimension if it is unlimited.
    pub max_extent: Option<Vec<Option<u64>>>,
    /// Element size in bytes.
    pub element_size: usize,
    /// Storage layout.
    pub layout: DatasetLayout,
    /// Fill value.
    pub fill_value: FillValue,
    /// File address and length sizes.
    pub format: FormatContext,
}

impl DatasetBuilder {
    /// Create a new dataset builder.
    #[must_use]
    pub fn new(extent: Extent, element_size: usize, layout: DatasetLayout) -> Self {
        Self {
            extent,
            max_extent: None,
            element_size,
            layout,
            fill_value: FillValue::undefined(),
            format: FormatContext::default(),
        }
    }

    /// Create a new dataset builder from dataset metadata.
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidFormat`] if the address or length size of the metadata is not supported.
    pub fn from_metadata(metadata: &DatasetMetadata) -> Result<Self, DatasetError> {
        let mut builder = Self::new(
            metadata.extent.clone(),
            metadata.element_size,
            metadata.layout.clone(),
        );
        builder
            .fill_value(metadata.fill_value.clone())
            .format(FormatContext::new(
                metadata.offset_size,
                metadata.length_size,
            )?);
        if let Some(max_extent) = &metadata.max_extent {
            builder.max_extent(max_extent.clone());
        }
        Ok(builder)
    }

    /// Set the maximum extent.
    pub fn max_extent(&mut self, max_extent: Vec<Option<u64>>) -> &mut Self {
        self.max_extent = Some(max_extent);
        self
    }

    /// Set the fill value.
    pub fn fill_value(&mut self, fill_value: FillValue) -> &mut Self {
        self.fill_value = fill_value;
        self
    }

    /// Set the file address and length sizes.
    pub fn format(&mut self, format: FormatContext) -> &mut Self {
        self.format = format;
        self
    }

    /// Build into a [`ChunkedDataset`] with a [`ChunkCacheLruSizeLimit`] of the [default size](crate::config::Config#default-chunk-cache-size).
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidLayout`] if the layout is inconsistent with the extent or element size.
    pub fn build<TStorage: ?Sized>(
        &self,
        storage: Arc<TStorage>,
    ) -> Result<ChunkedDataset<TStorage>, DatasetError> {
        self.build_with_cache(storage, ChunkCacheLruSizeLimit::default())
    }

    /// Build into a [`ChunkedDataset`] that caches decoded chunks in `cache`.
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidLayout`] if the layout is inconsistent with the extent or element size.
    pub fn build_with_cache<TStorage: ?Sized, CC: ChunkCache>(
        &self,
        storage: Arc<TStorage>,
        cache: CC,
    ) -> Result<ChunkedDataset<TStorage, CC>, DatasetError> {
        if self.element_size == 0 {
            return Err(DatasetError::InvalidLayout(
                "the element size must be non-zero".to_string(),
            ));
        }
        if !self.fill_value.is_undefined() && self.fill_value.size() != self.element_size {
            return Err(DatasetError::InvalidLayout(format!(
                "fill value {} is incompatible with element size {}",
                self.fill_value, self.element_size
            )));
        }
        let data_size = self
            .extent
            .iter()
            .try_fold(self.element_size as u64, |size, dim| size.checked_mul(*dim))
            .ok_or_else(|| {
                DatasetError::InvalidLayout(format!(
                    "the size of extent {:?} overflows",
                    self.extent
                ))
            })?;

        let data = match &self.layout {
            DatasetLayout::Compact { data } => {
                if data.len() as u64 != data_size {
                    return Err(DatasetError::InvalidLayout(format!(
                        "compact data has {} bytes, expected {data_size}",
                        data.len()
                    )));
                }
                DatasetData::Compact(data.clone().into())
            }
            DatasetLayout::Contiguous { address, size } => {
                if let Some(size) = size {
                    if *size < data_size {
                        return Err(DatasetError::InvalidLayout(format!(
                            "contiguous data has {size} bytes, expected at least {data_size}"
                        )));
                    }
                }
                DatasetData::Contiguous { address: *address }
            }
            DatasetLayout::Chunked {
                chunk_shape,
                index,
                filters,
            } => {
                let max_extent = self
                    .max_extent
                    .clone()
                    .unwrap_or_else(|| self.extent.iter().copied().map(Some).collect());
                let context = ChunkIndexContext::new(
                    self.format,
                    self.extent.clone(),
                    max_extent,
                    chunk_shape.clone(),
                    self.element_size,
                    !filters.is_empty(),
                )?;
                let filters = FilterPipeline::new(filters.clone())?;
                let index = ChunkIndex::new(index, context)?;
                DatasetData::Chunked { index, filters }
            }
        };
        log::debug!(
            "opened {} dataset with extent {:?} and element size {}",
            data.class(),
            self.extent,
            self.element_size
        );

        Ok(ChunkedDataset {
            storage,
            extent: self.extent.clone(),
            element_size: self.element_size,
            fill_value: self.fill_value.clone(),
            data,
            cache,
        })
    }
}
