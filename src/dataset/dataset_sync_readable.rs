use rayon::iter::{IntoParallelIterator, ParallelIterator};
use rayon_iter_concurrent_limit::iter_concurrent_limit;

use crate::{
    config::global_config,
    selection::{ChunkSteps, Selection},
    storage::{Bytes, ReadableStorageTraits},
};

use super::{
    chunk_cache::ChunkCache, copy_elements, decode_chunk, ravel_indices, ChunkedDataset,
    DatasetData, DatasetError, ReadPlan,
};

impl<TStorage: ?Sized + ReadableStorageTraits + 'static, CC: ChunkCache>
    ChunkedDataset<TStorage, CC>
{
    /// Read the elements of `file_selection` into the elements of `memory_selection` of `destination`.
    ///
    /// `destination` holds the elements of a row-major array with `memory_extent`.
    /// Elements are transferred in lockstep: the `i`th element of the file selection is written to the `i`th element of the memory selection.
    /// Elements of `destination` outside of the memory selection are not modified.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if:
    ///  - a selection is out of bounds or invalid,
    ///  - the selections have a different number of elements,
    ///  - the size of `destination` does not match `memory_extent`,
    ///  - a chunk cannot be located, read or decoded.
    ///
    /// Selections are validated before any storage is read.
    /// If an error occurs after that, the content of `destination` is unspecified.
    pub fn read(
        &self,
        destination: &mut [u8],
        file_selection: &Selection,
        memory_selection: &Selection,
        memory_extent: &[u64],
    ) -> Result<(), DatasetError> {
        let ReadPlan {
            file_steps,
            mut memory,
        } = self.plan_read(
            destination.len(),
            file_selection,
            memory_selection,
            memory_extent,
        )?;

        match &self.data {
            DatasetData::Compact(data) => {
                for step in file_steps {
                    copy_elements(
                        destination,
                        &mut memory,
                        Some(data.as_ref()),
                        ravel_indices(step.coordinates(), &self.extent),
                        step.run_length(),
                        self.element_size,
                        &self.fill_value,
                    )?;
                }
            }
            DatasetData::Contiguous { address } => {
                let defined = !crate::format::is_undefined_address(*address);
                for step in file_steps {
                    let bytes = if defined {
                        let offset = address + self.element_byte_offset(step.coordinates());
                        let length = step.run_length() * self.element_size as u64;
                        Some(self.storage.read_zero_padded(offset, length)?)
                    } else {
                        None
                    };
                    copy_elements(
                        destination,
                        &mut memory,
                        bytes.as_deref(),
                        0,
                        step.run_length(),
                        self.element_size,
                        &self.fill_value,
                    )?;
                }
            }
            DatasetData::Chunked { index, .. } => {
                let mut current: Option<(Vec<u64>, Option<Bytes>)> = None;
                for chunk_step in ChunkSteps::new(file_steps, index.context().chunk_shape()) {
                    let chunk_indices = chunk_step.chunk_indices();
                    if current
                        .as_ref()
                        .map_or(true, |(indices, _)| indices.as_slice() != chunk_indices)
                    {
                        let chunk = self.retrieve_chunk_if_exists(chunk_indices)?;
                        current = Some((chunk_indices.to_vec(), chunk));
                    }
                    let chunk = current.as_ref().and_then(|(_, chunk)| chunk.as_deref());
                    copy_elements(
                        destination,
                        &mut memory,
                        chunk,
                        chunk_step.chunk_offset(),
                        chunk_step.length(),
                        self.element_size,
                        &self.fill_value,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Read the elements of `file_selection` into a new buffer, in selection order.
    ///
    /// # Errors
    /// See [`read`](ChunkedDataset::read).
    pub fn read_selection(&self, file_selection: &Selection) -> Result<Vec<u8>, DatasetError> {
        let (mut bytes, num_elements) = self.allocate_selection(file_selection)?;
        self.read(
            &mut bytes,
            file_selection,
            &Selection::All,
            &[num_elements],
        )?;
        Ok(bytes)
    }

    /// Read the elements of `file_selection` into a vector of `T`, in selection order.
    ///
    /// # Errors
    /// Returns [`DatasetError::IncompatibleElementSize`] if the size of `T` is not the element size, or an error condition of [`read`](ChunkedDataset::read).
    pub fn read_elements<T: bytemuck::Pod>(
        &self,
        file_selection: &Selection,
    ) -> Result<Vec<T>, DatasetError> {
        self.validate_element_size::<T>()?;
        let bytes = self.read_selection(file_selection)?;
        Ok(transmute_from_bytes_vec(bytes))
    }

    #[cfg(feature = "ndarray")]
    /// Read the elements of `file_selection` into an [`ndarray::ArrayD`] with the [shape of the selection](crate::dataset::selection_shape).
    ///
    /// # Errors
    /// Returns [`DatasetError::IncompatibleElementSize`] if the size of `T` is not the element size, or an error condition of [`read`](ChunkedDataset::read).
    pub fn read_ndarray<T: bytemuck::Pod>(
        &self,
        file_selection: &Selection,
    ) -> Result<ndarray::ArrayD<T>, DatasetError> {
        let shape = super::selection_shape(file_selection, &self.extent);
        let elements = self.read_elements::<T>(file_selection)?;
        elements_to_ndarray(&shape, elements)
    }

    /// Read and decode the chunk at `chunk_indices`. Returns [`None`] if the chunk was never written.
    ///
    /// The chunk is taken from the chunk cache if present, otherwise it is cached once decoded.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if the dataset is not chunked, the chunk indices are outside the chunk grid, or the chunk cannot be located, read or decoded.
    pub fn retrieve_chunk_if_exists(
        &self,
        chunk_indices: &[u64],
    ) -> Result<Option<Bytes>, DatasetError> {
        let (index, filters) = self.chunked()?;
        if let Some(chunk) = self.cache.get(chunk_indices) {
            log::trace!("chunk cache hit for chunk {chunk_indices:?}");
            return Ok(Some(chunk));
        }
        let Some(location) = index.locate(&self.storage, chunk_indices)? else {
            return Ok(None);
        };
        log::trace!("chunk cache miss for chunk {chunk_indices:?}");
        let chunk = self
            .cache
            .try_get_or_insert_with(chunk_indices.to_vec(), || {
                let encoded = self
                    .storage
                    .read_zero_padded(location.address, location.size)?;
                decode_chunk(index.context(), filters, chunk_indices, &location, encoded)
            })?;
        Ok(Some(chunk))
    }

    /// Read and decode the chunk at `chunk_indices`. A chunk that was never written is filled with the fill value.
    ///
    /// # Errors
    /// See [`retrieve_chunk_if_exists`](ChunkedDataset::retrieve_chunk_if_exists).
    pub fn retrieve_chunk(&self, chunk_indices: &[u64]) -> Result<Bytes, DatasetError> {
        match self.retrieve_chunk_if_exists(chunk_indices)? {
            Some(chunk) => Ok(chunk),
            None => self.fill_chunk(self.chunked()?.0.context()),
        }
    }

    /// Read and decode the chunk at `chunk_indices` into a vector of `T`.
    ///
    /// # Errors
    /// Returns [`DatasetError::IncompatibleElementSize`] if the size of `T` is not the element size, or an error condition of [`retrieve_chunk`](ChunkedDataset::retrieve_chunk).
    pub fn retrieve_chunk_elements<T: bytemuck::Pod>(
        &self,
        chunk_indices: &[u64],
    ) -> Result<Vec<T>, DatasetError> {
        self.validate_element_size::<T>()?;
        let chunk = self.retrieve_chunk(chunk_indices)?;
        Ok(bytemuck::allocation::pod_collect_to_vec(&chunk))
    }

    /// Read and decode the chunks at `chunks`, in order.
    ///
    /// Chunks are read and decoded concurrently, up to the [chunk concurrent minimum](crate::config::Config#default-chunk-concurrency-minimum) at a time.
    ///
    /// # Errors
    /// Returns the first error of [`retrieve_chunk`](ChunkedDataset::retrieve_chunk) for any chunk.
    pub fn retrieve_chunks(&self, chunks: &[Vec<u64>]) -> Result<Vec<Bytes>, DatasetError> {
        let chunk_concurrent_limit = global_config().chunk_concurrent_minimum().max(1);
        iter_concurrent_limit!(
            chunk_concurrent_limit,
            chunks,
            map,
            |chunk_indices: &Vec<u64>| self.retrieve_chunk(chunk_indices)
        )
        .collect::<Result<Vec<_>, _>>()
    }

    pub(super) fn validate_element_size<T>(&self) -> Result<(), DatasetError> {
        if std::mem::size_of::<T>() == self.element_size {
            Ok(())
        } else {
            Err(DatasetError::IncompatibleElementSize {
                expected: self.element_size,
                got: std::mem::size_of::<T>(),
            })
        }
    }
}

/// Transmute from `Vec<u8>` to `Vec<T>`, copying only if the allocation is not suitably aligned.
pub(super) fn transmute_from_bytes_vec<T: bytemuck::Pod>(from: Vec<u8>) -> Vec<T> {
    bytemuck::allocation::try_cast_vec(from)
        .unwrap_or_else(|(_err, from)| bytemuck::allocation::pod_collect_to_vec(&from))
}

#[cfg(feature = "ndarray")]
pub(super) fn elements_to_ndarray<T>(
    shape: &[u64],
    elements: Vec<T>,
) -> Result<ndarray::ArrayD<T>, DatasetError> {
    let length = elements.len();
    let shape = shape
        .iter()
        .map(|size| usize::try_from(*size))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| DatasetError::InvalidDestinationSize {
            expected: u64::MAX,
            got: length as u64,
        })?;
    ndarray::ArrayD::<T>::from_shape_vec(shape.clone(), elements).map_err(|_| {
        DatasetError::InvalidDestinationSize {
            expected: shape.iter().product::<usize>() as u64,
            got: length as u64,
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use super::*;
    use crate::{
        dataset::{
            chunk_cache::{ChunkCacheLruChunkLimit, ChunkCacheLruSizeLimit, ChunkCacheNone},
            chunk_index::{
                extensible_array::ExtensibleArrayParameters,
                test_util::{
                    write_btree_v1, write_btree_v2, write_extensible_array, write_fixed_array,
                    FileImage,
                },
                ChunkIndexContext, ChunkIndexDescriptor, ChunkIndexType, ChunkLocation,
            },
            filter::{FilterDescription, FilterPipeline},
            DatasetBuilder, DatasetLayout, FillValue,
        },
        format::{FormatContext, UNDEFINED_ADDRESS},
        selection::{
            HyperslabBuilder, HyperslabBlock, IrregularHyperslab, PointSelection,
            RegularHyperslab,
        },
        storage::{storage_adapter::PerformanceMetricsStorageAdapter, MemoryStore},
    };

    type MetricsStore = PerformanceMetricsStorageAdapter<MemoryStore>;

    /// A chunked dataset written to an in-memory file.
    struct Written {
        store: Arc<MemoryStore>,
        layout: DatasetLayout,
        locations: BTreeMap<Vec<u64>, ChunkLocation>,
    }

    fn write_chunked(
        index_type: ChunkIndexType,
        extent: &[u64],
        max_extent: &[Option<u64>],
        chunk_shape: &[u64],
        element_size: usize,
        chunks: &BTreeMap<Vec<u64>, Vec<u8>>,
        filters: &[FilterDescription],
    ) -> Written {
        let pipeline = FilterPipeline::new(filters.to_vec()).unwrap();
        let mut image = FileImage::new(64);
        let mut locations = BTreeMap::new();
        for (chunk_indices, bytes) in chunks {
            let encoded = pipeline.encode(bytes.clone()).unwrap();
            let address = image.append(&encoded);
            locations.insert(
                chunk_indices.clone(),
                ChunkLocation::new(address, encoded.len() as u64, 0),
            );
        }
        let context = ChunkIndexContext::new(
            FormatContext::default(),
            extent.to_vec(),
            max_extent.to_vec(),
            chunk_shape.to_vec(),
            element_size,
            !filters.is_empty(),
        )
        .unwrap();
        let address = match index_type {
            ChunkIndexType::FixedArray => write_fixed_array(&mut image, &context, &locations, 2),
            ChunkIndexType::ExtensibleArray => write_extensible_array(
                &mut image,
                &context,
                &locations,
                ExtensibleArrayParameters {
                    max_entries_bits: 32,
                    index_block_entries: 4,
                    data_block_min_entries: 4,
                    secondary_block_min_data_blocks: 4,
                    page_bits: 4,
                },
            ),
            ChunkIndexType::BTreeV1 => write_btree_v1(&mut image, &context, &locations, 4),
            ChunkIndexType::BTreeV2 => write_btree_v2(&mut image, &context, &locations, 512),
            ChunkIndexType::SingleChunk | ChunkIndexType::Implicit => unreachable!(),
        };
        Written {
            store: Arc::new(MemoryStore::new_with_bytes(image.finish())),
            layout: DatasetLayout::Chunked {
                chunk_shape: chunk_shape.to_vec(),
                index: ChunkIndexDescriptor::new(index_type, address),
                filters: filters.to_vec(),
            },
            locations,
        }
    }

    /// The `u16` elements of a chunk, each the linear index of the element in the dataset.
    ///
    /// Elements of the chunk outside of the extent are zero.
    fn chunk_elements(extent: &[u64], chunk_shape: &[u64], chunk_indices: &[u64]) -> Vec<u8> {
        let num_elements: u64 = chunk_shape.iter().product();
        let elements: Vec<u16> = (0..num_elements)
            .map(|i| {
                let mut remainder = i;
                let mut coordinates = vec![0; chunk_shape.len()];
                for dim in (0..chunk_shape.len()).rev() {
                    coordinates[dim] =
                        chunk_indices[dim] * chunk_shape[dim] + remainder % chunk_shape[dim];
                    remainder /= chunk_shape[dim];
                }
                if std::iter::zip(&coordinates, extent).all(|(c, e)| c < e) {
                    u16::try_from(ravel_indices(&coordinates, extent)).unwrap()
                } else {
                    0
                }
            })
            .collect();
        bytemuck::allocation::pod_collect_to_vec(&elements)
    }

    fn scenario_chunks(absent: &[u64]) -> BTreeMap<Vec<u64>, Vec<u8>> {
        (0..3u8)
            .filter(|chunk| !absent.contains(&u64::from(*chunk)))
            .map(|chunk| (vec![u64::from(chunk)], (chunk * 4..chunk * 4 + 4).collect()))
            .collect()
    }

    fn build<CC: ChunkCache>(
        written: &Written,
        extent: &[u64],
        max_extent: Option<Vec<Option<u64>>>,
        element_size: usize,
        fill_value: FillValue,
        cache: CC,
    ) -> ChunkedDataset<MetricsStore, CC> {
        let store = Arc::new(PerformanceMetricsStorageAdapter::new(written.store.clone()));
        let mut builder = DatasetBuilder::new(extent.to_vec(), element_size, written.layout.clone());
        builder.fill_value(fill_value);
        if let Some(max_extent) = max_extent {
            builder.max_extent(max_extent);
        }
        builder.build_with_cache(store, cache).unwrap()
    }

    #[test]
    fn dataset_read_hyperslab_across_chunks() {
        let written = write_chunked(
            ChunkIndexType::FixedArray,
            &[12],
            &[Some(12)],
            &[4],
            1,
            &scenario_chunks(&[]),
            &[],
        );
        let dataset = build(
            &written,
            &[12],
            None,
            1,
            FillValue::undefined(),
            ChunkCacheLruSizeLimit::new(1024),
        );
        let selection = Selection::from(RegularHyperslab::new_1d(2, 7));
        assert_eq!(
            dataset.read_selection(&selection).unwrap(),
            vec![2, 3, 4, 5, 6, 7, 8]
        );
        assert_eq!(dataset.cache().len(), 3);

        // Cached chunks are not read again
        let storage = dataset.storage();
        storage.reset();
        assert_eq!(
            dataset.read_selection(&selection).unwrap(),
            vec![2, 3, 4, 5, 6, 7, 8]
        );
        assert_eq!(storage.reads(), 0);

        dataset.cache().flush();
        assert_eq!(dataset.read_elements::<u8>(&Selection::All).unwrap(), (0..12).collect::<Vec<u8>>());
        assert_eq!(storage.reads(), 3);
    }

    #[test]
    fn dataset_read_absent_chunk_fill_value() {
        let written = write_chunked(
            ChunkIndexType::FixedArray,
            &[12],
            &[Some(12)],
            &[4],
            1,
            &scenario_chunks(&[1]),
            &[],
        );
        let dataset = build(
            &written,
            &[12],
            None,
            1,
            FillValue::from(0xeeu8),
            ChunkCacheLruSizeLimit::new(1024),
        );
        assert_eq!(
            dataset.read_selection(&Selection::All).unwrap(),
            vec![0, 1, 2, 3, 0xee, 0xee, 0xee, 0xee, 8, 9, 10, 11]
        );
        // Absent chunks are not cached
        assert_eq!(dataset.cache().len(), 2);
        assert!(dataset.retrieve_chunk_if_exists(&[1]).unwrap().is_none());
        assert_eq!(dataset.retrieve_chunk(&[1]).unwrap().as_ref(), &[0xee; 4]);
        assert_eq!(dataset.retrieve_chunk(&[2]).unwrap().as_ref(), &[8, 9, 10, 11]);

        let dataset = build(
            &written,
            &[12],
            None,
            1,
            FillValue::undefined(),
            ChunkCacheLruSizeLimit::new(1024),
        );
        assert_eq!(
            dataset.read_selection(&Selection::from(RegularHyperslab::new_1d(3, 6))).unwrap(),
            vec![3, 0, 0, 0, 0, 8]
        );
    }

    #[test]
    fn dataset_read_gapped_hyperslab() {
        let written = write_chunked(
            ChunkIndexType::FixedArray,
            &[6],
            &[Some(6)],
            &[4],
            1,
            &BTreeMap::from([(vec![0], vec![0, 1, 2, 3]), (vec![1], vec![4, 5, 0, 0])]),
            &[],
        );
        let dataset = build(
            &written,
            &[6],
            None,
            1,
            FillValue::undefined(),
            ChunkCacheNone,
        );
        let hyperslab = HyperslabBuilder::new(1)
            .with_stride(vec![3])
            .with_count(vec![2])
            .build()
            .unwrap();
        let selection = Selection::from(hyperslab);
        let steps: Vec<_> = selection
            .walk(&[6])
            .unwrap()
            .map(|step| (step.coordinates().to_vec(), step.run_length()))
            .collect();
        assert_eq!(steps, vec![(vec![0], 1), (vec![3], 1)]);
        assert_eq!(dataset.read_selection(&selection).unwrap(), vec![0, 3]);
    }

    #[test]
    fn dataset_read_filtered() {
        let filters = [FilterDescription::new(2, vec![2]), FilterDescription::new(1, vec![6])];
        let extent = [10, 10];
        let chunk_shape = [4, 4];
        let chunks: BTreeMap<Vec<u64>, Vec<u8>> = (0..3)
            .flat_map(|i| (0..3).map(move |j| vec![i, j]))
            .map(|chunk_indices| {
                let bytes = chunk_elements(&extent, &chunk_shape, &chunk_indices);
                (chunk_indices, bytes)
            })
            .collect();
        let written = write_chunked(
            ChunkIndexType::FixedArray,
            &extent,
            &[Some(10), Some(10)],
            &chunk_shape,
            2,
            &chunks,
            &filters,
        );
        let dataset = build(
            &written,
            &extent,
            None,
            2,
            FillValue::undefined(),
            ChunkCacheLruSizeLimit::new(1024),
        );
        let expected: Vec<u16> = (0..100).collect();
        assert_eq!(dataset.read_elements::<u16>(&Selection::All).unwrap(), expected);
        assert_eq!(
            dataset.retrieve_chunk(&[1, 2]).unwrap().as_ref(),
            chunks[&vec![1, 2]].as_slice()
        );

        // A corrupt chunk fails to decode
        let address = written.locations[&vec![1, 1]].address;
        written.store.invert_byte(address);
        let dataset = build(
            &written,
            &extent,
            None,
            2,
            FillValue::undefined(),
            ChunkCacheLruSizeLimit::new(1024),
        );
        assert!(matches!(
            dataset.read_elements::<u16>(&Selection::from(RegularHyperslab::new_1d(0, 4))),
            Err(DatasetError::InvalidSelection(_))
        ));
        let hyperslab = RegularHyperslab::new_with_start_shape(vec![4, 0], vec![1, 10]).unwrap();
        assert!(matches!(
            dataset.read_selection(&Selection::from(hyperslab)),
            Err(DatasetError::DecodeFailure(_))
        ));
        // Chunks before the corrupt chunk in the same row were cached
        assert_eq!(dataset.cache().len(), 1);
        assert!(dataset.retrieve_chunk(&[0, 0]).is_ok());
    }

    #[test]
    fn dataset_read_checksummed_corrupt() {
        let filters = [FilterDescription::new(1, vec![4]), FilterDescription::new(3, vec![])];
        let written = write_chunked(
            ChunkIndexType::BTreeV1,
            &[12],
            &[None],
            &[4],
            1,
            &scenario_chunks(&[]),
            &filters,
        );
        let location = written.locations[&vec![2]];
        written.store.invert_byte(location.address + location.size / 2);
        let dataset = build(
            &written,
            &[12],
            Some(vec![None]),
            1,
            FillValue::undefined(),
            ChunkCacheLruSizeLimit::new(1024),
        );
        assert_eq!(
            dataset.read_selection(&Selection::from(RegularHyperslab::new_1d(0, 8))).unwrap(),
            (0..8).collect::<Vec<u8>>()
        );
        assert!(matches!(
            dataset.read_selection(&Selection::All),
            Err(DatasetError::DecodeFailure(_))
        ));
    }

    #[test]
    fn dataset_read_chunk_size_mismatch() {
        let chunks = BTreeMap::from([(vec![0], vec![0, 1, 2]), (vec![1], vec![4, 5, 6, 7])]);
        let written = write_chunked(
            ChunkIndexType::FixedArray,
            &[8],
            &[Some(8)],
            &[4],
            1,
            &chunks,
            &[FilterDescription::new(2, vec![1])],
        );
        let dataset = build(
            &written,
            &[8],
            None,
            1,
            FillValue::undefined(),
            ChunkCacheLruSizeLimit::new(1024),
        );
        assert_eq!(dataset.retrieve_chunk(&[1]).unwrap().as_ref(), &[4, 5, 6, 7]);
        assert!(matches!(
            dataset.retrieve_chunk(&[0]),
            Err(DatasetError::ChunkSizeMismatch { expected: 4, got: 3, .. })
        ));
        assert!(matches!(
            dataset.retrieve_chunk(&[2]),
            Err(DatasetError::InvalidChunkGridIndices(..))
        ));
    }

    #[test]
    fn dataset_read_memory_selection() {
        let extent = [4, 6];
        let chunk_shape = [3, 4];
        let chunks: BTreeMap<Vec<u64>, Vec<u8>> = [vec![0, 0], vec![0, 1], vec![1, 1]]
            .into_iter()
            .map(|chunk_indices| {
                let bytes = chunk_elements(&extent, &chunk_shape, &chunk_indices);
                (chunk_indices, bytes)
            })
            .collect();
        for index_type in [
            ChunkIndexType::BTreeV1,
            ChunkIndexType::BTreeV2,
            ChunkIndexType::ExtensibleArray,
        ] {
            let max_extent = if index_type == ChunkIndexType::BTreeV2 {
                vec![None, None]
            } else {
                vec![None, Some(6)]
            };
            let written = write_chunked(
                index_type,
                &extent,
                &max_extent,
                &chunk_shape,
                2,
                &chunks,
                &[],
            );
            let dataset = build(
                &written,
                &extent,
                Some(max_extent),
                2,
                FillValue::from(0xffffu16),
                ChunkCacheLruChunkLimit::new(std::num::NonZeroUsize::new(2).unwrap()),
            );

            // Rows 2..4, columns 2..6 into a 3x5 buffer at (1, 1)
            let file_selection = Selection::from(
                RegularHyperslab::new_with_start_shape(vec![2, 2], vec![2, 4]).unwrap(),
            );
            let memory_selection = Selection::from(
                RegularHyperslab::new_with_start_shape(vec![1, 1], vec![2, 4]).unwrap(),
            );
            let mut destination = vec![0u8; 3 * 5 * 2];
            dataset
                .read(&mut destination, &file_selection, &memory_selection, &[3, 5])
                .unwrap();
            let elements: Vec<u16> = bytemuck::allocation::pod_collect_to_vec(&destination);
            #[rustfmt::skip]
            assert_eq!(
                elements,
                vec![
                    0, 0, 0, 0, 0,
                    0, 14, 15, 16, 17,
                    0, 0xffff, 0xffff, 22, 23,
                ],
                "{index_type}"
            );

            // Points into an irregular memory selection
            let points = Selection::from(
                PointSelection::new(vec![vec![3, 5], vec![0, 0], vec![1, 4], vec![3, 0]]).unwrap(),
            );
            let memory_selection = Selection::from(
                IrregularHyperslab::new(vec![
                    HyperslabBlock {
                        start: vec![1],
                        end: vec![2],
                    },
                    HyperslabBlock {
                        start: vec![4],
                        end: vec![5],
                    },
                ])
                .unwrap(),
            );
            let mut destination = vec![0u8; 6 * 2];
            dataset
                .read(&mut destination, &points, &memory_selection, &[6])
                .unwrap();
            let elements: Vec<u16> = bytemuck::allocation::pod_collect_to_vec(&destination);
            assert_eq!(elements, vec![0, 23, 0, 0, 10, 0xffff], "{index_type}");
        }
    }

    #[test]
    fn dataset_read_invalid() {
        let written = write_chunked(
            ChunkIndexType::FixedArray,
            &[12],
            &[Some(12)],
            &[4],
            1,
            &scenario_chunks(&[]),
            &[],
        );
        let dataset = build(
            &written,
            &[12],
            None,
            1,
            FillValue::undefined(),
            ChunkCacheLruSizeLimit::new(1024),
        );
        let storage = dataset.storage();
        let mut destination = vec![0u8; 4];
        assert!(matches!(
            dataset.read(
                &mut destination,
                &Selection::from(RegularHyperslab::new_1d(10, 4)),
                &Selection::All,
                &[4]
            ),
            Err(DatasetError::OutOfBounds(_))
        ));
        assert!(matches!(
            dataset.read(
                &mut destination,
                &Selection::from(RegularHyperslab::new_1d(0, 3)),
                &Selection::All,
                &[4]
            ),
            Err(DatasetError::SelectionSizeMismatch { file: 3, memory: 4 })
        ));
        assert!(matches!(
            dataset.read(
                &mut destination,
                &Selection::from(RegularHyperslab::new_1d(0, 2)),
                &Selection::from(RegularHyperslab::new_1d(0, 2)),
                &[3]
            ),
            Err(DatasetError::InvalidDestinationSize { expected: 3, got: 4 })
        ));
        assert!(matches!(
            dataset.read(
                &mut destination,
                &Selection::from(RegularHyperslab::new_1d(0, 4)),
                &Selection::All,
                &[2]
            ),
            Err(DatasetError::SelectionSizeMismatch { .. })
        ));
        assert!(matches!(
            dataset.read_elements::<u16>(&Selection::All),
            Err(DatasetError::IncompatibleElementSize { expected: 1, got: 2 })
        ));
        // Selections whose size or end overflow are rejected before allocating
        for selection in [
            Selection::from(
                RegularHyperslab::new(vec![0], vec![2], vec![u64::MAX / 2], vec![2]).unwrap(),
            ),
            Selection::from(RegularHyperslab::new(vec![2], vec![2], vec![u64::MAX], vec![1]).unwrap()),
            Selection::from(
                IrregularHyperslab::new(vec![HyperslabBlock {
                    start: vec![0],
                    end: vec![u64::MAX],
                }])
                .unwrap(),
            ),
        ] {
            assert!(matches!(
                dataset.read_selection(&selection),
                Err(DatasetError::OutOfBounds(_))
            ));
        }
        // Nothing is read until the read is validated
        assert_eq!(storage.reads(), 0);

        dataset
            .read(
                &mut destination,
                &Selection::from(RegularHyperslab::new_1d(4, 4)),
                &Selection::All,
                &[2, 2],
            )
            .unwrap();
        assert_eq!(destination, vec![4, 5, 6, 7]);
        assert!(matches!(
            dataset.retrieve_chunk_elements::<u16>(&[0]),
            Err(DatasetError::IncompatibleElementSize { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn dataset_read_contiguous_and_compact() {
        let store = Arc::new(MemoryStore::new_with_bytes((0..64).collect()));
        let contiguous = DatasetBuilder::new(
            vec![3, 4],
            2,
            DatasetLayout::Contiguous {
                address: 16,
                size: Some(24),
            },
        )
        .build(store.clone())
        .unwrap();
        let hyperslab = Selection::from(
            RegularHyperslab::new(vec![0, 1], vec![2, 2], vec![2, 2], vec![1, 1]).unwrap(),
        );
        assert_eq!(
            contiguous.read_selection(&hyperslab).unwrap(),
            vec![18, 19, 22, 23, 34, 35, 38, 39]
        );
        assert!(matches!(
            contiguous.retrieve_chunk(&[0, 0]),
            Err(DatasetError::InvalidLayout(_))
        ));
        assert!(contiguous.chunk_shape().is_none());

        // Raw data beyond the end of the file reads as zeros
        let truncated = DatasetBuilder::new(
            vec![8],
            1,
            DatasetLayout::Contiguous {
                address: 60,
                size: None,
            },
        )
        .build(store.clone())
        .unwrap();
        assert_eq!(
            truncated.read_selection(&Selection::All).unwrap(),
            vec![60, 61, 62, 63, 0, 0, 0, 0]
        );

        let unwritten = DatasetBuilder::new(
            vec![3],
            2,
            DatasetLayout::Contiguous {
                address: UNDEFINED_ADDRESS,
                size: None,
            },
        )
        .fill_value(FillValue::from(7u16))
        .build(store.clone())
        .unwrap();
        assert_eq!(unwritten.read_elements::<u16>(&Selection::All).unwrap(), vec![7, 7, 7]);

        let compact = DatasetBuilder::new(
            vec![2, 3],
            1,
            DatasetLayout::Compact {
                data: vec![1, 2, 3, 4, 5, 6],
            },
        )
        .build(store)
        .unwrap();
        let points =
            Selection::from(PointSelection::new(vec![vec![1, 2], vec![0, 1]]).unwrap());
        assert_eq!(compact.read_selection(&points).unwrap(), vec![6, 2]);
    }

    #[test]
    fn dataset_read_no_cache() {
        let written = write_chunked(
            ChunkIndexType::FixedArray,
            &[12],
            &[Some(12)],
            &[4],
            1,
            &scenario_chunks(&[]),
            &[],
        );
        let dataset = build(
            &written,
            &[12],
            None,
            1,
            FillValue::undefined(),
            ChunkCacheNone,
        );
        let storage = dataset.storage();
        assert_eq!(dataset.read_selection(&Selection::All).unwrap(), (0..12).collect::<Vec<u8>>());
        storage.reset();
        assert_eq!(dataset.read_selection(&Selection::All).unwrap(), (0..12).collect::<Vec<u8>>());
        // Index structures are cached, chunks are not
        assert_eq!(storage.reads(), 3);
        assert!(dataset.cache().is_empty());
    }

    #[test]
    fn dataset_retrieve_chunks() {
        let extent = [9, 7];
        let chunk_shape = [2, 3];
        let chunks: BTreeMap<Vec<u64>, Vec<u8>> = (0..5)
            .flat_map(|i| (0..3).map(move |j| vec![i, j]))
            .filter(|chunk_indices| chunk_indices != &vec![2, 1])
            .map(|chunk_indices| {
                let bytes = chunk_elements(&extent, &chunk_shape, &chunk_indices);
                (chunk_indices, bytes)
            })
            .collect();
        let written = write_chunked(
            ChunkIndexType::ExtensibleArray,
            &extent,
            &[None, Some(7)],
            &chunk_shape,
            2,
            &chunks,
            &[FilterDescription::new(2, vec![2])],
        );
        let dataset = build(
            &written,
            &extent,
            Some(vec![None, Some(7)]),
            2,
            FillValue::undefined(),
            ChunkCacheLruSizeLimit::new(1 << 16),
        );
        let all: Vec<Vec<u64>> = (0..5)
            .flat_map(|i| (0..3).map(move |j| vec![i, j]))
            .collect();
        let retrieved = dataset.retrieve_chunks(&all).unwrap();
        for (chunk_indices, chunk) in std::iter::zip(&all, &retrieved) {
            match chunks.get(chunk_indices) {
                Some(bytes) => assert_eq!(chunk.as_ref(), bytes.as_slice()),
                None => assert_eq!(chunk.as_ref(), &[0; 12]),
            }
        }
        assert_eq!(dataset.cache().len(), 14);
        assert_eq!(
            dataset.retrieve_chunk_elements::<u16>(&[4, 2]).unwrap(),
            vec![62, 0, 0, 0, 0, 0]
        );
        assert!(dataset.retrieve_chunks(&[vec![0, 0], vec![5, 0]]).is_err());

        // Concurrent reads of one dataset
        let expected: Vec<u16> = (0..63)
            .map(|i| if (4..6).contains(&(i / 7)) && (3..6).contains(&(i % 7)) { 0 } else { i })
            .collect();
        dataset.cache().flush();
        let results: Vec<Vec<u16>> = (0..8)
            .into_par_iter()
            .map(|_| dataset.read_elements::<u16>(&Selection::All).unwrap())
            .collect();
        for result in results {
            assert_eq!(result, expected);
        }
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn dataset_read_ndarray() {
        let extent = [5, 5];
        let chunk_shape = [2, 2];
        let chunks: BTreeMap<Vec<u64>, Vec<u8>> = (0..3)
            .flat_map(|i| (0..3).map(move |j| vec![i, j]))
            .map(|chunk_indices| {
                let bytes = chunk_elements(&extent, &chunk_shape, &chunk_indices);
                (chunk_indices, bytes)
            })
            .collect();
        let written = write_chunked(
            ChunkIndexType::FixedArray,
            &extent,
            &[Some(5), Some(5)],
            &chunk_shape,
            2,
            &chunks,
            &[],
        );
        let dataset = build(
            &written,
            &extent,
            None,
            2,
            FillValue::undefined(),
            ChunkCacheLruSizeLimit::new(1024),
        );
        let hyperslab = HyperslabBuilder::new(2)
            .with_start(vec![1, 0])
            .with_stride(vec![2, 3])
            .with_count(vec![2, 2])
            .with_block(vec![1, 2])
            .build()
            .unwrap();
        let array = dataset
            .read_ndarray::<u16>(&Selection::from(hyperslab))
            .unwrap();
        assert_eq!(
            array,
            ndarray::array![[5u16, 6, 8, 9], [15, 16, 18, 19]].into_dyn()
        );
    }
}
