use futures::{future::try_join_all, StreamExt, TryStreamExt};

use crate::{
    config::global_config,
    selection::{ChunkSteps, Selection},
    storage::{AsyncReadableStorageTraits, Bytes},
};

use super::{
    chunk_cache::ChunkCache, copy_elements, decode_chunk, ravel_indices, ChunkedDataset,
    DatasetData, DatasetError, ReadPlan,
};

impl<TStorage: ?Sized + AsyncReadableStorageTraits + 'static, CC: ChunkCache>
    ChunkedDataset<TStorage, CC>
{
    /// Async variant of [`read`](ChunkedDataset::read).
    ///
    /// Chunks are located, read and decoded in the same order and with the same semantics as a synchronous read.
    /// The read can be abandoned between chunks by dropping the future.
    #[allow(clippy::missing_errors_doc)]
    pub async fn async_read(
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
                        Some(self.storage.read_zero_padded(offset, length).await?)
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
                        let chunk = self.async_retrieve_chunk_if_exists(chunk_indices).await?;
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

    /// Async variant of [`read_selection`](ChunkedDataset::read_selection).
    #[allow(clippy::missing_errors_doc)]
    pub async fn async_read_selection(
        &self,
        file_selection: &Selection,
    ) -> Result<Vec<u8>, DatasetError> {
        let (mut bytes, num_elements) = self.allocate_selection(file_selection)?;
        self.async_read(&mut bytes, file_selection, &Selection::All, &[num_elements])
            .await?;
        Ok(bytes)
    }

    /// Async variant of [`read_elements`](ChunkedDataset::read_elements).
    #[allow(clippy::missing_errors_doc)]
    pub async fn async_read_elements<T: bytemuck::Pod>(
        &self,
        file_selection: &Selection,
    ) -> Result<Vec<T>, DatasetError> {
        if std::mem::size_of::<T>() != self.element_size {
            return Err(DatasetError::IncompatibleElementSize {
                expected: self.element_size,
                got: std::mem::size_of::<T>(),
            });
        }
        let bytes = self.async_read_selection(file_selection).await?;
        Ok(bytemuck::allocation::try_cast_vec(bytes)
            .unwrap_or_else(|(_err, bytes)| bytemuck::allocation::pod_collect_to_vec(&bytes)))
    }

    /// Async variant of [`retrieve_chunk_if_exists`](ChunkedDataset::retrieve_chunk_if_exists).
    ///
    /// A chunk that is loaded by concurrent reads of the same dataset may be decoded more than once, but it is cached once.
    #[allow(clippy::missing_errors_doc)]
    pub async fn async_retrieve_chunk_if_exists(
        &self,
        chunk_indices: &[u64],
    ) -> Result<Option<Bytes>, DatasetError> {
        let (index, filters) = self.chunked()?;
        if let Some(chunk) = self.cache.get(chunk_indices) {
            log::trace!("chunk cache hit for chunk {chunk_indices:?}");
            return Ok(Some(chunk));
        }
        let Some(location) = index.async_locate(&self.storage, chunk_indices).await? else {
            return Ok(None);
        };
        log::trace!("chunk cache miss for chunk {chunk_indices:?}");
        let encoded = self
            .storage
            .read_zero_padded(location.address, location.size)
            .await?;
        let chunk = decode_chunk(index.context(), filters, chunk_indices, &location, encoded)?;
        self.cache.insert(chunk_indices.to_vec(), chunk.clone());
        Ok(Some(chunk))
    }

    /// Async variant of [`retrieve_chunk`](ChunkedDataset::retrieve_chunk).
    #[allow(clippy::missing_errors_doc)]
    pub async fn async_retrieve_chunk(&self, chunk_indices: &[u64]) -> Result<Bytes, DatasetError> {
        match self.async_retrieve_chunk_if_exists(chunk_indices).await? {
            Some(chunk) => Ok(chunk),
            None => self.fill_chunk(self.chunked()?.0.context()),
        }
    }

    /// Async variant of [`retrieve_chunks`](ChunkedDataset::retrieve_chunks).
    ///
    /// Up to the [chunk concurrent minimum](crate::config::Config#default-chunk-concurrency-minimum) chunks are retrieved at a time.
    #[allow(clippy::missing_errors_doc)]
    pub async fn async_retrieve_chunks(
        &self,
        chunks: &[Vec<u64>],
    ) -> Result<Vec<Bytes>, DatasetError> {
        let chunk_concurrent_limit = global_config().chunk_concurrent_minimum().max(1);
        if chunks.len() <= chunk_concurrent_limit {
            return try_join_all(
                chunks
                    .iter()
                    .map(|chunk_indices| self.async_retrieve_chunk(chunk_indices)),
            )
            .await;
        }
        futures::stream::iter(chunks)
            .map(|chunk_indices| self.async_retrieve_chunk(chunk_indices))
            .buffered(chunk_concurrent_limit)
            .try_collect()
            .await
    }
}
