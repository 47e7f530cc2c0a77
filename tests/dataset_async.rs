#![cfg(feature = "async")]

mod common;

use std::sync::Arc;

use h5chunk::dataset::chunk_cache::ChunkCache;
use h5chunk::dataset::chunk_index::{ChunkIndexDescriptor, ChunkIndexType};
use h5chunk::dataset::{DatasetBuilder, DatasetError, DatasetLayout, FillValue};
use h5chunk::selection::{PointSelection, RegularHyperslab, Selection};
use h5chunk::storage::storage_adapter::PerformanceMetricsStorageAdapter;
use h5chunk::storage::MemoryStore;

use common::{write_btree_v1_leaf, write_chunks, File};

fn btree_v1_dataset_bytes() -> (Vec<u8>, DatasetLayout) {
    // A 5x4 u8 dataset in 2x2 chunks, chunk (1, 1) absent
    let mut file = File::new();
    let chunks: Vec<(Vec<u64>, Vec<u8>)> = (0..3u8)
        .flat_map(|i| (0..2u8).map(move |j| (i, j)))
        .filter(|chunk| *chunk != (1, 1))
        .map(|(i, j)| {
            let bytes = (0..4u8)
                .map(|k| {
                    let (row, col) = (i * 2 + k / 2, j * 2 + k % 2);
                    if row < 5 {
                        row * 4 + col
                    } else {
                        0
                    }
                })
                .collect();
            (vec![u64::from(i), u64::from(j)], bytes)
        })
        .collect();
    let chunks = write_chunks(&mut file, &[], chunks);
    let address = write_btree_v1_leaf(&mut file, &[2, 2], &[3, 2], &chunks);
    let layout = DatasetLayout::Chunked {
        chunk_shape: vec![2, 2],
        index: ChunkIndexDescriptor::new(ChunkIndexType::BTreeV1, address),
        filters: vec![],
    };
    (file.into_bytes(), layout)
}

#[tokio::test]
async fn dataset_async_read() -> Result<(), Box<dyn std::error::Error>> {
    let (bytes, layout) = btree_v1_dataset_bytes();
    let store = Arc::new(PerformanceMetricsStorageAdapter::new(Arc::new(
        MemoryStore::new_with_bytes(bytes),
    )));
    let dataset = DatasetBuilder::new(vec![5, 4], 1, layout)
        .fill_value(FillValue::from(99u8))
        .build(store.clone())?;

    #[rustfmt::skip]
    let expected = vec![
        0, 1, 2, 3,
        4, 5, 6, 7,
        8, 9, 99, 99,
        12, 13, 99, 99,
        16, 17, 18, 19,
    ];
    assert_eq!(dataset.async_read_selection(&Selection::All).await?, expected);
    assert_eq!(dataset.cache().len(), 5);

    let reads = store.reads();
    let selection = Selection::from(RegularHyperslab::new_with_start_shape(
        vec![1, 1],
        vec![3, 2],
    )?);
    assert_eq!(
        dataset.async_read_elements::<u8>(&selection).await?,
        vec![5, 6, 9, 99, 13, 99]
    );
    assert_eq!(store.reads(), reads);

    let overflowing = Selection::from(RegularHyperslab::new(
        vec![0, 0],
        vec![2, 1],
        vec![u64::MAX / 2, 1],
        vec![2, 1],
    )?);
    assert!(matches!(
        dataset.async_read_selection(&overflowing).await,
        Err(DatasetError::OutOfBounds(_))
    ));
    assert_eq!(store.reads(), reads);

    // Points into a memory hyperslab
    let points = Selection::from(PointSelection::new(vec![vec![4, 3], vec![0, 1]])?);
    let mut destination = vec![0u8; 4];
    dataset
        .async_read(
            &mut destination,
            &points,
            &Selection::from(RegularHyperslab::new_1d(1, 2)),
            &[4],
        )
        .await?;
    assert_eq!(destination, vec![0, 19, 1, 0]);
    Ok(())
}

#[tokio::test]
async fn dataset_async_retrieve_chunks() -> Result<(), Box<dyn std::error::Error>> {
    let (bytes, layout) = btree_v1_dataset_bytes();
    let dataset = DatasetBuilder::new(vec![5, 4], 1, layout)
        .build(Arc::new(MemoryStore::new_with_bytes(bytes)))?;
    let chunks = dataset
        .async_retrieve_chunks(&[vec![2, 1], vec![1, 1], vec![0, 0]])
        .await?;
    assert_eq!(chunks[0].as_ref(), &[18, 19, 0, 0]);
    assert_eq!(chunks[1].as_ref(), &[0, 0, 0, 0]);
    assert_eq!(chunks[2].as_ref(), &[0, 1, 4, 5]);
    assert!(dataset.async_retrieve_chunk_if_exists(&[1, 1]).await?.is_none());
    assert!(matches!(
        dataset.async_retrieve_chunk(&[3, 0]).await,
        Err(DatasetError::InvalidChunkGridIndices(..))
    ));
    assert!(matches!(
        dataset.async_read_elements::<u16>(&Selection::All).await,
        Err(DatasetError::IncompatibleElementSize { .. })
    ));
    Ok(())
}
