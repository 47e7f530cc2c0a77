#![allow(dead_code)]

use h5chunk::dataset::filter::{FilterDescription, FilterPipeline};

/// An in-memory file with 8 byte addresses and lengths.
#[derive(Debug, Default)]
pub struct File {
    bytes: Vec<u8>,
}

impl File {
    pub fn new() -> Self {
        // A superblock sized gap so no structure is at address zero
        Self { bytes: vec![0; 96] }
    }

    pub fn append(&mut self, bytes: &[u8]) -> u64 {
        let address = self.bytes.len() as u64;
        self.bytes.extend_from_slice(bytes);
        address
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// A chunk written to a [`File`].
#[derive(Clone, Debug)]
pub struct WrittenChunk {
    pub chunk_indices: Vec<u64>,
    pub address: u64,
    pub size: u64,
}

/// Encode each chunk with `filters` and append it to `file`.
pub fn write_chunks(
    file: &mut File,
    filters: &[FilterDescription],
    chunks: Vec<(Vec<u64>, Vec<u8>)>,
) -> Vec<WrittenChunk> {
    let pipeline = FilterPipeline::new(filters.to_vec()).unwrap();
    chunks
        .into_iter()
        .map(|(chunk_indices, bytes)| {
            let encoded = pipeline.encode(bytes).unwrap();
            WrittenChunk {
                chunk_indices,
                address: file.append(&encoded),
                size: encoded.len() as u64,
            }
        })
        .collect()
}

fn btree_v1_key(bytes: &mut Vec<u8>, size: u32, chunk_offset: &[u64]) {
    bytes.extend_from_slice(&size.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    for offset in chunk_offset {
        bytes.extend_from_slice(&offset.to_le_bytes());
    }
    bytes.extend_from_slice(&0u64.to_le_bytes());
}

/// Append a single leaf version 1 B-tree node indexing `chunks` and return its address.
pub fn write_btree_v1_leaf(
    file: &mut File,
    chunk_shape: &[u64],
    grid_shape: &[u64],
    chunks: &[WrittenChunk],
) -> u64 {
    let mut chunks = chunks.to_vec();
    chunks.sort_by(|a, b| a.chunk_indices.cmp(&b.chunk_indices));
    let mut bytes = b"TREE".to_vec();
    bytes.push(1); // chunk node
    bytes.push(0); // leaf
    bytes.extend_from_slice(&u16::try_from(chunks.len()).unwrap().to_le_bytes());
    bytes.extend_from_slice(&u64::MAX.to_le_bytes());
    bytes.extend_from_slice(&u64::MAX.to_le_bytes());
    for chunk in &chunks {
        let chunk_offset: Vec<u64> = std::iter::zip(&chunk.chunk_indices, chunk_shape)
            .map(|(index, chunk)| index * chunk)
            .collect();
        btree_v1_key(&mut bytes, u32::try_from(chunk.size).unwrap(), &chunk_offset);
        bytes.extend_from_slice(&chunk.address.to_le_bytes());
    }
    let mut end = vec![0; chunk_shape.len()];
    end[0] = grid_shape[0] * chunk_shape[0];
    btree_v1_key(&mut bytes, 0, &end);
    file.append(&bytes)
}
