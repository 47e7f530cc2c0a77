//! The version 1 B-tree chunk index.
//!
//! Every node (`TREE`) holds `n` children separated by `n + 1` keys.
//! A key holds the stored size and filter mask of a chunk and its offset in elements, with an extra trailing dimension for the element itself.
//! Child `i` of a node covers the chunks with offsets from key `i` (inclusive) to key `i + 1` (exclusive).
//! Leaves are at level 0, where child `i` is the address of the chunk at key `i`.
//!
//! Nodes are not checksummed, and their size depends on the number of entries in use, so a node is fetched in two steps.

use crate::{
    format::{is_undefined_address, FormatContext, FormatError, FormatReader},
    storage::ReadableStorageTraits,
};

#[cfg(feature = "async")]
use crate::storage::AsyncReadableStorageTraits;

use super::{read_structure, ChunkIndexContext, ChunkLocation, DatasetError, NodeCache};

const NODE_STRUCTURE: &str = "version 1 B-tree node";

/// The signature of a version 1 B-tree node.
pub const NODE_SIGNATURE: &[u8; 4] = b"TREE";

/// The node type of a B-tree indexing raw data chunks.
pub const CHUNK_NODE_TYPE: u8 = 1;

/// The key of a version 1 B-tree chunk node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BTreeV1Key {
    /// The stored size of the chunk in bytes.
    pub chunk_size: u32,
    /// The filter mask of the chunk.
    pub filter_mask: u32,
    /// The chunk offset in chunk grid units, with the trailing element dimension unscaled.
    pub scaled_offset: Vec<u64>,
}

/// A version 1 B-tree chunk node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BTreeV1Node {
    /// The level of the node. Leaves are at level 0.
    pub level: u8,
    /// The address of the left sibling.
    pub left_sibling: u64,
    /// The address of the right sibling.
    pub right_sibling: u64,
    /// The keys, one more than the children.
    pub keys: Vec<BTreeV1Key>,
    /// The child addresses: nodes for internal nodes, chunks for leaves.
    pub children: Vec<u64>,
}

/// Return the size of the part of a node preceding its keys.
#[must_use]
pub fn node_prefix_size(format: &FormatContext) -> usize {
    4 + 1 + 1 + 2 + 2 * usize::from(format.offset_size())
}

/// Return the size of a key of a dataset with `dimensionality` dimensions.
#[must_use]
pub const fn key_size(dimensionality: usize) -> usize {
    4 + 4 + 8 * (dimensionality + 1)
}

/// Return the size of a node with `entries` children.
#[must_use]
pub fn node_size(format: &FormatContext, dimensionality: usize, entries: usize) -> usize {
    node_prefix_size(format)
        + entries * (key_size(dimensionality) + usize::from(format.offset_size()))
        + key_size(dimensionality)
}

/// Decode the number of children of a node from its prefix.
///
/// # Errors
/// Returns a [`FormatError`] if the signature or node type is invalid, or the prefix is truncated.
pub fn decode_node_entries(reader: &mut FormatReader) -> Result<usize, FormatError> {
    reader.read_signature(NODE_STRUCTURE, NODE_SIGNATURE)?;
    let node_type = reader.read_u8()?;
    if node_type != CHUNK_NODE_TYPE {
        return Err(FormatError::InvalidValue(format!(
            "{NODE_STRUCTURE} at address {} has node type {node_type}, expected {CHUNK_NODE_TYPE}",
            reader.address()
        )));
    }
    reader.read_u8()?;
    Ok(usize::from(reader.read_u16()?))
}

fn decode_key(reader: &mut FormatReader, chunk_shape: &[u64]) -> Result<BTreeV1Key, FormatError> {
    let chunk_size = reader.read_u32()?;
    let filter_mask = reader.read_u32()?;
    let mut scaled_offset = Vec::with_capacity(chunk_shape.len() + 1);
    for chunk in chunk_shape {
        let offset = reader.read_u64()?;
        if offset % chunk != 0 {
            return Err(FormatError::InvalidValue(format!(
                "{NODE_STRUCTURE} at address {} has key offset {offset} that is not a multiple of the chunk size {chunk}",
                reader.address()
            )));
        }
        scaled_offset.push(offset / chunk);
    }
    scaled_offset.push(reader.read_u64()?);
    Ok(BTreeV1Key {
        chunk_size,
        filter_mask,
        scaled_offset,
    })
}

/// Decode a node of a dataset with chunk shape `chunk_shape`.
///
/// # Errors
/// Returns a [`FormatError`] if the signature or node type is invalid, a key is not chunk aligned, or the node is truncated.
pub fn decode_node(
    reader: &mut FormatReader,
    format: &FormatContext,
    chunk_shape: &[u64],
) -> Result<BTreeV1Node, FormatError> {
    reader.read_signature(NODE_STRUCTURE, NODE_SIGNATURE)?;
    let node_type = reader.read_u8()?;
    if node_type != CHUNK_NODE_TYPE {
        return Err(FormatError::InvalidValue(format!(
            "{NODE_STRUCTURE} at address {} has node type {node_type}, expected {CHUNK_NODE_TYPE}",
            reader.address()
        )));
    }
    let level = reader.read_u8()?;
    let entries = usize::from(reader.read_u16()?);
    let left_sibling = reader.read_offset(format)?;
    let right_sibling = reader.read_offset(format)?;
    let mut keys = Vec::with_capacity(entries + 1);
    let mut children = Vec::with_capacity(entries);
    for _ in 0..entries {
        keys.push(decode_key(reader, chunk_shape)?);
        children.push(reader.read_offset(format)?);
    }
    keys.push(decode_key(reader, chunk_shape)?);
    Ok(BTreeV1Node {
        level,
        left_sibling,
        right_sibling,
        keys,
        children,
    })
}

/// The outcome of searching one node.
#[derive(Debug, PartialEq, Eq)]
enum SearchStep {
    Absent,
    Found(ChunkLocation),
    Descend(u64),
}

/// Search `node` for the chunk with scaled offset `target`, extended with the element dimension.
fn search(node: &BTreeV1Node, target: &[u64]) -> SearchStep {
    let (mut low, mut high) = (0, node.children.len());
    let child = loop {
        if low >= high {
            return SearchStep::Absent;
        }
        let mid = (low + high) / 2;
        if target < node.keys[mid].scaled_offset.as_slice() {
            high = mid;
        } else if target >= node.keys[mid + 1].scaled_offset.as_slice() {
            low = mid + 1;
        } else {
            break mid;
        }
    };
    if node.level > 0 {
        SearchStep::Descend(node.children[child])
    } else if target == node.keys[child].scaled_offset.as_slice() {
        let key = &node.keys[child];
        SearchStep::Found(ChunkLocation::new(
            node.children[child],
            u64::from(key.chunk_size),
            key.filter_mask,
        ))
    } else {
        SearchStep::Absent
    }
}

/// A version 1 B-tree chunk index.
#[derive(Debug)]
pub struct BTreeV1Index {
    context: ChunkIndexContext,
    address: u64,
    nodes: NodeCache<u64, BTreeV1Node>,
}

impl BTreeV1Index {
    /// Create a new version 1 B-tree index with its root node at `address`.
    #[must_use]
    pub fn new(context: ChunkIndexContext, address: u64) -> Self {
        Self {
            context,
            address,
            nodes: NodeCache::default(),
        }
    }

    /// Return the dataset geometry of the index.
    #[must_use]
    pub const fn context(&self) -> &ChunkIndexContext {
        &self.context
    }

    fn decode_entries(address: u64, bytes: &[u8]) -> Result<usize, DatasetError> {
        Ok(decode_node_entries(&mut FormatReader::new(bytes, address))?)
    }

    fn decode_node(
        &self,
        address: u64,
        expected_level: Option<u8>,
        bytes: &[u8],
    ) -> Result<BTreeV1Node, DatasetError> {
        let node = decode_node(
            &mut FormatReader::new(bytes, address),
            self.context.format(),
            self.context.chunk_shape(),
        )?;
        Self::check_level(address, &node, expected_level)?;
        log::trace!(
            "{NODE_STRUCTURE} at address {address}: level {}, {} entries",
            node.level,
            node.children.len()
        );
        Ok(node)
    }

    fn check_level(
        address: u64,
        node: &BTreeV1Node,
        expected_level: Option<u8>,
    ) -> Result<(), FormatError> {
        match expected_level {
            Some(level) if level != node.level => Err(FormatError::InvalidValue(format!(
                "{NODE_STRUCTURE} at address {address} has level {}, expected {level}",
                node.level
            ))),
            _ => Ok(()),
        }
    }

    fn target(chunk_indices: &[u64]) -> Vec<u64> {
        let mut target = Vec::with_capacity(chunk_indices.len() + 1);
        target.extend_from_slice(chunk_indices);
        target.push(0);
        target
    }

    fn child_level(node: &BTreeV1Node) -> Option<u8> {
        node.level.checked_sub(1)
    }

    /// Locate the chunk at `chunk_indices`, which must be inside the chunk grid.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if a node cannot be read or is malformed.
    pub fn locate(
        &self,
        storage: &dyn ReadableStorageTraits,
        chunk_indices: &[u64],
    ) -> Result<Option<ChunkLocation>, DatasetError> {
        let format = self.context.format();
        let dimensionality = self.context.dimensionality();
        let target = Self::target(chunk_indices);
        let mut address = self.address;
        let mut expected_level = None;
        loop {
            if is_undefined_address(address) {
                return Ok(None);
            }
            let node = match self.nodes.get(address) {
                Some(node) => {
                    Self::check_level(address, &node, expected_level)?;
                    node
                }
                None => {
                    let prefix = read_structure(storage, NODE_STRUCTURE, address, node_prefix_size(format))?;
                    let entries = Self::decode_entries(address, &prefix)?;
                    let size = node_size(format, dimensionality, entries);
                    let bytes = read_structure(storage, NODE_STRUCTURE, address, size)?;
                    self.nodes
                        .insert(address, self.decode_node(address, expected_level, &bytes)?)
                }
            };
            match search(&node, &target) {
                SearchStep::Absent => return Ok(None),
                SearchStep::Found(location) => return Ok(Some(location)),
                SearchStep::Descend(child) => {
                    address = child;
                    expected_level = Self::child_level(&node);
                }
            }
        }
    }

    /// Asynchronously locate the chunk at `chunk_indices`, which must be inside the chunk grid.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if a node cannot be read or is malformed.
    #[cfg(feature = "async")]
    pub async fn async_locate(
        &self,
        storage: &dyn AsyncReadableStorageTraits,
        chunk_indices: &[u64],
    ) -> Result<Option<ChunkLocation>, DatasetError> {
        use super::async_read_structure;

        let format = self.context.format();
        let dimensionality = self.context.dimensionality();
        let target = Self::target(chunk_indices);
        let mut address = self.address;
        let mut expected_level = None;
        loop {
            if is_undefined_address(address) {
                return Ok(None);
            }
            let node = match self.nodes.get(address) {
                Some(node) => {
                    Self::check_level(address, &node, expected_level)?;
                    node
                }
                None => {
                    let prefix =
                        async_read_structure(storage, NODE_STRUCTURE, address, node_prefix_size(format))
                            .await?;
                    let entries = Self::decode_entries(address, &prefix)?;
                    let size = node_size(format, dimensionality, entries);
                    let bytes = async_read_structure(storage, NODE_STRUCTURE, address, size).await?;
                    self.nodes
                        .insert(address, self.decode_node(address, expected_level, &bytes)?)
                }
            };
            match search(&node, &target) {
                SearchStep::Absent => return Ok(None),
                SearchStep::Found(location) => return Ok(Some(location)),
                SearchStep::Descend(child) => {
                    address = child;
                    expected_level = Self::child_level(&node);
                }
            }
        }
    }
}
