//! The version 2 B-tree chunk index.
//!
//! The header (`BTHD`) declares the node size, record size and depth of the tree, and points to the root node.
//! Leaves (`BTLF`) hold sorted records.
//! Internal nodes (`BTIN`) hold `n` sorted records and `n + 1` child pointers, where child `i` holds the records between records `i - 1` and `i`.
//! A child pointer holds the child address, its number of records and, above the lowest internal level, its total number of records.
//! The widths of these counts are derived from the node size, so the header is decoded before any node.
//!
//! Records are keyed by the scaled chunk offset and compared lexicographically.

use std::sync::OnceLock;

use crate::{
    format::{is_undefined_address, FormatContext, FormatError, FormatReader, CHECKSUM_SIZE},
    storage::ReadableStorageTraits,
};

#[cfg(feature = "async")]
use crate::storage::AsyncReadableStorageTraits;

use super::{
    chunk_size_length, get_or_try_init, read_structure, ChunkIndexContext, ChunkLocation,
    DatasetError, NodeCache,
};

const HEADER_STRUCTURE: &str = "version 2 B-tree header";
const LEAF_STRUCTURE: &str = "version 2 B-tree leaf node";
const INTERNAL_STRUCTURE: &str = "version 2 B-tree internal node";

/// The signature of a version 2 B-tree header.
pub const HEADER_SIGNATURE: &[u8; 4] = b"BTHD";
/// The signature of a version 2 B-tree leaf node.
pub const LEAF_SIGNATURE: &[u8; 4] = b"BTLF";
/// The signature of a version 2 B-tree internal node.
pub const INTERNAL_SIGNATURE: &[u8; 4] = b"BTIN";

/// The record type of unfiltered chunks.
pub const UNFILTERED_RECORD_TYPE: u8 = 10;
/// The record type of filtered chunks.
pub const FILTERED_RECORD_TYPE: u8 = 11;

/// The size of the signature, version, type and checksum of a node.
const NODE_METADATA_SIZE: usize = 4 + 1 + 1 + CHECKSUM_SIZE;

/// Return the number of bytes needed to encode values up to `value`.
#[must_use]
pub fn limit_encoded_size(value: u64) -> usize {
    (value.max(1).ilog2() / 8 + 1) as usize
}

/// The record capacity of the nodes at one depth of a version 2 B-tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    /// The maximum number of records in a node.
    pub max_records: u64,
    /// The maximum number of records in a node and all of its descendants.
    pub cumulative_max_records: u64,
    /// The size of the encoded total number of records of a node at this depth.
    pub cumulative_max_records_size: usize,
}

/// A version 2 B-tree header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BTreeV2Header {
    /// The record type.
    pub record_type: u8,
    /// The size of every node in bytes.
    pub node_size: u32,
    /// The size of a record in bytes.
    pub record_size: u16,
    /// The depth of the tree. Leaves are at depth 0.
    pub depth: u16,
    /// The address of the root node.
    pub root_address: u64,
    /// The number of records in the root node.
    pub root_records: u16,
    /// The total number of records in the tree.
    pub total_records: u64,
    node_info: Vec<NodeInfo>,
    max_records_size: usize,
}

impl BTreeV2Header {
    /// Create a new header, computing the node capacities of every depth.
    ///
    /// # Errors
    /// Returns [`FormatError::InvalidValue`] if a node cannot hold a record at some depth.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        format: &FormatContext,
        record_type: u8,
        node_size: u32,
        record_size: u16,
        depth: u16,
        root_address: u64,
        root_records: u16,
        total_records: u64,
    ) -> Result<Self, FormatError> {
        let invalid = |reason: String| {
            FormatError::InvalidValue(format!(
                "{HEADER_STRUCTURE} with node size {node_size} and record size {record_size} {reason}"
            ))
        };
        let node_size_bytes = u64::from(node_size);
        let record_size_bytes = u64::from(record_size);
        if record_size == 0 {
            return Err(invalid("has empty records".to_string()));
        }
        let leaf_records = node_size_bytes.saturating_sub(NODE_METADATA_SIZE as u64) / record_size_bytes;
        if leaf_records == 0 {
            return Err(invalid("cannot hold a record in a leaf".to_string()));
        }
        let max_records_size = limit_encoded_size(leaf_records);
        let mut node_info = vec![NodeInfo {
            max_records: leaf_records,
            cumulative_max_records: leaf_records,
            cumulative_max_records_size: 0,
        }];
        for depth in 1..=usize::from(depth) {
            let previous = node_info[depth - 1];
            let pointer_size = (usize::from(format.offset_size())
                + max_records_size
                + if depth > 1 {
                    previous.cumulative_max_records_size
                } else {
                    0
                }) as u64;
            let max_records = node_size_bytes
                .saturating_sub(NODE_METADATA_SIZE as u64 + pointer_size)
                / (record_size_bytes + pointer_size);
            if max_records == 0 {
                return Err(invalid(format!("cannot hold a record at depth {depth}")));
            }
            let cumulative_max_records = (max_records + 1)
                .saturating_mul(previous.cumulative_max_records)
                .saturating_add(max_records);
            node_info.push(NodeInfo {
                max_records,
                cumulative_max_records,
                cumulative_max_records_size: limit_encoded_size(cumulative_max_records),
            });
        }
        Ok(Self {
            record_type,
            node_size,
            record_size,
            depth,
            root_address,
            root_records,
            total_records,
            node_info,
            max_records_size,
        })
    }

    /// Return the encoded size of a header.
    #[must_use]
    pub fn encoded_size(format: &FormatContext) -> usize {
        4 + 1 + 1 + 4 + 2 + 2 + 1 + 1
            + usize::from(format.offset_size())
            + 2
            + usize::from(format.length_size())
            + CHECKSUM_SIZE
    }

    /// Return the node capacities of every depth, from the leaves to the root.
    #[must_use]
    pub fn node_info(&self) -> &[NodeInfo] {
        &self.node_info
    }

    /// Return the size of the encoded number of records in a child pointer.
    #[must_use]
    pub const fn max_records_size(&self) -> usize {
        self.max_records_size
    }

    /// Return the size of a child pointer of a node at `depth`.
    #[must_use]
    pub fn pointer_size(&self, format: &FormatContext, depth: u16) -> usize {
        usize::from(format.offset_size())
            + self.max_records_size
            + self.total_records_size(depth)
    }

    fn total_records_size(&self, depth: u16) -> usize {
        if depth > 1 {
            self.node_info[usize::from(depth) - 1].cumulative_max_records_size
        } else {
            0
        }
    }

    /// Return the encoded size of a node at `depth` holding `records` records.
    #[must_use]
    pub fn node_encoded_size(&self, format: &FormatContext, depth: u16, records: u16) -> usize {
        let records = usize::from(records);
        let pointers = if depth > 0 {
            (records + 1) * self.pointer_size(format, depth)
        } else {
            0
        };
        NODE_METADATA_SIZE + records * usize::from(self.record_size) + pointers
    }
}

/// Decode a version 2 B-tree header.
///
/// # Errors
/// Returns a [`FormatError`] if the signature, version or checksum is invalid, the header is truncated, or its node geometry is inconsistent.
pub fn decode_header(
    reader: &mut FormatReader,
    format: &FormatContext,
) -> Result<BTreeV2Header, FormatError> {
    reader.read_signature(HEADER_STRUCTURE, HEADER_SIGNATURE)?;
    reader.read_version(HEADER_STRUCTURE, 0)?;
    let record_type = reader.read_u8()?;
    let node_size = reader.read_u32()?;
    let record_size = reader.read_u16()?;
    let depth = reader.read_u16()?;
    // Split and merge percentages
    reader.skip(2)?;
    let root_address = reader.read_offset(format)?;
    let root_records = reader.read_u16()?;
    let total_records = reader.read_length(format)?;
    reader.read_checksum(HEADER_STRUCTURE)?;
    BTreeV2Header::new(
        format,
        record_type,
        node_size,
        record_size,
        depth,
        root_address,
        root_records,
        total_records,
    )
}

/// A chunk record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRecord {
    /// The chunk location.
    pub location: ChunkLocation,
    /// The chunk offset in chunk grid units.
    pub scaled_offset: Vec<u64>,
}

/// A pointer to a child node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChildPointer {
    /// The address of the child.
    pub address: u64,
    /// The number of records in the child.
    pub records: u16,
    /// The number of records in the child and its descendants, if the child is an internal node.
    pub total_records: Option<u64>,
}

/// A version 2 B-tree node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BTreeV2Node {
    /// The records, sorted by scaled offset.
    pub records: Vec<ChunkRecord>,
    /// The child pointers of an internal node, one more than the records. Empty for a leaf.
    pub children: Vec<ChildPointer>,
}

/// The encoding of the chunk records of a version 2 B-tree.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ChunkRecordEncoding {
    format: FormatContext,
    dimensionality: usize,
    chunk_size_bytes: u64,
    size_length: Option<usize>,
}

impl ChunkRecordEncoding {
    pub(crate) fn new(context: &ChunkIndexContext) -> Self {
        let chunk_size_bytes = context.chunk_size_bytes();
        Self {
            format: *context.format(),
            dimensionality: context.dimensionality(),
            chunk_size_bytes,
            size_length: context
                .filtered()
                .then(|| chunk_size_length(chunk_size_bytes)),
        }
    }

    /// Return the record type.
    pub(crate) fn record_type(&self) -> u8 {
        if self.size_length.is_some() {
            FILTERED_RECORD_TYPE
        } else {
            UNFILTERED_RECORD_TYPE
        }
    }

    /// Return the encoded size of a record.
    pub(crate) fn size(&self) -> usize {
        usize::from(self.format.offset_size())
            + self.size_length.map_or(0, |size_length| size_length + 4)
            + 8 * self.dimensionality
    }

    /// Check the record type and size declared by a header.
    pub(crate) fn validate(&self, header: &BTreeV2Header) -> Result<(), FormatError> {
        if header.record_type != self.record_type() {
            return Err(FormatError::InvalidValue(format!(
                "{HEADER_STRUCTURE} has record type {}, expected {}",
                header.record_type,
                self.record_type()
            )));
        }
        if usize::from(header.record_size) != self.size() {
            return Err(FormatError::InvalidValue(format!(
                "{HEADER_STRUCTURE} has records of {} bytes, expected {}",
                header.record_size,
                self.size()
            )));
        }
        Ok(())
    }

    fn decode(&self, reader: &mut FormatReader) -> Result<ChunkRecord, FormatError> {
        let address = reader.read_offset(&self.format)?;
        let location = match self.size_length {
            Some(size_length) => {
                let size = reader.read_uint(size_length)?;
                let filter_mask = reader.read_u32()?;
                ChunkLocation::new(address, size, filter_mask)
            }
            None => ChunkLocation::new(address, self.chunk_size_bytes, 0),
        };
        let scaled_offset = (0..self.dimensionality)
            .map(|_| reader.read_u64())
            .collect::<Result<_, _>>()?;
        Ok(ChunkRecord {
            location,
            scaled_offset,
        })
    }
}

/// Decode a node at `depth` holding `records` records.
///
/// # Errors
/// Returns a [`FormatError`] if the signature, version, record type or checksum is invalid, or the node is truncated.
pub(crate) fn decode_node(
    reader: &mut FormatReader,
    header: &BTreeV2Header,
    encoding: &ChunkRecordEncoding,
    depth: u16,
    records: u16,
) -> Result<BTreeV2Node, FormatError> {
    let (structure, signature) = if depth == 0 {
        (LEAF_STRUCTURE, LEAF_SIGNATURE)
    } else {
        (INTERNAL_STRUCTURE, INTERNAL_SIGNATURE)
    };
    reader.read_signature(structure, signature)?;
    reader.read_version(structure, 0)?;
    let record_type = reader.read_u8()?;
    if record_type != header.record_type {
        return Err(FormatError::InvalidValue(format!(
            "{structure} at address {} has record type {record_type}, expected {}",
            reader.address(),
            header.record_type
        )));
    }
    let records = (0..records)
        .map(|_| encoding.decode(reader))
        .collect::<Result<Vec<_>, _>>()?;
    let children = if depth > 0 {
        let total_records_size = header.total_records_size(depth);
        (0..=records.len())
            .map(|_| {
                let address = reader.read_offset(&encoding.format)?;
                let records = reader.read_uint(header.max_records_size())?;
                let records = u16::try_from(records).map_err(|_| {
                    FormatError::InvalidValue(format!("{structure} child has {records} records"))
                })?;
                let total_records = if total_records_size > 0 {
                    Some(reader.read_uint(total_records_size)?)
                } else {
                    None
                };
                Ok(ChildPointer {
                    address,
                    records,
                    total_records,
                })
            })
            .collect::<Result<Vec<_>, FormatError>>()?
    } else {
        Vec::new()
    };
    reader.read_checksum(structure)?;
    Ok(BTreeV2Node { records, children })
}

/// The outcome of searching one node.
#[derive(Debug, PartialEq, Eq)]
enum SearchStep {
    Absent,
    Found(ChunkLocation),
    Descend(ChildPointer),
}

fn search(node: &BTreeV2Node, target: &[u64]) -> SearchStep {
    match node
        .records
        .binary_search_by(|record| record.scaled_offset.as_slice().cmp(target))
    {
        Ok(record) => SearchStep::Found(node.records[record].location),
        Err(child) => node
            .children
            .get(child)
            .map_or(SearchStep::Absent, |child| SearchStep::Descend(*child)),
    }
}

/// A version 2 B-tree chunk index.
#[derive(Debug)]
pub struct BTreeV2Index {
    context: ChunkIndexContext,
    address: u64,
    encoding: ChunkRecordEncoding,
    header: OnceLock<BTreeV2Header>,
    nodes: NodeCache<u64, BTreeV2Node>,
}

impl BTreeV2Index {
    /// Create a new version 2 B-tree index with its header at `address`.
    #[must_use]
    pub fn new(context: ChunkIndexContext, address: u64) -> Self {
        let encoding = ChunkRecordEncoding::new(&context);
        Self {
            context,
            address,
            encoding,
            header: OnceLock::new(),
            nodes: NodeCache::default(),
        }
    }

    /// Return the dataset geometry of the index.
    #[must_use]
    pub const fn context(&self) -> &ChunkIndexContext {
        &self.context
    }

    fn decode_header(&self, bytes: &[u8]) -> Result<BTreeV2Header, DatasetError> {
        let header = decode_header(&mut FormatReader::new(bytes, self.address), self.context.format())?;
        self.encoding.validate(&header)?;
        log::debug!(
            "{HEADER_STRUCTURE} at address {}: depth {}, {} records",
            self.address,
            header.depth,
            header.total_records
        );
        Ok(header)
    }

    fn decode_node(
        &self,
        header: &BTreeV2Header,
        pointer: &ChildPointer,
        depth: u16,
        bytes: &[u8],
    ) -> Result<BTreeV2Node, DatasetError> {
        Ok(decode_node(
            &mut FormatReader::new(bytes, pointer.address),
            header,
            &self.encoding,
            depth,
            pointer.records,
        )?)
    }

    fn root(header: &BTreeV2Header) -> Option<ChildPointer> {
        (!is_undefined_address(header.root_address) && header.root_records > 0).then_some(
            ChildPointer {
                address: header.root_address,
                records: header.root_records,
                total_records: Some(header.total_records),
            },
        )
    }

    fn found(location: ChunkLocation) -> Option<ChunkLocation> {
        (!is_undefined_address(location.address)).then_some(location)
    }

    /// Locate the chunk at `chunk_indices`, which must be inside the chunk grid.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if the header or a node cannot be read or is malformed.
    pub fn locate(
        &self,
        storage: &dyn ReadableStorageTraits,
        chunk_indices: &[u64],
    ) -> Result<Option<ChunkLocation>, DatasetError> {
        if is_undefined_address(self.address) {
            return Ok(None);
        }
        let format = self.context.format();
        let header = get_or_try_init(&self.header, || {
            let size = BTreeV2Header::encoded_size(format);
            let bytes = read_structure(storage, HEADER_STRUCTURE, self.address, size)?;
            self.decode_header(&bytes)
        })?;
        let Some(mut pointer) = Self::root(header) else {
            return Ok(None);
        };
        let mut depth = header.depth;
        loop {
            let node = self.nodes.get_or_try_insert_with(pointer.address, || {
                let size = header.node_encoded_size(format, depth, pointer.records);
                let structure = if depth == 0 { LEAF_STRUCTURE } else { INTERNAL_STRUCTURE };
                let bytes = read_structure(storage, structure, pointer.address, size)?;
                self.decode_node(header, &pointer, depth, &bytes)
            })?;
            match search(&node, chunk_indices) {
                SearchStep::Absent => return Ok(None),
                SearchStep::Found(location) => return Ok(Self::found(location)),
                SearchStep::Descend(child) => {
                    pointer = child;
                    depth -= 1;
                }
            }
        }
    }

    /// Asynchronously locate the chunk at `chunk_indices`, which must be inside the chunk grid.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if the header or a node cannot be read or is malformed.
    #[cfg(feature = "async")]
    pub async fn async_locate(
        &self,
        storage: &dyn AsyncReadableStorageTraits,
        chunk_indices: &[u64],
    ) -> Result<Option<ChunkLocation>, DatasetError> {
        use super::async_read_structure;

        if is_undefined_address(self.address) {
            return Ok(None);
        }
        let format = self.context.format();
        let header = if let Some(header) = self.header.get() {
            header
        } else {
            let size = BTreeV2Header::encoded_size(format);
            let bytes = async_read_structure(storage, HEADER_STRUCTURE, self.address, size).await?;
            let header = self.decode_header(&bytes)?;
            self.header.get_or_init(|| header)
        };
        let Some(mut pointer) = Self::root(header) else {
            return Ok(None);
        };
        let mut depth = header.depth;
        loop {
            let node = if let Some(node) = self.nodes.get(pointer.address) {
                node
            } else {
                let size = header.node_encoded_size(format, depth, pointer.records);
                let structure = if depth == 0 { LEAF_STRUCTURE } else { INTERNAL_STRUCTURE };
                let bytes = async_read_structure(storage, structure, pointer.address, size).await?;
                let node = self.decode_node(header, &pointer, depth, &bytes)?;
                self.nodes.insert(pointer.address, node)
            };
            match search(&node, chunk_indices) {
                SearchStep::Absent => return Ok(None),
                SearchStep::Found(location) => return Ok(Self::found(location)),
                SearchStep::Descend(child) => {
                    pointer = child;
                    depth -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::{
        dataset::chunk_index::test_util::{write_btree_v2, FileImage},
        format::UNDEFINED_ADDRESS,
        storage::MemoryStore,
    };

    use super::*;

    fn context(filtered: bool) -> ChunkIndexContext {
        ChunkIndexContext::new(
            FormatContext::default(),
            vec![32, 40],
            vec![None, None],
            vec![2, 4],
            8,
            filtered,
        )
        .unwrap()
    }

    fn chunks(context: &ChunkIndexContext) -> BTreeMap<Vec<u64>, ChunkLocation> {
        let grid_shape = context.grid_shape();
        let mut chunks = BTreeMap::new();
        let mut address = 50_000;
        for i in 0..grid_shape[0] {
            for j in 0..grid_shape[1] {
                if (i * 7 + j) % 4 == 3 {
                    continue;
                }
                let location = if context.filtered() {
                    ChunkLocation::new(address, 20 + i + j, u32::from(i % 3 == 0))
                } else {
                    ChunkLocation::new(address, context.chunk_size_bytes(), 0)
                };
                chunks.insert(vec![i, j], location);
                address += 100;
            }
        }
        chunks
    }

    #[test]
    fn btree_v2_limit_encoded_size() {
        assert_eq!(limit_encoded_size(0), 1);
        assert_eq!(limit_encoded_size(255), 1);
        assert_eq!(limit_encoded_size(256), 2);
        assert_eq!(limit_encoded_size(65_535), 2);
        assert_eq!(limit_encoded_size(65_536), 3);
    }

    #[test]
    fn btree_v2_node_info() {
        let format = FormatContext::default();
        // Records of 8 + 16 bytes in 512 byte nodes
        let header = BTreeV2Header::new(&format, 10, 512, 24, 2, 0, 1, 1).unwrap();
        let info = header.node_info();
        assert_eq!(info.len(), 3);
        // (512 - 10) / 24
        assert_eq!(info[0].max_records, 20);
        assert_eq!(header.max_records_size(), 1);
        // Pointers of 8 + 1 bytes: (512 - 19) / 33
        assert_eq!(info[1].max_records, 14);
        assert_eq!(info[1].cumulative_max_records, 15 * 20 + 14);
        assert_eq!(info[1].cumulative_max_records_size, 2);
        // Pointers of 8 + 1 + 2 bytes: (512 - 21) / 35
        assert_eq!(info[2].max_records, 14);
        assert_eq!(header.pointer_size(&format, 1), 9);
        assert_eq!(header.pointer_size(&format, 2), 11);
        assert_eq!(header.node_encoded_size(&format, 0, 3), 10 + 72);
        assert_eq!(header.node_encoded_size(&format, 2, 3), 10 + 72 + 4 * 11);

        assert!(BTreeV2Header::new(&format, 10, 20, 24, 0, 0, 0, 0).is_err());
    }

    #[test]
    fn btree_v2_locate() {
        for filtered in [false, true] {
            let context = context(filtered);
            let chunks = chunks(&context);
            for (node_size, depth) in [(4096, 0), (512, 1), (180, 2)] {
                let mut image = FileImage::new(8);
                let address = write_btree_v2(&mut image, &context, &chunks, node_size);
                let store = MemoryStore::new_with_bytes(image.finish());
                let index = BTreeV2Index::new(context.clone(), address);
                let grid_shape = context.grid_shape();
                for i in 0..grid_shape[0] {
                    for j in 0..grid_shape[1] {
                        assert_eq!(
                            index.locate(&store, &[i, j]).unwrap(),
                            chunks.get(&vec![i, j]).copied(),
                            "chunk {i}, {j} with node size {node_size}"
                        );
                    }
                }
                assert_eq!(index.header.get().unwrap().depth, depth, "node size {node_size}");
            }
        }
    }

    #[test]
    fn btree_v2_empty() {
        let context = context(false);
        let mut image = FileImage::new(8);
        let address = write_btree_v2(&mut image, &context, &BTreeMap::new(), 512);
        let store = MemoryStore::new_with_bytes(image.finish());
        let index = BTreeV2Index::new(context.clone(), address);
        assert_eq!(index.locate(&store, &[0, 0]).unwrap(), None);
        let index = BTreeV2Index::new(context, UNDEFINED_ADDRESS);
        assert_eq!(index.locate(&store, &[0, 0]).unwrap(), None);
    }

    #[test]
    fn btree_v2_malformed() {
        let context = context(false);
        let chunks = chunks(&context);
        let mut image = FileImage::new(8);
        let address = write_btree_v2(&mut image, &context, &chunks, 512);
        let mut bytes = image.finish();

        // A filtered dataset expects filtered records
        let store = MemoryStore::new_with_bytes(bytes.clone());
        let index = BTreeV2Index::new(self::context(true), address);
        assert!(matches!(
            index.locate(&store, &[0, 0]),
            Err(DatasetError::InvalidFormat(_))
        ));

        // Corrupt the depth
        let depth = usize::try_from(address).unwrap() + 12;
        bytes[depth] ^= 0xff;
        let store = MemoryStore::new_with_bytes(bytes);
        let index = BTreeV2Index::new(context, address);
        assert!(matches!(
            index.locate(&store, &[0, 0]),
            Err(DatasetError::InvalidFormat(FormatError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn btree_v2_search() {
        let record = |offset: u64| ChunkRecord {
            location: ChunkLocation::new(offset * 100, 10, 0),
            scaled_offset: vec![offset, 1],
        };
        let child = |address: u64| ChildPointer {
            address,
            records: 1,
            total_records: None,
        };
        let leaf = BTreeV2Node {
            records: vec![record(1), record(3)],
            children: vec![],
        };
        assert_eq!(
            search(&leaf, &[3, 1]),
            SearchStep::Found(ChunkLocation::new(300, 10, 0))
        );
        assert_eq!(search(&leaf, &[2, 1]), SearchStep::Absent);
        let internal = BTreeV2Node {
            children: vec![child(10), child(20), child(30)],
            ..leaf
        };
        assert_eq!(search(&internal, &[0, 5]), SearchStep::Descend(child(10)));
        assert_eq!(search(&internal, &[2, 0]), SearchStep::Descend(child(20)));
        assert_eq!(search(&internal, &[3, 2]), SearchStep::Descend(child(30)));
        assert_eq!(
            search(&internal, &[1, 1]),
            SearchStep::Found(ChunkLocation::new(100, 10, 0))
        );
    }
}
