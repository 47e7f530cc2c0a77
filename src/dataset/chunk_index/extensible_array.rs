//! The extensible array chunk index.
//!
//! An extensible array grows along the single unlimited dimension of a dataset.
//! Its header (`EAHD`) points to an index block (`EAIB`), which holds the first entries directly, followed by the addresses of
//! the data blocks (`EADB`) of the first super blocks and then the addresses of secondary blocks (`EASB`).
//! Super block `s` owns `2^(s/2)` data blocks of `2^((s+1)/2)` times the minimum data block size, so the capacity of the array
//! doubles every two super blocks. A data block larger than a page is paged, with the bitmap of initialised pages held by its secondary block.
//!
//! If the unlimited dimension is not the slowest varying, chunk coordinates are rotated so that it is before linearisation.

use std::sync::OnceLock;

use crate::{
    format::{is_undefined_address, FormatContext, FormatError, FormatReader, CHECKSUM_SIZE},
    storage::ReadableStorageTraits,
};

#[cfg(feature = "async")]
use crate::storage::AsyncReadableStorageTraits;

use super::{
    down_products, fixed_array::bitmap_bit, get_or_try_init, linear_index, read_structure,
    ChunkEntryEncoding, ChunkIndexContext, ChunkLocation, DatasetError, NodeCache,
};

const HEADER_STRUCTURE: &str = "extensible array header";
const INDEX_BLOCK_STRUCTURE: &str = "extensible array index block";
const SECONDARY_BLOCK_STRUCTURE: &str = "extensible array secondary block";
const DATA_BLOCK_STRUCTURE: &str = "extensible array data block";
const PAGE_STRUCTURE: &str = "extensible array data block page";

/// The signature of an extensible array header.
pub const HEADER_SIGNATURE: &[u8; 4] = b"EAHD";
/// The signature of an extensible array index block.
pub const INDEX_BLOCK_SIGNATURE: &[u8; 4] = b"EAIB";
/// The signature of an extensible array secondary block.
pub const SECONDARY_BLOCK_SIGNATURE: &[u8; 4] = b"EASB";
/// The signature of an extensible array data block.
pub const DATA_BLOCK_SIGNATURE: &[u8; 4] = b"EADB";

/// The size of the signature, version and client id prefix of extensible array structures.
const PREFIX_SIZE: usize = 4 + 1 + 1;

/// The geometry of one super block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SuperBlockInfo {
    /// The number of data blocks.
    pub num_data_blocks: u64,
    /// The number of entries in each data block.
    pub data_block_entries: u64,
    /// The index of the first entry, relative to the first entry after the index block.
    pub start_entry: u64,
    /// The index of the first data block.
    pub start_data_block: u64,
}

/// The creation parameters of an extensible array.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExtensibleArrayParameters {
    /// The number of bits needed to store the maximum number of entries.
    pub max_entries_bits: u8,
    /// The number of entries stored in the index block.
    pub index_block_entries: u8,
    /// The minimum number of entries in a data block. A power of two.
    pub data_block_min_entries: u8,
    /// The minimum number of data block addresses in a secondary block. A power of two.
    pub secondary_block_min_data_blocks: u8,
    /// The log2 of the number of entries in a data block page.
    pub page_bits: u8,
}

/// An extensible array header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensibleArrayHeader {
    /// The client id: 0 for unfiltered chunks, 1 for filtered chunks.
    pub client_id: u8,
    /// The size of an entry in bytes.
    pub entry_size: u8,
    /// The creation parameters.
    pub parameters: ExtensibleArrayParameters,
    /// The number of entries realised.
    pub num_entries: u64,
    /// One more than the largest entry index set.
    pub max_index_set: u64,
    /// The address of the index block.
    pub index_block_address: u64,
    super_blocks: Vec<SuperBlockInfo>,
}

impl ExtensibleArrayHeader {
    /// Create a new header, computing the super block geometry.
    ///
    /// # Errors
    /// Returns [`FormatError::InvalidValue`] if the parameters are inconsistent.
    pub fn new(
        client_id: u8,
        entry_size: u8,
        parameters: ExtensibleArrayParameters,
        num_entries: u64,
        max_index_set: u64,
        index_block_address: u64,
    ) -> Result<Self, FormatError> {
        let invalid = |reason: &str| {
            FormatError::InvalidValue(format!("{HEADER_STRUCTURE} {reason}: {parameters:?}"))
        };
        if !parameters.data_block_min_entries.is_power_of_two()
            || !parameters.secondary_block_min_data_blocks.is_power_of_two()
        {
            return Err(invalid("minimum block sizes must be powers of two"));
        }
        if parameters.max_entries_bits > 64 || parameters.page_bits >= 64 {
            return Err(invalid("bit counts are out of range"));
        }
        let min_bits = u8::try_from(parameters.data_block_min_entries.ilog2()).unwrap_or(u8::MAX);
        if min_bits > parameters.max_entries_bits {
            return Err(invalid("minimum data block size exceeds the maximum number of entries"));
        }
        let num_super_blocks = 1 + u64::from(parameters.max_entries_bits - min_bits);
        let min_entries = u64::from(parameters.data_block_min_entries);
        let mut super_blocks = Vec::new();
        let (mut start_entry, mut start_data_block) = (0u64, 0u64);
        for s in 0..num_super_blocks {
            let num_data_blocks = 1u64 << (s / 2);
            let data_block_entries = (1u64 << ((s + 1) / 2)).saturating_mul(min_entries);
            super_blocks.push(SuperBlockInfo {
                num_data_blocks,
                data_block_entries,
                start_entry,
                start_data_block,
            });
            start_entry =
                start_entry.saturating_add(num_data_blocks.saturating_mul(data_block_entries));
            start_data_block = start_data_block.saturating_add(num_data_blocks);
        }
        Ok(Self {
            client_id,
            entry_size,
            parameters,
            num_entries,
            max_index_set,
            index_block_address,
            super_blocks,
        })
    }

    /// Return the encoded size of a header.
    #[must_use]
    pub fn encoded_size(format: &FormatContext) -> usize {
        PREFIX_SIZE
            + 6
            + 6 * usize::from(format.length_size())
            + usize::from(format.offset_size())
            + CHECKSUM_SIZE
    }

    /// Return the geometry of every super block.
    #[must_use]
    pub fn super_blocks(&self) -> &[SuperBlockInfo] {
        &self.super_blocks
    }

    /// Return the number of entries in a data block page.
    #[must_use]
    pub const fn page_entries(&self) -> u64 {
        1 << self.parameters.page_bits
    }

    /// Return the size of the block offset field of secondary and data blocks.
    #[must_use]
    pub fn block_offset_size(&self) -> usize {
        usize::from(self.parameters.max_entries_bits).div_ceil(8)
    }

    /// Return the number of super blocks whose data blocks are addressed directly by the index block.
    #[must_use]
    pub fn index_block_super_blocks(&self) -> u64 {
        2 * u64::from(self.parameters.secondary_block_min_data_blocks.ilog2())
    }

    /// Return the number of data block addresses in the index block.
    #[must_use]
    pub fn index_block_data_blocks(&self) -> u64 {
        2 * (u64::from(self.parameters.secondary_block_min_data_blocks) - 1)
    }

    /// Return the number of secondary block addresses in the index block.
    #[must_use]
    pub fn index_block_secondary_blocks(&self) -> u64 {
        (self.super_blocks.len() as u64).saturating_sub(self.index_block_super_blocks())
    }

    /// Return the super block holding entry `index`, relative to the first entry after the index block.
    #[must_use]
    pub fn super_block_index(&self, index: u64) -> u64 {
        u64::from((index / u64::from(self.parameters.data_block_min_entries) + 1).ilog2())
    }

    /// Return the number of pages in each data block of super block `info`, zero if they are not paged.
    #[must_use]
    pub const fn data_block_pages(&self, info: &SuperBlockInfo) -> u64 {
        if info.data_block_entries > self.page_entries() {
            info.data_block_entries / self.page_entries()
        } else {
            0
        }
    }

    /// Return the encoded size of the index block.
    #[must_use]
    pub fn index_block_size(&self, format: &FormatContext) -> usize {
        let offset_size = u64::from(format.offset_size());
        let size = PREFIX_SIZE as u64
            + offset_size
            + u64::from(self.parameters.index_block_entries) * u64::from(self.entry_size)
            + (self.index_block_data_blocks() + self.index_block_secondary_blocks()) * offset_size
            + CHECKSUM_SIZE as u64;
        usize::try_from(size).unwrap_or(usize::MAX)
    }

    /// Return the size of the page bitmap of each data block of super block `info`.
    #[must_use]
    pub const fn data_block_page_bitmap_size(&self, info: &SuperBlockInfo) -> u64 {
        self.data_block_pages(info).div_ceil(8)
    }

    /// Return the encoded size of the secondary block of super block `info`.
    #[must_use]
    pub fn secondary_block_size(&self, format: &FormatContext, info: &SuperBlockInfo) -> usize {
        let offset_size = u64::from(format.offset_size());
        let size = (PREFIX_SIZE + usize::from(format.offset_size()) + self.block_offset_size()) as u64
            + info
                .num_data_blocks
                .saturating_mul(self.data_block_page_bitmap_size(info))
            + info.num_data_blocks.saturating_mul(offset_size)
            + CHECKSUM_SIZE as u64;
        usize::try_from(size).unwrap_or(usize::MAX)
    }

    /// Return the size of a data block excluding its entries, which is the offset of its first page.
    #[must_use]
    pub fn data_block_prefix_size(&self, format: &FormatContext) -> usize {
        PREFIX_SIZE + usize::from(format.offset_size()) + self.block_offset_size() + CHECKSUM_SIZE
    }

    /// Return the encoded size of an unpaged data block of `num_entries` entries.
    #[must_use]
    pub fn data_block_size(&self, format: &FormatContext, num_entries: u64) -> usize {
        let size = num_entries
            .saturating_mul(u64::from(self.entry_size))
            .saturating_add(self.data_block_prefix_size(format) as u64);
        usize::try_from(size).unwrap_or(usize::MAX)
    }

    /// Return the address and encoded size of `page` of the paged data block at `data_block_address`.
    #[must_use]
    pub fn page_address(&self, format: &FormatContext, data_block_address: u64, page: u64) -> (u64, usize) {
        let page_size = self
            .page_entries()
            .saturating_mul(u64::from(self.entry_size))
            .saturating_add(CHECKSUM_SIZE as u64);
        let address = data_block_address
            .saturating_add(self.data_block_prefix_size(format) as u64)
            .saturating_add(page.saturating_mul(page_size));
        (address, usize::try_from(page_size).unwrap_or(usize::MAX))
    }
}

/// Decode an extensible array header.
///
/// # Errors
/// Returns a [`FormatError`] if the signature, version or checksum is invalid, the header is truncated, or its parameters are inconsistent.
pub fn decode_header(
    reader: &mut FormatReader,
    format: &FormatContext,
) -> Result<ExtensibleArrayHeader, FormatError> {
    reader.read_signature(HEADER_STRUCTURE, HEADER_SIGNATURE)?;
    reader.read_version(HEADER_STRUCTURE, 0)?;
    let client_id = reader.read_u8()?;
    let entry_size = reader.read_u8()?;
    let parameters = ExtensibleArrayParameters {
        max_entries_bits: reader.read_u8()?,
        index_block_entries: reader.read_u8()?,
        data_block_min_entries: reader.read_u8()?,
        secondary_block_min_data_blocks: reader.read_u8()?,
        page_bits: reader.read_u8()?,
    };
    // Secondary block count and size, data block count and size
    for _ in 0..4 {
        reader.read_length(format)?;
    }
    let max_index_set = reader.read_length(format)?;
    let num_entries = reader.read_length(format)?;
    let index_block_address = reader.read_offset(format)?;
    reader.read_checksum(HEADER_STRUCTURE)?;
    ExtensibleArrayHeader::new(
        client_id,
        entry_size,
        parameters,
        num_entries,
        max_index_set,
        index_block_address,
    )
}

/// An extensible array index block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensibleArrayIndexBlock {
    /// The entries held directly.
    pub entries: Vec<Option<ChunkLocation>>,
    /// The data block addresses of the first super blocks.
    pub data_block_addresses: Vec<u64>,
    /// The secondary block addresses of the remaining super blocks.
    pub secondary_block_addresses: Vec<u64>,
}

fn decode_owner(
    reader: &mut FormatReader,
    format: &FormatContext,
    structure: &'static str,
    header_address: u64,
) -> Result<(), FormatError> {
    let owner = reader.read_offset(format)?;
    if owner == header_address {
        Ok(())
    } else {
        Err(FormatError::InvalidValue(format!(
            "{structure} at address {} belongs to header {owner}, expected {header_address}",
            reader.address()
        )))
    }
}

fn decode_addresses(
    reader: &mut FormatReader,
    format: &FormatContext,
    count: u64,
) -> Result<Vec<u64>, FormatError> {
    if count.saturating_mul(u64::from(format.offset_size())) > reader.remaining() as u64 {
        return Err(FormatError::InvalidValue(format!(
            "{count} addresses exceed the {} remaining bytes",
            reader.remaining()
        )));
    }
    (0..count).map(|_| reader.read_offset(format)).collect()
}

/// Decode an extensible array index block.
///
/// # Errors
/// Returns a [`FormatError`] if the signature, version or checksum is invalid, the block does not belong to `header_address`, or the block is truncated.
pub(crate) fn decode_index_block(
    reader: &mut FormatReader,
    format: &FormatContext,
    header: &ExtensibleArrayHeader,
    header_address: u64,
    encoding: &ChunkEntryEncoding,
) -> Result<ExtensibleArrayIndexBlock, FormatError> {
    reader.read_signature(INDEX_BLOCK_STRUCTURE, INDEX_BLOCK_SIGNATURE)?;
    reader.read_version(INDEX_BLOCK_STRUCTURE, 0)?;
    let client_id = reader.read_u8()?;
    encoding.validate(INDEX_BLOCK_STRUCTURE, client_id, usize::from(header.entry_size))?;
    decode_owner(reader, format, INDEX_BLOCK_STRUCTURE, header_address)?;
    let entries = encoding.decode_many(reader, u64::from(header.parameters.index_block_entries))?;
    let data_block_addresses = decode_addresses(reader, format, header.index_block_data_blocks())?;
    let secondary_block_addresses =
        decode_addresses(reader, format, header.index_block_secondary_blocks())?;
    reader.read_checksum(INDEX_BLOCK_STRUCTURE)?;
    Ok(ExtensibleArrayIndexBlock {
        entries,
        data_block_addresses,
        secondary_block_addresses,
    })
}

/// An extensible array secondary block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensibleArraySecondaryBlock {
    /// The bitmap of initialised pages of every data block, empty if data blocks are not paged.
    ///
    /// Page `p` of data block `d` is bit `d * pages + p`, most significant bit first.
    pub page_bitmap: Vec<u8>,
    /// The data block addresses.
    pub data_block_addresses: Vec<u64>,
}

/// Decode the extensible array secondary block of super block `info`.
///
/// # Errors
/// Returns a [`FormatError`] if the signature, version or checksum is invalid, the block does not belong to `header_address`, or the block is truncated.
pub(crate) fn decode_secondary_block(
    reader: &mut FormatReader,
    format: &FormatContext,
    header: &ExtensibleArrayHeader,
    header_address: u64,
    info: &SuperBlockInfo,
) -> Result<ExtensibleArraySecondaryBlock, FormatError> {
    reader.read_signature(SECONDARY_BLOCK_STRUCTURE, SECONDARY_BLOCK_SIGNATURE)?;
    reader.read_version(SECONDARY_BLOCK_STRUCTURE, 0)?;
    reader.read_u8()?;
    decode_owner(reader, format, SECONDARY_BLOCK_STRUCTURE, header_address)?;
    reader.read_uint(header.block_offset_size())?;
    let page_bitmap = if header.data_block_pages(info) > 0 {
        let size = info
            .num_data_blocks
            .saturating_mul(header.data_block_page_bitmap_size(info));
        let size = usize::try_from(size)
            .map_err(|_| FormatError::InvalidValue("page bitmap does not fit in memory".to_string()))?;
        reader.read_bytes(size)?.to_vec()
    } else {
        Vec::new()
    };
    let data_block_addresses = decode_addresses(reader, format, info.num_data_blocks)?;
    reader.read_checksum(SECONDARY_BLOCK_STRUCTURE)?;
    Ok(ExtensibleArraySecondaryBlock {
        page_bitmap,
        data_block_addresses,
    })
}

/// Decode an unpaged extensible array data block of `num_entries` entries.
///
/// # Errors
/// Returns a [`FormatError`] if the signature, version or checksum is invalid, the block does not belong to `header_address`, or the block is truncated.
pub(crate) fn decode_data_block(
    reader: &mut FormatReader,
    format: &FormatContext,
    header: &ExtensibleArrayHeader,
    header_address: u64,
    encoding: &ChunkEntryEncoding,
    num_entries: u64,
) -> Result<Vec<Option<ChunkLocation>>, FormatError> {
    reader.read_signature(DATA_BLOCK_STRUCTURE, DATA_BLOCK_SIGNATURE)?;
    reader.read_version(DATA_BLOCK_STRUCTURE, 0)?;
    let client_id = reader.read_u8()?;
    encoding.validate(DATA_BLOCK_STRUCTURE, client_id, usize::from(header.entry_size))?;
    decode_owner(reader, format, DATA_BLOCK_STRUCTURE, header_address)?;
    reader.read_uint(header.block_offset_size())?;
    let entries = encoding.decode_many(reader, num_entries)?;
    reader.read_checksum(DATA_BLOCK_STRUCTURE)?;
    Ok(entries)
}

/// Where the entry of a chunk is found.
#[derive(Debug, PartialEq, Eq)]
enum EntryPosition {
    Absent,
    IndexBlock(u64),
    DataBlock {
        address: u64,
        num_entries: u64,
        entry: u64,
    },
    SecondaryBlock {
        address: u64,
        super_block: usize,
        entry: u64,
    },
}

/// Where the entry of a chunk is found within a secondary block.
#[derive(Debug, PartialEq, Eq)]
enum SecondaryEntryPosition {
    Absent,
    DataBlock {
        address: u64,
        num_entries: u64,
        entry: u64,
    },
    Page {
        address: u64,
        size: usize,
        entry: u64,
    },
}

fn index_block_position(
    header: &ExtensibleArrayHeader,
    index_block: &ExtensibleArrayIndexBlock,
    index: u64,
) -> Result<EntryPosition, FormatError> {
    let index_block_entries = u64::from(header.parameters.index_block_entries);
    if index < index_block_entries {
        return Ok(EntryPosition::IndexBlock(index));
    }
    let index = index - index_block_entries;
    let super_block = header.super_block_index(index);
    let info = usize::try_from(super_block)
        .ok()
        .and_then(|super_block| header.super_blocks().get(super_block))
        .ok_or_else(|| {
            FormatError::InvalidValue(format!(
                "entry {index} is beyond the super blocks of the {HEADER_STRUCTURE}"
            ))
        })?;
    let entry = index - info.start_entry;
    let missing = |what: &str| FormatError::InvalidValue(format!("{INDEX_BLOCK_STRUCTURE} is missing {what}"));
    if super_block < header.index_block_super_blocks() {
        let data_block = info.start_data_block + entry / info.data_block_entries;
        let address = *usize::try_from(data_block)
            .ok()
            .and_then(|data_block| index_block.data_block_addresses.get(data_block))
            .ok_or_else(|| missing("a data block address"))?;
        if is_undefined_address(address) {
            return Ok(EntryPosition::Absent);
        }
        if header.data_block_pages(info) > 0 {
            return Err(FormatError::Unsupported(format!(
                "paged {DATA_BLOCK_STRUCTURE} at address {address} addressed by the {INDEX_BLOCK_STRUCTURE}"
            )));
        }
        Ok(EntryPosition::DataBlock {
            address,
            num_entries: info.data_block_entries,
            entry: entry % info.data_block_entries,
        })
    } else {
        let secondary_block = super_block - header.index_block_super_blocks();
        let address = *usize::try_from(secondary_block)
            .ok()
            .and_then(|secondary_block| index_block.secondary_block_addresses.get(secondary_block))
            .ok_or_else(|| missing("a secondary block address"))?;
        if is_undefined_address(address) {
            return Ok(EntryPosition::Absent);
        }
        Ok(EntryPosition::SecondaryBlock {
            address,
            super_block: usize::try_from(super_block).unwrap_or(usize::MAX),
            entry,
        })
    }
}

fn secondary_block_position(
    format: &FormatContext,
    header: &ExtensibleArrayHeader,
    info: &SuperBlockInfo,
    secondary_block: &ExtensibleArraySecondaryBlock,
    entry: u64,
) -> Result<SecondaryEntryPosition, FormatError> {
    let data_block = entry / info.data_block_entries;
    let entry = entry % info.data_block_entries;
    let address = *usize::try_from(data_block)
        .ok()
        .and_then(|data_block| secondary_block.data_block_addresses.get(data_block))
        .ok_or_else(|| {
            FormatError::InvalidValue(format!(
                "{SECONDARY_BLOCK_STRUCTURE} is missing data block {data_block}"
            ))
        })?;
    if is_undefined_address(address) {
        return Ok(SecondaryEntryPosition::Absent);
    }
    let pages = header.data_block_pages(info);
    if pages == 0 {
        return Ok(SecondaryEntryPosition::DataBlock {
            address,
            num_entries: info.data_block_entries,
            entry,
        });
    }
    let page = entry / header.page_entries();
    if !bitmap_bit(&secondary_block.page_bitmap, data_block * pages + page) {
        return Ok(SecondaryEntryPosition::Absent);
    }
    let (address, size) = header.page_address(format, address, page);
    Ok(SecondaryEntryPosition::Page {
        address,
        size,
        entry: entry % header.page_entries(),
    })
}

fn entry_at(entries: &[Option<ChunkLocation>], entry: u64) -> Result<Option<ChunkLocation>, DatasetError> {
    usize::try_from(entry)
        .ok()
        .and_then(|entry| entries.get(entry))
        .copied()
        .ok_or_else(|| FormatError::InvalidValue(format!("missing entry {entry}")).into())
}

/// Rotate `coordinates` so that dimension `dim` comes first.
fn swizzle(coordinates: &mut [u64], dim: usize) {
    coordinates[..=dim].rotate_right(1);
}

/// An extensible array chunk index.
#[derive(Debug)]
pub struct ExtensibleArrayIndex {
    context: ChunkIndexContext,
    address: u64,
    encoding: ChunkEntryEncoding,
    unlimited_dimension: usize,
    swizzled_max_down_chunks: Vec<u64>,
    header: OnceLock<ExtensibleArrayHeader>,
    index_block: OnceLock<ExtensibleArrayIndexBlock>,
    secondary_blocks: NodeCache<u64, ExtensibleArraySecondaryBlock>,
    data_blocks: NodeCache<u64, Vec<Option<ChunkLocation>>>,
}

impl ExtensibleArrayIndex {
    /// Create a new extensible array index with its header at `address`.
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidLayout`] if the dataset does not have exactly one unlimited dimension.
    pub fn new(context: ChunkIndexContext, address: u64) -> Result<Self, DatasetError> {
        let unlimited_dimensions = context.unlimited_dimensions();
        let [unlimited_dimension] = unlimited_dimensions[..] else {
            return Err(DatasetError::InvalidLayout(format!(
                "an extensible array chunk index requires exactly one unlimited dimension, got maximum extent {:?}",
                context.max_extent()
            )));
        };
        let mut max_grid_shape: Vec<u64> = context
            .max_grid_shape()
            .iter()
            .map(|size| size.unwrap_or(1))
            .collect();
        swizzle(&mut max_grid_shape, unlimited_dimension);
        let swizzled_max_down_chunks = down_products(&max_grid_shape).ok_or_else(|| {
            DatasetError::InvalidLayout("the number of chunks overflows".to_string())
        })?;
        let encoding = ChunkEntryEncoding::new(&context);
        Ok(Self {
            context,
            address,
            encoding,
            unlimited_dimension,
            swizzled_max_down_chunks,
            header: OnceLock::new(),
            index_block: OnceLock::new(),
            secondary_blocks: NodeCache::default(),
            data_blocks: NodeCache::default(),
        })
    }

    /// Return the dataset geometry of the index.
    #[must_use]
    pub const fn context(&self) -> &ChunkIndexContext {
        &self.context
    }

    /// Return the linear entry index of the chunk at `chunk_indices`.
    #[must_use]
    pub fn entry_index(&self, chunk_indices: &[u64]) -> u64 {
        let mut swizzled = chunk_indices.to_vec();
        swizzle(&mut swizzled, self.unlimited_dimension);
        linear_index(&swizzled, &self.swizzled_max_down_chunks)
    }

    fn decode_header(&self, bytes: &[u8]) -> Result<ExtensibleArrayHeader, DatasetError> {
        let header = decode_header(&mut FormatReader::new(bytes, self.address), self.context.format())?;
        self.encoding.validate(
            HEADER_STRUCTURE,
            header.client_id,
            usize::from(header.entry_size),
        )?;
        log::debug!(
            "{HEADER_STRUCTURE} at address {}: {} entries, {} super blocks",
            self.address,
            header.num_entries,
            header.super_blocks().len()
        );
        Ok(header)
    }

    fn decode_index_block(
        &self,
        header: &ExtensibleArrayHeader,
        bytes: &[u8],
    ) -> Result<ExtensibleArrayIndexBlock, DatasetError> {
        Ok(decode_index_block(
            &mut FormatReader::new(bytes, header.index_block_address),
            self.context.format(),
            header,
            self.address,
            &self.encoding,
        )?)
    }

    fn decode_secondary_block(
        &self,
        header: &ExtensibleArrayHeader,
        info: &SuperBlockInfo,
        address: u64,
        bytes: &[u8],
    ) -> Result<ExtensibleArraySecondaryBlock, DatasetError> {
        Ok(decode_secondary_block(
            &mut FormatReader::new(bytes, address),
            self.context.format(),
            header,
            self.address,
            info,
        )?)
    }

    fn decode_data_block(
        &self,
        header: &ExtensibleArrayHeader,
        address: u64,
        num_entries: u64,
        bytes: &[u8],
    ) -> Result<Vec<Option<ChunkLocation>>, DatasetError> {
        Ok(decode_data_block(
            &mut FormatReader::new(bytes, address),
            self.context.format(),
            header,
            self.address,
            &self.encoding,
            num_entries,
        )?)
    }

    fn decode_page(
        &self,
        header: &ExtensibleArrayHeader,
        address: u64,
        bytes: &[u8],
    ) -> Result<Vec<Option<ChunkLocation>>, DatasetError> {
        let mut reader = FormatReader::new(bytes, address);
        let entries = self.encoding.decode_many(&mut reader, header.page_entries())?;
        reader.read_checksum(PAGE_STRUCTURE)?;
        Ok(entries)
    }

    /// Locate the chunk at `chunk_indices`, which must be inside the chunk grid.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if an index structure cannot be read or is malformed.
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
            let size = ExtensibleArrayHeader::encoded_size(format);
            let bytes = read_structure(storage, HEADER_STRUCTURE, self.address, size)?;
            self.decode_header(&bytes)
        })?;
        let index = self.entry_index(chunk_indices);
        if index >= header.max_index_set || is_undefined_address(header.index_block_address) {
            return Ok(None);
        }
        let index_block = get_or_try_init(&self.index_block, || {
            let size = header.index_block_size(format);
            let bytes = read_structure(storage, INDEX_BLOCK_STRUCTURE, header.index_block_address, size)?;
            self.decode_index_block(header, &bytes)
        })?;

        let (address, num_entries, entry) = match index_block_position(header, index_block, index)? {
            EntryPosition::Absent => return Ok(None),
            EntryPosition::IndexBlock(entry) => return entry_at(&index_block.entries, entry),
            EntryPosition::DataBlock {
                address,
                num_entries,
                entry,
            } => (address, num_entries, entry),
            EntryPosition::SecondaryBlock {
                address,
                super_block,
                entry,
            } => {
                let info = &header.super_blocks()[super_block];
                let secondary_block = self.secondary_blocks.get_or_try_insert_with(address, || {
                    let size = header.secondary_block_size(format, info);
                    let bytes = read_structure(storage, SECONDARY_BLOCK_STRUCTURE, address, size)?;
                    self.decode_secondary_block(header, info, address, &bytes)
                })?;
                match secondary_block_position(format, header, info, &secondary_block, entry)? {
                    SecondaryEntryPosition::Absent => return Ok(None),
                    SecondaryEntryPosition::DataBlock {
                        address,
                        num_entries,
                        entry,
                    } => (address, num_entries, entry),
                    SecondaryEntryPosition::Page {
                        address,
                        size,
                        entry,
                    } => {
                        let entries = self.data_blocks.get_or_try_insert_with(address, || {
                            let bytes = read_structure(storage, PAGE_STRUCTURE, address, size)?;
                            self.decode_page(header, address, &bytes)
                        })?;
                        return entry_at(&entries, entry);
                    }
                }
            }
        };
        let entries = self.data_blocks.get_or_try_insert_with(address, || {
            let size = header.data_block_size(format, num_entries);
            let bytes = read_structure(storage, DATA_BLOCK_STRUCTURE, address, size)?;
            self.decode_data_block(header, address, num_entries, &bytes)
        })?;
        entry_at(&entries, entry)
    }

    /// Asynchronously locate the chunk at `chunk_indices`, which must be inside the chunk grid.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if an index structure cannot be read or is malformed.
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
            let size = ExtensibleArrayHeader::encoded_size(format);
            let bytes = async_read_structure(storage, HEADER_STRUCTURE, self.address, size).await?;
            let header = self.decode_header(&bytes)?;
            self.header.get_or_init(|| header)
        };
        let index = self.entry_index(chunk_indices);
        if index >= header.max_index_set || is_undefined_address(header.index_block_address) {
            return Ok(None);
        }
        let index_block = if let Some(index_block) = self.index_block.get() {
            index_block
        } else {
            let size = header.index_block_size(format);
            let bytes =
                async_read_structure(storage, INDEX_BLOCK_STRUCTURE, header.index_block_address, size)
                    .await?;
            let index_block = self.decode_index_block(header, &bytes)?;
            self.index_block.get_or_init(|| index_block)
        };

        let (address, num_entries, entry) = match index_block_position(header, index_block, index)? {
            EntryPosition::Absent => return Ok(None),
            EntryPosition::IndexBlock(entry) => return entry_at(&index_block.entries, entry),
            EntryPosition::DataBlock {
                address,
                num_entries,
                entry,
            } => (address, num_entries, entry),
            EntryPosition::SecondaryBlock {
                address,
                super_block,
                entry,
            } => {
                let info = &header.super_blocks()[super_block];
                let secondary_block = if let Some(secondary_block) = self.secondary_blocks.get(address) {
                    secondary_block
                } else {
                    let size = header.secondary_block_size(format, info);
                    let bytes =
                        async_read_structure(storage, SECONDARY_BLOCK_STRUCTURE, address, size).await?;
                    let secondary_block = self.decode_secondary_block(header, info, address, &bytes)?;
                    self.secondary_blocks.insert(address, secondary_block)
                };
                match secondary_block_position(format, header, info, &secondary_block, entry)? {
                    SecondaryEntryPosition::Absent => return Ok(None),
                    SecondaryEntryPosition::DataBlock {
                        address,
                        num_entries,
                        entry,
                    } => (address, num_entries, entry),
                    SecondaryEntryPosition::Page {
                        address,
                        size,
                        entry,
                    } => {
                        let entries = if let Some(entries) = self.data_blocks.get(address) {
                            entries
                        } else {
                            let bytes =
                                async_read_structure(storage, PAGE_STRUCTURE, address, size).await?;
                            let entries = self.decode_page(header, address, &bytes)?;
                            self.data_blocks.insert(address, entries)
                        };
                        return entry_at(&entries, entry);
                    }
                }
            }
        };
        let entries = if let Some(entries) = self.data_blocks.get(address) {
            entries
        } else {
            let size = header.data_block_size(format, num_entries);
            let bytes = async_read_structure(storage, DATA_BLOCK_STRUCTURE, address, size).await?;
            let entries = self.decode_data_block(header, address, num_entries, &bytes)?;
            self.data_blocks.insert(address, entries)
        };
        entry_at(&entries, entry)
    }
}
