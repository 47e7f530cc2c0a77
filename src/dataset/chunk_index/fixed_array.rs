//! The fixed array chunk index.
//!
//! A fixed array holds one entry per chunk of the maximum extent, in row-major chunk grid order.
//! Its header (`FAHD`) points to a single data block (`FADB`).
//! If the number of entries exceeds the page size, the data block holds a bitmap of initialised pages instead of the entries,
//! and the entries follow the data block in pages that each end with a checksum.

use std::sync::OnceLock;

use crate::{
    format::{is_undefined_address, FormatContext, FormatError, FormatReader, CHECKSUM_SIZE},
    storage::ReadableStorageTraits,
};

#[cfg(feature = "async")]
use crate::storage::AsyncReadableStorageTraits;

use super::{
    get_or_try_init, linear_index, read_structure, ChunkEntryEncoding, ChunkIndexContext,
    ChunkLocation, DatasetError, NodeCache,
};

const HEADER_STRUCTURE: &str = "fixed array header";
const DATA_BLOCK_STRUCTURE: &str = "fixed array data block";
const PAGE_STRUCTURE: &str = "fixed array data block page";

/// The signature of a fixed array header.
pub const HEADER_SIGNATURE: &[u8; 4] = b"FAHD";

/// The signature of a fixed array data block.
pub const DATA_BLOCK_SIGNATURE: &[u8; 4] = b"FADB";

/// The size of the signature, version and client id prefix of fixed array structures.
const PREFIX_SIZE: usize = 4 + 1 + 1;

/// A fixed array header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedArrayHeader {
    /// The client id: 0 for unfiltered chunks, 1 for filtered chunks.
    pub client_id: u8,
    /// The size of an entry in bytes.
    pub entry_size: u8,
    /// The log2 of the number of entries in a data block page.
    pub page_bits: u8,
    /// The number of entries.
    pub num_entries: u64,
    /// The address of the data block.
    pub data_block_address: u64,
}

impl FixedArrayHeader {
    /// Return the encoded size of a header.
    #[must_use]
    pub fn encoded_size(format: &FormatContext) -> usize {
        PREFIX_SIZE
            + 2
            + usize::from(format.length_size())
            + usize::from(format.offset_size())
            + CHECKSUM_SIZE
    }

    /// Return the number of entries in a full page.
    #[must_use]
    pub const fn entries_per_page(&self) -> u64 {
        1 << self.page_bits
    }

    /// Return the number of pages, zero if the data block is not paged.
    #[must_use]
    pub const fn num_pages(&self) -> u64 {
        if self.num_entries > self.entries_per_page() {
            self.num_entries.div_ceil(self.entries_per_page())
        } else {
            0
        }
    }

    /// Return the size of the bitmap of initialised pages, in bytes.
    #[must_use]
    pub const fn page_bitmap_size(&self) -> u64 {
        self.num_pages().div_ceil(8)
    }

    /// Return the number of entries on `page`.
    #[must_use]
    pub const fn page_entries(&self, page: u64) -> u64 {
        if page + 1 == self.num_pages() {
            self.num_entries - page * self.entries_per_page()
        } else {
            self.entries_per_page()
        }
    }

    /// Return the size of the prefix of the data block before the entries or page bitmap.
    fn data_block_prefix_size(format: &FormatContext) -> usize {
        PREFIX_SIZE + usize::from(format.offset_size())
    }

    /// Return the encoded size of the data block, excluding any pages.
    ///
    /// # Errors
    /// Returns [`FormatError::InvalidValue`] if the size does not fit in memory.
    pub fn data_block_size(&self, format: &FormatContext) -> Result<usize, FormatError> {
        let body = if self.num_pages() > 0 {
            self.page_bitmap_size()
        } else {
            self.num_entries.saturating_mul(u64::from(self.entry_size))
        };
        usize::try_from(body)
            .ok()
            .and_then(|body| body.checked_add(Self::data_block_prefix_size(format) + CHECKSUM_SIZE))
            .ok_or_else(|| {
                FormatError::InvalidValue(format!(
                    "{DATA_BLOCK_STRUCTURE} of {} entries does not fit in memory",
                    self.num_entries
                ))
            })
    }

    /// Return the address and encoded size of `page`.
    ///
    /// Pages follow the data block contiguously, each a full page of entries and a checksum.
    ///
    /// # Errors
    /// Returns [`FormatError::InvalidValue`] if the address overflows.
    pub fn page_address(&self, format: &FormatContext, page: u64) -> Result<(u64, usize), FormatError> {
        let overflow = || FormatError::InvalidValue(format!("{PAGE_STRUCTURE} {page} address overflows"));
        let entry_size = u64::from(self.entry_size);
        let full_page_size = self
            .entries_per_page()
            .checked_mul(entry_size)
            .and_then(|size| size.checked_add(CHECKSUM_SIZE as u64))
            .ok_or_else(overflow)?;
        let address = self
            .data_block_size(format)
            .ok()
            .and_then(|size| self.data_block_address.checked_add(size as u64))
            .and_then(|address| address.checked_add(page.checked_mul(full_page_size)?))
            .ok_or_else(overflow)?;
        let size = usize::try_from(self.page_entries(page) * entry_size + CHECKSUM_SIZE as u64)
            .map_err(|_| overflow())?;
        Ok((address, size))
    }
}

/// Decode a fixed array header.
///
/// # Errors
/// Returns a [`FormatError`] if the signature, version or checksum is invalid, or the header is truncated.
pub fn decode_header(
    reader: &mut FormatReader,
    format: &FormatContext,
) -> Result<FixedArrayHeader, FormatError> {
    reader.read_signature(HEADER_STRUCTURE, HEADER_SIGNATURE)?;
    reader.read_version(HEADER_STRUCTURE, 0)?;
    let client_id = reader.read_u8()?;
    let entry_size = reader.read_u8()?;
    let page_bits = reader.read_u8()?;
    let num_entries = reader.read_length(format)?;
    let data_block_address = reader.read_offset(format)?;
    reader.read_checksum(HEADER_STRUCTURE)?;
    if page_bits >= 64 {
        return Err(FormatError::InvalidValue(format!(
            "{HEADER_STRUCTURE} page bits {page_bits} must be less than 64"
        )));
    }
    Ok(FixedArrayHeader {
        client_id,
        entry_size,
        page_bits,
        num_entries,
        data_block_address,
    })
}

/// The contents of a fixed array data block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FixedArrayDataBlock {
    /// The entries of an unpaged data block.
    Entries(Vec<Option<ChunkLocation>>),
    /// The bitmap of initialised pages of a paged data block. The first page is the most significant bit of the first byte.
    PageBitmap(Vec<u8>),
}

/// Decode a fixed array data block.
///
/// # Errors
/// Returns a [`FormatError`] if the signature, version or checksum is invalid, the block does not belong to `header_address`, or the block is truncated.
pub(crate) fn decode_data_block(
    reader: &mut FormatReader,
    format: &FormatContext,
    header: &FixedArrayHeader,
    header_address: u64,
    encoding: &ChunkEntryEncoding,
) -> Result<FixedArrayDataBlock, FormatError> {
    reader.read_signature(DATA_BLOCK_STRUCTURE, DATA_BLOCK_SIGNATURE)?;
    reader.read_version(DATA_BLOCK_STRUCTURE, 0)?;
    let client_id = reader.read_u8()?;
    encoding.validate(DATA_BLOCK_STRUCTURE, client_id, usize::from(header.entry_size))?;
    let owner = reader.read_offset(format)?;
    if owner != header_address {
        return Err(FormatError::InvalidValue(format!(
            "{DATA_BLOCK_STRUCTURE} at address {} belongs to header {owner}, expected {header_address}",
            reader.address()
        )));
    }
    let data_block = if header.num_pages() > 0 {
        let bitmap_size = usize::try_from(header.page_bitmap_size())
            .map_err(|_| FormatError::InvalidValue("page bitmap does not fit in memory".to_string()))?;
        FixedArrayDataBlock::PageBitmap(reader.read_bytes(bitmap_size)?.to_vec())
    } else {
        FixedArrayDataBlock::Entries(encoding.decode_many(reader, header.num_entries)?)
    };
    reader.read_checksum(DATA_BLOCK_STRUCTURE)?;
    Ok(data_block)
}

/// Decode a data block page of `num_entries` entries.
///
/// # Errors
/// Returns a [`FormatError`] if the checksum is invalid or the page is truncated.
pub(crate) fn decode_page(
    reader: &mut FormatReader,
    encoding: &ChunkEntryEncoding,
    num_entries: u64,
) -> Result<Vec<Option<ChunkLocation>>, FormatError> {
    let entries = encoding.decode_many(reader, num_entries)?;
    reader.read_checksum(PAGE_STRUCTURE)?;
    Ok(entries)
}

/// Returns true if bit `index` of a most significant bit first `bitmap` is set.
pub(crate) fn bitmap_bit(bitmap: &[u8], index: u64) -> bool {
    usize::try_from(index / 8)
        .ok()
        .and_then(|byte| bitmap.get(byte))
        .is_some_and(|byte| byte & (0x80 >> (index % 8)) != 0)
}

/// Where the entry of a chunk is found.
enum EntryPosition {
    DataBlock(usize),
    Page { page: u64, entry: usize },
}

/// A fixed array chunk index.
#[derive(Debug)]
pub struct FixedArrayIndex {
    context: ChunkIndexContext,
    address: u64,
    encoding: ChunkEntryEncoding,
    max_down_chunks: Vec<u64>,
    header: OnceLock<FixedArrayHeader>,
    data_block: OnceLock<FixedArrayDataBlock>,
    pages: NodeCache<u64, Vec<Option<ChunkLocation>>>,
}

impl FixedArrayIndex {
    /// Create a new fixed array index with its header at `address`.
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidLayout`] if the dataset has an unlimited dimension.
    pub fn new(context: ChunkIndexContext, address: u64) -> Result<Self, DatasetError> {
        if !context.unlimited_dimensions().is_empty() {
            return Err(DatasetError::InvalidLayout(format!(
                "a fixed array chunk index requires a fixed maximum extent, got {:?}",
                context.max_extent()
            )));
        }
        let max_down_chunks = context.max_down_chunks()?;
        let encoding = ChunkEntryEncoding::new(&context);
        Ok(Self {
            context,
            address,
            encoding,
            max_down_chunks,
            header: OnceLock::new(),
            data_block: OnceLock::new(),
            pages: NodeCache::default(),
        })
    }

    /// Return the dataset geometry of the index.
    #[must_use]
    pub const fn context(&self) -> &ChunkIndexContext {
        &self.context
    }

    fn decode_header(&self, bytes: &[u8]) -> Result<FixedArrayHeader, DatasetError> {
        let header = decode_header(&mut FormatReader::new(bytes, self.address), self.context.format())?;
        self.encoding.validate(
            HEADER_STRUCTURE,
            header.client_id,
            usize::from(header.entry_size),
        )?;
        log::debug!(
            "{HEADER_STRUCTURE} at address {}: {} entries, {} pages",
            self.address,
            header.num_entries,
            header.num_pages()
        );
        Ok(header)
    }

    fn decode_data_block(
        &self,
        header: &FixedArrayHeader,
        bytes: &[u8],
    ) -> Result<FixedArrayDataBlock, DatasetError> {
        Ok(decode_data_block(
            &mut FormatReader::new(bytes, header.data_block_address),
            self.context.format(),
            header,
            self.address,
            &self.encoding,
        )?)
    }

    /// Return the position of the entry at linear `index`, or [`None`] if its page is not initialised.
    fn entry_position(
        header: &FixedArrayHeader,
        data_block: &FixedArrayDataBlock,
        index: u64,
    ) -> Result<Option<EntryPosition>, DatasetError> {
        if index >= header.num_entries {
            return Err(FormatError::InvalidValue(format!(
                "chunk {index} is beyond the {} entries of the {HEADER_STRUCTURE}",
                header.num_entries
            ))
            .into());
        }
        let to_usize = |value: u64| {
            usize::try_from(value)
                .map_err(|_| FormatError::InvalidValue(format!("entry {value} does not fit in memory")))
        };
        match data_block {
            FixedArrayDataBlock::Entries(_) => Ok(Some(EntryPosition::DataBlock(to_usize(index)?))),
            FixedArrayDataBlock::PageBitmap(bitmap) => {
                let page = index / header.entries_per_page();
                if bitmap_bit(bitmap, page) {
                    let entry = to_usize(index % header.entries_per_page())?;
                    Ok(Some(EntryPosition::Page { page, entry }))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn entry(entries: &[Option<ChunkLocation>], entry: usize) -> Result<Option<ChunkLocation>, DatasetError> {
        entries
            .get(entry)
            .copied()
            .ok_or_else(|| FormatError::InvalidValue(format!("missing entry {entry}")).into())
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
            let bytes = read_structure(
                storage,
                HEADER_STRUCTURE,
                self.address,
                FixedArrayHeader::encoded_size(format),
            )?;
            self.decode_header(&bytes)
        })?;
        if is_undefined_address(header.data_block_address) {
            return Ok(None);
        }
        let data_block = get_or_try_init(&self.data_block, || {
            let bytes = read_structure(
                storage,
                DATA_BLOCK_STRUCTURE,
                header.data_block_address,
                header.data_block_size(format)?,
            )?;
            self.decode_data_block(header, &bytes)
        })?;

        let index = linear_index(chunk_indices, &self.max_down_chunks);
        match Self::entry_position(header, data_block, index)? {
            None => Ok(None),
            Some(EntryPosition::DataBlock(entry)) => match data_block {
                FixedArrayDataBlock::Entries(entries) => Self::entry(entries, entry),
                FixedArrayDataBlock::PageBitmap(_) => Ok(None),
            },
            Some(EntryPosition::Page { page, entry }) => {
                let entries = self.pages.get_or_try_insert_with(page, || {
                    let (address, size) = header.page_address(format, page)?;
                    let bytes = read_structure(storage, PAGE_STRUCTURE, address, size)?;
                    Ok::<_, DatasetError>(decode_page(
                        &mut FormatReader::new(&bytes, address),
                        &self.encoding,
                        header.page_entries(page),
                    )?)
                })?;
                Self::entry(&entries, entry)
            }
        }
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
            let bytes = async_read_structure(
                storage,
                HEADER_STRUCTURE,
                self.address,
                FixedArrayHeader::encoded_size(format),
            )
            .await?;
            let header = self.decode_header(&bytes)?;
            self.header.get_or_init(|| header)
        };
        if is_undefined_address(header.data_block_address) {
            return Ok(None);
        }
        let data_block = if let Some(data_block) = self.data_block.get() {
            data_block
        } else {
            let bytes = async_read_structure(
                storage,
                DATA_BLOCK_STRUCTURE,
                header.data_block_address,
                header.data_block_size(format)?,
            )
            .await?;
            let data_block = self.decode_data_block(header, &bytes)?;
            self.data_block.get_or_init(|| data_block)
        };

        let index = linear_index(chunk_indices, &self.max_down_chunks);
        match Self::entry_position(header, data_block, index)? {
            None => Ok(None),
            Some(EntryPosition::DataBlock(entry)) => match data_block {
                FixedArrayDataBlock::Entries(entries) => Self::entry(entries, entry),
                FixedArrayDataBlock::PageBitmap(_) => Ok(None),
            },
            Some(EntryPosition::Page { page, entry }) => {
                let entries = if let Some(entries) = self.pages.get(page) {
                    entries
                } else {
                    let (address, size) = header.page_address(format, page)?;
                    let bytes = async_read_structure(storage, PAGE_STRUCTURE, address, size).await?;
                    let entries = decode_page(
                        &mut FormatReader::new(&bytes, address),
                        &self.encoding,
                        header.page_entries(page),
                    )?;
                    self.pages.insert(page, entries)
                };
                Self::entry(&entries, entry)
            }
        }
    }
}
