//! Writers of synthetic chunk index structures.

use std::collections::BTreeMap;

use crate::format::{format_writer::FormatWriter, FormatContext, UNDEFINED_ADDRESS};

use super::{
    btree_v1, btree_v2,
    btree_v2::{BTreeV2Header, ChildPointer, ChunkRecordEncoding},
    chunk_size_length, down_products,
    extensible_array::{self, ExtensibleArrayHeader, ExtensibleArrayIndex, ExtensibleArrayParameters},
    fixed_array::{self, FixedArrayHeader},
    linear_index, ChunkEntryEncoding, ChunkIndexContext, ChunkLocation,
};

/// An in-memory file that structures are appended to.
#[derive(Debug)]
pub(crate) struct FileImage {
    bytes: Vec<u8>,
}

impl FileImage {
    /// Create an image with `base` leading zero bytes.
    pub(crate) fn new(base: usize) -> Self {
        Self {
            bytes: vec![0; base],
        }
    }

    /// Append `len` zero bytes and return their address.
    pub(crate) fn reserve(&mut self, len: usize) -> u64 {
        let address = self.bytes.len() as u64;
        self.bytes.resize(self.bytes.len() + len, 0);
        address
    }

    /// Append `bytes` and return their address.
    pub(crate) fn append(&mut self, bytes: &[u8]) -> u64 {
        let address = self.bytes.len() as u64;
        self.bytes.extend_from_slice(bytes);
        address
    }

    pub(crate) fn write_at(&mut self, address: u64, bytes: &[u8]) {
        let start = usize::try_from(address).unwrap();
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

fn write_entry(
    writer: &mut FormatWriter,
    context: &ChunkIndexContext,
    location: Option<&ChunkLocation>,
) {
    let format = context.format();
    let location = location
        .copied()
        .unwrap_or(ChunkLocation::new(UNDEFINED_ADDRESS, 0, 0));
    writer.offset(format, location.address);
    if context.filtered() {
        writer
            .uint(location.size, chunk_size_length(context.chunk_size_bytes()))
            .u32(location.filter_mask);
    }
}

/// Write a fixed array indexing `chunks` and return the address of its header.
pub(crate) fn write_fixed_array(
    image: &mut FileImage,
    context: &ChunkIndexContext,
    chunks: &BTreeMap<Vec<u64>, ChunkLocation>,
    page_bits: u8,
) -> u64 {
    let format = context.format();
    let encoding = ChunkEntryEncoding::new(context);
    let max_grid_shape: Vec<u64> = context
        .max_grid_shape()
        .into_iter()
        .map(Option::unwrap)
        .collect();
    let down = down_products(&max_grid_shape).unwrap();
    let entries: BTreeMap<u64, ChunkLocation> = chunks
        .iter()
        .map(|(chunk_indices, location)| (linear_index(chunk_indices, &down), *location))
        .collect();
    let header_address = image.reserve(FixedArrayHeader::encoded_size(format));
    let mut header = FixedArrayHeader {
        client_id: encoding.client_id(),
        entry_size: u8::try_from(encoding.size()).unwrap(),
        page_bits,
        num_entries: max_grid_shape.iter().product(),
        data_block_address: UNDEFINED_ADDRESS,
    };

    if !entries.is_empty() {
        let mut data_block = FormatWriter::new();
        data_block
            .bytes(fixed_array::DATA_BLOCK_SIGNATURE)
            .u8(0)
            .u8(header.client_id)
            .offset(format, header_address);
        let num_pages = header.num_pages();
        if num_pages == 0 {
            for index in 0..header.num_entries {
                write_entry(&mut data_block, context, entries.get(&index));
            }
            header.data_block_address = image.append(&data_block.checksum().finish());
        } else {
            let paging = header.clone();
            let page_range = |page: u64| {
                let start = page * paging.entries_per_page();
                start..start + paging.page_entries(page)
            };
            let initialised: Vec<bool> = (0..num_pages)
                .map(|page| entries.range(page_range(page)).next().is_some())
                .collect();
            let mut bitmap = vec![0u8; usize::try_from(header.page_bitmap_size()).unwrap()];
            for (page, _) in initialised.iter().enumerate().filter(|(_, init)| **init) {
                bitmap[page / 8] |= 0x80 >> (page % 8);
            }
            data_block.bytes(&bitmap);
            header.data_block_address = image.append(&data_block.checksum().finish());
            for (page, init) in initialised.iter().enumerate() {
                let page = page as u64;
                let mut writer = FormatWriter::new();
                for index in page_range(page) {
                    write_entry(&mut writer, context, entries.get(&index));
                }
                let bytes = writer.checksum().finish();
                let address = if *init {
                    image.append(&bytes)
                } else {
                    image.reserve(bytes.len())
                };
                assert_eq!(address, header.page_address(format, page).unwrap().0);
            }
        }
    }

    let bytes = FormatWriter::new()
        .bytes(fixed_array::HEADER_SIGNATURE)
        .u8(0)
        .u8(header.client_id)
        .u8(header.entry_size)
        .u8(header.page_bits)
        .length(format, header.num_entries)
        .offset(format, header.data_block_address)
        .checksum()
        .finish();
    image.write_at(header_address, &bytes);
    header_address
}

fn block_prefix(
    writer: &mut FormatWriter,
    signature: &[u8; 4],
    format: &FormatContext,
    header: &ExtensibleArrayHeader,
    header_address: u64,
) {
    writer
        .bytes(signature)
        .u8(0)
        .u8(header.client_id)
        .offset(format, header_address);
}

/// Write an extensible array indexing `chunks` and return the address of its header.
pub(crate) fn write_extensible_array(
    image: &mut FileImage,
    context: &ChunkIndexContext,
    chunks: &BTreeMap<Vec<u64>, ChunkLocation>,
    parameters: ExtensibleArrayParameters,
) -> u64 {
    let format = context.format();
    let encoding = ChunkEntryEncoding::new(context);
    let index = ExtensibleArrayIndex::new(context.clone(), 0).unwrap();
    let entries: BTreeMap<u64, ChunkLocation> = chunks
        .iter()
        .map(|(chunk_indices, location)| (index.entry_index(chunk_indices), *location))
        .collect();
    let max_index_set = entries.keys().next_back().map_or(0, |index| index + 1);
    let mut header = ExtensibleArrayHeader::new(
        encoding.client_id(),
        u8::try_from(encoding.size()).unwrap(),
        parameters,
        max_index_set,
        max_index_set,
        UNDEFINED_ADDRESS,
    )
    .unwrap();
    let header_address = image.reserve(ExtensibleArrayHeader::encoded_size(format));
    let block_offset_size = header.block_offset_size();
    let index_block_entries = u64::from(parameters.index_block_entries);

    if !entries.is_empty() {
        let mut data_block_addresses = Vec::new();
        let mut secondary_block_addresses = Vec::new();
        for (super_block, info) in header.super_blocks().iter().enumerate() {
            let start = index_block_entries + info.start_entry;
            let in_index_block = (super_block as u64) < header.index_block_super_blocks();
            if start >= max_index_set {
                if in_index_block {
                    data_block_addresses.extend(
                        std::iter::repeat(UNDEFINED_ADDRESS)
                            .take(usize::try_from(info.num_data_blocks).unwrap()),
                    );
                } else {
                    secondary_block_addresses.push(UNDEFINED_ADDRESS);
                }
                continue;
            }
            let pages = header.data_block_pages(info);
            let mut page_bitmap =
                vec![0u8; usize::try_from(info.num_data_blocks * header.data_block_page_bitmap_size(info)).unwrap()];
            let mut addresses = Vec::new();
            for data_block in 0..info.num_data_blocks {
                let block_start = start + data_block * info.data_block_entries;
                let range = block_start..block_start + info.data_block_entries;
                if entries.range(range.clone()).next().is_none() {
                    addresses.push(UNDEFINED_ADDRESS);
                    continue;
                }
                let mut writer = FormatWriter::new();
                block_prefix(&mut writer, extensible_array::DATA_BLOCK_SIGNATURE, format, &header, header_address);
                writer.uint(block_start - index_block_entries, block_offset_size);
                if pages == 0 {
                    for index in range {
                        write_entry(&mut writer, context, entries.get(&index));
                    }
                    addresses.push(image.append(&writer.checksum().finish()));
                } else {
                    let address = image.append(&writer.checksum().finish());
                    for page in 0..pages {
                        let page_start = block_start + page * header.page_entries();
                        let page_range = page_start..page_start + header.page_entries();
                        let mut writer = FormatWriter::new();
                        for index in page_range.clone() {
                            write_entry(&mut writer, context, entries.get(&index));
                        }
                        let bytes = writer.checksum().finish();
                        let page_address = if entries.range(page_range).next().is_some() {
                            let bit = usize::try_from(data_block * pages + page).unwrap();
                            page_bitmap[bit / 8] |= 0x80 >> (bit % 8);
                            image.append(&bytes)
                        } else {
                            image.reserve(bytes.len())
                        };
                        assert_eq!(page_address, header.page_address(format, address, page).0);
                    }
                    addresses.push(address);
                }
            }
            if in_index_block {
                assert_eq!(pages, 0, "paged data blocks must be in secondary blocks");
                data_block_addresses.extend(addresses);
            } else if addresses.iter().all(|address| *address == UNDEFINED_ADDRESS) {
                secondary_block_addresses.push(UNDEFINED_ADDRESS);
            } else {
                let mut writer = FormatWriter::new();
                block_prefix(&mut writer, extensible_array::SECONDARY_BLOCK_SIGNATURE, format, &header, header_address);
                writer.uint(start - index_block_entries, block_offset_size);
                if pages > 0 {
                    writer.bytes(&page_bitmap);
                }
                for address in addresses {
                    writer.offset(format, address);
                }
                secondary_block_addresses.push(image.append(&writer.checksum().finish()));
            }
        }

        let mut writer = FormatWriter::new();
        block_prefix(&mut writer, extensible_array::INDEX_BLOCK_SIGNATURE, format, &header, header_address);
        for index in 0..index_block_entries {
            write_entry(&mut writer, context, entries.get(&index));
        }
        for address in data_block_addresses {
            writer.offset(format, address);
        }
        for address in secondary_block_addresses {
            writer.offset(format, address);
        }
        header.index_block_address = image.append(&writer.checksum().finish());
    }

    let bytes = FormatWriter::new()
        .bytes(extensible_array::HEADER_SIGNATURE)
        .u8(0)
        .u8(header.client_id)
        .u8(header.entry_size)
        .u8(parameters.max_entries_bits)
        .u8(parameters.index_block_entries)
        .u8(parameters.data_block_min_entries)
        .u8(parameters.secondary_block_min_data_blocks)
        .u8(parameters.page_bits)
        .length(format, 0)
        .length(format, 0)
        .length(format, 0)
        .length(format, 0)
        .length(format, header.max_index_set)
        .length(format, header.num_entries)
        .offset(format, header.index_block_address)
        .checksum()
        .finish();
    image.write_at(header_address, &bytes);
    header_address
}

fn write_btree_v1_key(
    writer: &mut FormatWriter,
    context: &ChunkIndexContext,
    scaled_offset: &[u64],
    location: Option<&ChunkLocation>,
) {
    let (size, filter_mask) = location.map_or((0, 0), |location| {
        (u32::try_from(location.size).unwrap(), location.filter_mask)
    });
    writer.u32(size).u32(filter_mask);
    for (offset, chunk) in std::iter::zip(scaled_offset, context.chunk_shape()) {
        writer.u64(offset * chunk);
    }
    writer.u64(0);
}

fn write_btree_v1_node(
    image: &mut FileImage,
    context: &ChunkIndexContext,
    level: u8,
    keys: &[(&[u64], Option<&ChunkLocation>)],
    children: &[u64],
) -> u64 {
    let format = context.format();
    let mut writer = FormatWriter::new();
    writer
        .bytes(btree_v1::NODE_SIGNATURE)
        .u8(btree_v1::CHUNK_NODE_TYPE)
        .u8(level)
        .u16(u16::try_from(children.len()).unwrap())
        .offset(format, UNDEFINED_ADDRESS)
        .offset(format, UNDEFINED_ADDRESS);
    for (i, (scaled_offset, location)) in keys.iter().enumerate() {
        write_btree_v1_key(&mut writer, context, scaled_offset, *location);
        if let Some(child) = children.get(i) {
            writer.offset(format, *child);
        }
    }
    let bytes = writer.finish();
    assert_eq!(
        bytes.len(),
        btree_v1::node_size(format, context.dimensionality(), children.len())
    );
    image.append(&bytes)
}

/// Write a version 1 B-tree indexing `chunks` with at most `max_entries` children per node and return the address of its root.
pub(crate) fn write_btree_v1(
    image: &mut FileImage,
    context: &ChunkIndexContext,
    chunks: &BTreeMap<Vec<u64>, ChunkLocation>,
    max_entries: usize,
) -> u64 {
    assert!(max_entries >= 2);
    let chunk_shape = context.chunk_shape();
    let mut end = vec![0; chunk_shape.len()];
    end[0] = context.grid_shape()[0];
    if chunks.is_empty() {
        return write_btree_v1_node(image, context, 0, &[(end.as_slice(), None)], &[]);
    }

    // (first key, address) of every node at the current level
    let records: Vec<(&[u64], &ChunkLocation)> = chunks
        .iter()
        .map(|(chunk_indices, location)| (chunk_indices.as_slice(), location))
        .collect();
    let mut level_nodes: Vec<(Vec<u64>, u64)> = Vec::new();
    for (group, next) in records
        .chunks(max_entries)
        .zip(records.chunks(max_entries).skip(1).map(Some).chain([None]))
    {
        let right = next.map_or(end.as_slice(), |next| next[0].0);
        let mut keys: Vec<(&[u64], Option<&ChunkLocation>)> =
            group.iter().map(|(key, location)| (*key, Some(*location))).collect();
        keys.push((right, None));
        let children: Vec<u64> = group.iter().map(|(_, location)| location.address).collect();
        let address = write_btree_v1_node(image, context, 0, &keys, &children);
        level_nodes.push((group[0].0.to_vec(), address));
    }
    let mut level = 0;
    while level_nodes.len() > 1 {
        level += 1;
        let mut parents = Vec::new();
        for (group, next) in level_nodes
            .chunks(max_entries)
            .zip(level_nodes.chunks(max_entries).skip(1).map(Some).chain([None]))
        {
            let right = next.map_or(end.as_slice(), |next| next[0].0.as_slice());
            let mut keys: Vec<(&[u64], Option<&ChunkLocation>)> =
                group.iter().map(|(key, _)| (key.as_slice(), None)).collect();
            keys.push((right, None));
            let children: Vec<u64> = group.iter().map(|(_, address)| *address).collect();
            let address = write_btree_v1_node(image, context, level, &keys, &children);
            parents.push((group[0].0.clone(), address));
        }
        level_nodes = parents;
    }
    level_nodes[0].1
}

fn write_record(
    writer: &mut FormatWriter,
    context: &ChunkIndexContext,
    scaled_offset: &[u64],
    location: &ChunkLocation,
) {
    write_entry(writer, context, Some(location));
    for offset in scaled_offset {
        writer.u64(*offset);
    }
}

fn write_btree_v2_node(
    image: &mut FileImage,
    context: &ChunkIndexContext,
    header: &BTreeV2Header,
    records: &[(&Vec<u64>, &ChunkLocation)],
    depth: u16,
) -> ChildPointer {
    let format = context.format();
    let info = header.node_info();
    let mut writer = FormatWriter::new();
    if depth == 0 {
        assert!(records.len() as u64 <= info[0].max_records);
        writer
            .bytes(btree_v2::LEAF_SIGNATURE)
            .u8(0)
            .u8(header.record_type);
        for (scaled_offset, location) in records {
            write_record(&mut writer, context, scaled_offset, location);
        }
        return ChildPointer {
            address: image.append(&writer.checksum().finish()),
            records: u16::try_from(records.len()).unwrap(),
            total_records: Some(records.len() as u64),
        };
    }

    let total = records.len() as u64;
    let child_capacity = info[usize::from(depth) - 1].cumulative_max_records;
    let num_children = (total + 1).div_ceil(child_capacity + 1).max(1);
    let separators = num_children - 1;
    assert!(separators <= info[usize::from(depth)].max_records);
    let child_records = total - separators;
    let (quotient, remainder) = (child_records / num_children, child_records % num_children);
    let mut children = Vec::new();
    let mut separator_records = Vec::new();
    let mut start = 0;
    for child in 0..num_children {
        let len = usize::try_from(quotient + u64::from(child < remainder)).unwrap();
        children.push(write_btree_v2_node(
            image,
            context,
            header,
            &records[start..start + len],
            depth - 1,
        ));
        start += len;
        if child < separators {
            separator_records.push(records[start]);
            start += 1;
        }
    }

    writer
        .bytes(btree_v2::INTERNAL_SIGNATURE)
        .u8(0)
        .u8(header.record_type);
    for (scaled_offset, location) in &separator_records {
        write_record(&mut writer, context, scaled_offset, location);
    }
    let total_records_size = header.pointer_size(format, depth)
        - usize::from(format.offset_size())
        - header.max_records_size();
    for child in &children {
        writer
            .offset(format, child.address)
            .uint(u64::from(child.records), header.max_records_size());
        if total_records_size > 0 {
            writer.uint(child.total_records.unwrap(), total_records_size);
        }
    }
    ChildPointer {
        address: image.append(&writer.checksum().finish()),
        records: u16::try_from(separator_records.len()).unwrap(),
        total_records: Some(total),
    }
}

/// Write a version 2 B-tree of the least depth indexing `chunks` with nodes of `node_size` bytes, and return the address of its header.
pub(crate) fn write_btree_v2(
    image: &mut FileImage,
    context: &ChunkIndexContext,
    chunks: &BTreeMap<Vec<u64>, ChunkLocation>,
    node_size: u32,
) -> u64 {
    let format = context.format();
    let encoding = ChunkRecordEncoding::new(context);
    let record_type = encoding.record_type();
    let record_size = u16::try_from(encoding.size()).unwrap();
    let total = chunks.len() as u64;
    let header = (0..)
        .map(|depth| {
            BTreeV2Header::new(format, record_type, node_size, record_size, depth, 0, 0, total).unwrap()
        })
        .find(|header| header.node_info()[usize::from(header.depth)].cumulative_max_records >= total)
        .unwrap();
    let header_address = image.reserve(BTreeV2Header::encoded_size(format));
    let root = if chunks.is_empty() {
        ChildPointer {
            address: UNDEFINED_ADDRESS,
            records: 0,
            total_records: Some(0),
        }
    } else {
        let records: Vec<_> = chunks.iter().collect();
        write_btree_v2_node(image, context, &header, &records, header.depth)
    };
    let bytes = FormatWriter::new()
        .bytes(btree_v2::HEADER_SIGNATURE)
        .u8(0)
        .u8(record_type)
        .u32(node_size)
        .u16(record_size)
        .u16(header.depth)
        .u8(100)
        .u8(40)
        .offset(format, root.address)
        .u16(root.records)
        .length(format, total)
        .checksum()
        .finish();
    image.write_at(header_address, &bytes);
    header_address
}

#[cfg(test)]
mod tests {
    use crate::{
        dataset::chunk_index::{ChunkIndex, ChunkIndexDescriptor, ChunkIndexType},
        storage::MemoryStore,
    };

    use super::*;

    #[test]
    fn chunk_index_variants_agree() {
        let format = FormatContext::new(8, 8).unwrap();
        let extent = vec![60, 25];
        let chunk_shape = vec![3, 5];
        let fixed = ChunkIndexContext::new(
            format,
            extent.clone(),
            vec![Some(60), Some(25)],
            chunk_shape.clone(),
            8,
            true,
        )
        .unwrap();
        let unlimited = ChunkIndexContext::new(
            format,
            extent,
            vec![None, Some(25)],
            chunk_shape,
            8,
            true,
        )
        .unwrap();

        let grid_shape = fixed.grid_shape();
        let mut chunks = BTreeMap::new();
        for i in 0..grid_shape[0] {
            for j in 0..grid_shape[1] {
                if (i * 5 + j) % 7 < 5 {
                    let n = i * 5 + j;
                    chunks.insert(vec![i, j], ChunkLocation::new(1 << 20 | n * 64, 40 + n, u32::from(n % 3 == 0)));
                }
            }
        }

        let mut image = FileImage::new(0);
        let fixed_array = write_fixed_array(&mut image, &fixed, &chunks, 4);
        let parameters = ExtensibleArrayParameters {
            max_entries_bits: 32,
            index_block_entries: 4,
            data_block_min_entries: 4,
            secondary_block_min_data_blocks: 4,
            page_bits: 4,
        };
        let extensible_array = write_extensible_array(&mut image, &unlimited, &chunks, parameters);
        let btree_v1 = write_btree_v1(&mut image, &unlimited, &chunks, 8);
        let btree_v2 = write_btree_v2(&mut image, &unlimited, &chunks, 256);
        let store = MemoryStore::new_with_bytes(image.finish());

        let indexes = [
            ChunkIndex::new(
                &ChunkIndexDescriptor::new(ChunkIndexType::FixedArray, fixed_array),
                fixed.clone(),
            ),
            ChunkIndex::new(
                &ChunkIndexDescriptor::new(ChunkIndexType::ExtensibleArray, extensible_array),
                unlimited.clone(),
            ),
            ChunkIndex::new(
                &ChunkIndexDescriptor::new(ChunkIndexType::BTreeV1, btree_v1),
                unlimited.clone(),
            ),
            ChunkIndex::new(
                &ChunkIndexDescriptor::new(ChunkIndexType::BTreeV2, btree_v2),
                unlimited,
            ),
        ]
        .map(Result::unwrap);

        for i in 0..grid_shape[0] {
            for j in 0..grid_shape[1] {
                let expected = chunks.get(&vec![i, j]).copied();
                for index in &indexes {
                    assert_eq!(
                        index.locate(&store, &[i, j]).unwrap(),
                        expected,
                        "{} chunk {i}, {j}",
                        index.index_type()
                    );
                }
            }
        }
        for index in &indexes {
            assert!(index.locate(&store, &[grid_shape[0], 0]).is_err());
        }
    }
}
