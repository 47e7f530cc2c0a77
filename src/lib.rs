//! A rust library for reading the raw data of chunked [HDF5](https://www.hdfgroup.org/solutions/hdf5/) datasets.
//!
//! `h5chunk` implements the storage engine beneath an HDF5 dataset: given the extent, element size and data layout of a dataset (as decoded by a metadata layer), it
//!  - walks file and memory [selections](selection) (all elements, hyperslabs, point lists),
//!  - locates chunks with every on-disk [chunk index](dataset::chunk_index) (single chunk, implicit, fixed array, extensible array, version 1 and 2 B-trees),
//!  - decodes chunks with a [filter pipeline](dataset::filter) of registered filters (`deflate`, `shuffle`, `fletcher32`, `bzip2`, `zstd`),
//!  - caches decoded chunks in a [chunk cache](dataset::chunk_cache),
//!  - and reads from any [byte-range source](storage).
//!
//! Parsing the superblock, object headers and groups of a file is out of scope, as is writing.
//!
//! ## Getting Started
//! [`dataset::DatasetBuilder`] and [`dataset::ChunkedDataset`] are good places to start.
//!
//! ## Example
//! ```rust
//! # use std::sync::Arc;
//! use h5chunk::dataset::{
//!     chunk_index::{ChunkIndexDescriptor, ChunkIndexType},
//!     DatasetBuilder, DatasetLayout,
//! };
//! use h5chunk::selection::{RegularHyperslab, Selection};
//! use h5chunk::storage::MemoryStore;
//!
//! // Four 1x3 chunks of u8 stored back to back at address 0
//! let store = Arc::new(MemoryStore::new_with_bytes((0..12).collect()));
//! let dataset = DatasetBuilder::new(
//!     vec![4, 3],
//!     1,
//!     DatasetLayout::Chunked {
//!         chunk_shape: vec![1, 3],
//!         index: ChunkIndexDescriptor::new(ChunkIndexType::Implicit, 0),
//!         filters: vec![],
//!     },
//! )
//! .build(store)?;
//!
//! let selection = Selection::from(RegularHyperslab::new_with_start_shape(vec![1, 1], vec![2, 2])?);
//! let elements = dataset.read_elements::<u8>(&selection)?;
//! assert_eq!(elements, vec![4, 5, 7, 8]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Crate Features
//! #### Default
//!  - `ndarray`: [`ndarray`] utility functions for [`ChunkedDataset`](crate::dataset::ChunkedDataset).
//!  - Filters: `deflate`, `zstd`.
//!
//! #### Non-Default
//!  - `async`: an asynchronous API for [`storage`] and [`ChunkedDataset`](crate::dataset::ChunkedDataset).
//!    - The async API is runtime-agnostic.
//!  - Filters: `bz2`.
//!
//! The `shuffle` and `fletcher32` filters are always available.
//!
//! ## Logging
//! `h5chunk` logs through the [`log`] facade: chunk index and cache activity at `trace`, dataset creation at `debug`.
//! Storage reads can be logged with a [`UsageLogStorageAdapter`](storage::storage_adapter::UsageLogStorageAdapter).
//!
//! ## Licence
//! `h5chunk` is licensed under either of
//!  - the Apache License, Version 2.0 [LICENSE-APACHE](./LICENCE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0> or
//!  - the MIT license [LICENSE-MIT](./LICENCE-MIT) or <http://opensource.org/licenses/MIT>, at your option.

#![warn(unused_variables)]
#![warn(dead_code)]
#![deny(missing_docs)]
// #![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::missing_panics_doc)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod byte_range;
pub mod config;
pub mod dataset;
pub mod format;
pub mod plugin;
pub mod selection;
pub mod storage;

