//! h5chunk global configuration options.

use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Global configuration options for the h5chunk crate.
///
/// Retrieve the global [`Config`] with [`global_config`] and modify it with [`global_config_mut`].
///
/// # Miscellaneous Configuration Options
///
/// ## Validate Checksums
///  > default: [`true`]
///
/// If enabled, the lookup3 checksums of checksummed index structures (Fixed Array, Extensible Array and version 2 B-tree blocks) are verified when they are read,
/// and the `fletcher32` filter validates that stored chunks match their checksums.
/// Otherwise validation is skipped.
///
/// # Chunk Cache Configuration Options
/// ## Default Chunk Cache Size
/// > default: `1048576` (1 MiB)
///
/// The byte budget of a [`ChunkCacheLruSizeLimit`](crate::dataset::chunk_cache::ChunkCacheLruSizeLimit) created with [`Default::default`].
///
/// ## Default Chunk Cache Slots
/// > default: `521`
///
/// The slot budget of a [`ChunkCacheLruChunkLimit`](crate::dataset::chunk_cache::ChunkCacheLruChunkLimit) created with [`Default::default`].
///
/// # Concurrency Configuration Options
/// ## Default Chunk Concurrency Minimum
/// > default: `4`
///
/// For dataset operations involving multiple whole chunks, this is the preferred minimum chunk concurrency.
/// For example, [`ChunkedDataset::retrieve_chunks`](crate::dataset::ChunkedDataset::retrieve_chunks) will concurrently read and decode four chunks at a time by default.
#[derive(Debug)]
pub struct Config {
    validate_checksums: bool,
    chunk_cache_size: u64,
    chunk_cache_slots: u64,
    chunk_concurrent_minimum: usize,
}

#[allow(clippy::derivable_impls)]
impl Default for Config {
    fn default() -> Self {
        Config {
            validate_checksums: true,
            chunk_cache_size: 1024 * 1024,
            chunk_cache_slots: 521,
            chunk_concurrent_minimum: 4,
        }
    }
}

impl Config {
    /// Get the [validate checksums](#validate-checksums) configuration.
    #[must_use]
    pub fn validate_checksums(&self) -> bool {
        self.validate_checksums
    }

    /// Set the [validate checksums](#validate-checksums) configuration.
    pub fn set_validate_checksums(&mut self, validate_checksums: bool) {
        self.validate_checksums = validate_checksums;
    }

    /// Get the [default chunk cache size](#default-chunk-cache-size) configuration.
    #[must_use]
    pub fn chunk_cache_size(&self) -> u64 {
        self.chunk_cache_size
    }

    /// Set the [default chunk cache size](#default-chunk-cache-size) configuration.
    pub fn set_chunk_cache_size(&mut self, chunk_cache_size: u64) {
        self.chunk_cache_size = chunk_cache_size;
    }

    /// Get the [default chunk cache slots](#default-chunk-cache-slots) configuration.
    #[must_use]
    pub fn chunk_cache_slots(&self) -> u64 {
        self.chunk_cache_slots
    }

    /// Set the [default chunk cache slots](#default-chunk-cache-slots) configuration.
    pub fn set_chunk_cache_slots(&mut self, chunk_cache_slots: u64) {
        self.chunk_cache_slots = chunk_cache_slots;
    }

    /// Get the [default chunk concurrent minimum](#default-chunk-concurrency-minimum) configuration.
    #[must_use]
    pub fn chunk_concurrent_minimum(&self) -> usize {
        self.chunk_concurrent_minimum
    }

    /// Set the [default chunk concurrent minimum](#default-chunk-concurrency-minimum) configuration.
    pub fn set_chunk_concurrent_minimum(&mut self, concurrent_minimum: usize) {
        self.chunk_concurrent_minimum = concurrent_minimum;
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

/// Returns a reference to the global h5chunk configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config() -> RwLockReadGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .read()
        .unwrap()
}

/// Returns a mutable reference to the global h5chunk configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config_mut() -> RwLockWriteGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .write()
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert!(config.validate_checksums());
        assert_eq!(config.chunk_cache_size(), 1024 * 1024);
        assert_eq!(config.chunk_cache_slots(), 521);
        assert_eq!(config.chunk_concurrent_minimum(), 4);
    }

    #[test]
    fn config_chunk_concurrent_minimum() {
        let minimum = global_config().chunk_concurrent_minimum();
        global_config_mut().set_chunk_concurrent_minimum(2);
        assert_eq!(global_config().chunk_concurrent_minimum(), 2);
        global_config_mut().set_chunk_concurrent_minimum(minimum);
    }
}
