//! A filesystem store.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{
    byte_range::{ByteRange, InvalidByteRangeError},
    storage::{Bytes, ReadableStorageTraits, StorageError},
};

/// A synchronous file system store.
///
/// Each call opens its own handle to the file, so concurrent reads never share a file position.
#[derive(Debug)]
pub struct FilesystemStore {
    path: PathBuf,
}

impl FilesystemStore {
    /// Create a new file system store reading the file at `path`.
    ///
    /// # Errors
    /// Returns a [`FilesystemStoreCreateError`] if `path`:
    ///   - is not valid, or
    ///   - does not point to an existing file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, FilesystemStoreCreateError> {
        let path = path.as_ref().to_path_buf();
        if path.to_str().is_none() {
            return Err(FilesystemStoreCreateError::InvalidPath(path));
        }
        let md = std::fs::metadata(&path)?;
        if !md.is_file() {
            return Err(FilesystemStoreCreateError::NotAFile(path));
        }
        Ok(Self { path })
    }

    /// Return the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReadableStorageTraits for FilesystemStore {
    fn get_partial_values(&self, byte_ranges: &[ByteRange]) -> Result<Vec<Bytes>, StorageError> {
        let mut file = File::open(&self.path)?;
        let size = file.metadata()?.len();

        let mut out = Vec::with_capacity(byte_ranges.len());
        for byte_range in byte_ranges {
            if byte_range.end().map_or(true, |end| end > size) {
                return Err(InvalidByteRangeError::new(*byte_range, size).into());
            }
            let length = usize::try_from(byte_range.length())
                .map_err(|_| InvalidByteRangeError::new(*byte_range, size))?;
            file.seek(SeekFrom::Start(byte_range.offset()))?;
            let mut buffer = vec![0; length];
            file.read_exact(&mut buffer)?;
            out.push(Bytes::from(buffer));
        }
        Ok(out)
    }

    fn size(&self) -> Result<u64, StorageError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

/// A filesystem store creation error.
#[derive(Debug, Error)]
pub enum FilesystemStoreCreateError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// The path is not valid on this system.
    #[error("path {0} is not valid")]
    InvalidPath(PathBuf),
    /// The path does not point to a file.
    #[error("path {0} is not a file")]
    NotAFile(PathBuf),
}
