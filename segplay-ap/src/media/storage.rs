//! Random-access byte storage backing a packet source

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Storage read failures
#[derive(Error, Debug)]
pub enum StorageError {
    /// Requested range extends past the end of storage
    #[error("Read of {len} bytes at offset {offset} exceeds storage size {size}")]
    OutOfRange { offset: u64, len: usize, size: u64 },

    /// Underlying I/O failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte store addressable by absolute offset
pub trait RandomAccessStorage: Send + Sync {
    /// Fill all of `dest` with the bytes starting at `offset`
    fn read_data(&self, offset: u64, dest: &mut [u8]) -> Result<(), StorageError>;

    /// Total size in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage over an owned byte vector
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    bytes: Vec<u8>,
}

impl MemoryStorage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl RandomAccessStorage for MemoryStorage {
    fn read_data(&self, offset: u64, dest: &mut [u8]) -> Result<(), StorageError> {
        let out_of_range = || StorageError::OutOfRange {
            offset,
            len: dest.len(),
            size: self.bytes.len() as u64,
        };
        let start = usize::try_from(offset).map_err(|_| out_of_range())?;
        let end = start.checked_add(dest.len()).ok_or_else(out_of_range)?;
        let src = self.bytes.get(start..end).ok_or_else(out_of_range)?;
        dest.copy_from_slice(src);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Storage over a file on disk
///
/// Reads seek then read under a mutex, so one handle can be shared.
#[derive(Debug)]
pub struct FileStorage {
    file: Mutex<File>,
    size: u64,
}

impl FileStorage {
    /// Open `path` for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl RandomAccessStorage for FileStorage {
    fn read_data(&self, offset: u64, dest: &mut [u8]) -> Result<(), StorageError> {
        if offset.saturating_add(dest.len() as u64) > self.size {
            return Err(StorageError::OutOfRange {
                offset,
                len: dest.len(),
                size: self.size,
            });
        }

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(dest)?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.size
    }
}
