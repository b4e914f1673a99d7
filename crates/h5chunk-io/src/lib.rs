//! Storage layer for chunked datasets.
//!
//! Provides the byte-addressable [`Storage`] abstraction with memory, file
//! and (optionally) memory-mapped backends, the append-only
//! [`FreeSpaceAllocator`] used on the write path, and [`BlockStore`], which
//! joins the two into the [`BlockIo`] interface the chunk index codecs use.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub use h5chunk_format;
use h5chunk_format::chunk_index::BlockIo;
use h5chunk_format::error::FormatError;

mod allocator;

pub use allocator::FreeSpaceAllocator;

#[cfg(feature = "mmap")]
pub mod mmap;

#[cfg(feature = "mmap")]
pub use mmap::MmapStorage;

/// A byte-addressable, seekable byte sequence.
///
/// Reads and writes address absolute offsets. Writing past the current end
/// extends the sequence.
pub trait Storage {
    /// Fill `buf` from `offset`. Fails if the range passes the end.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write `data` at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Current length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push buffered writes to the backing medium.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        (**self).write_at(offset, data)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

fn eof(offset: u64, len: usize, available: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read of {len} bytes at {offset} passes end of storage ({available} bytes)"),
    )
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// Growable in-memory storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Vec<u8>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing bytes.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Storage for MemoryStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(|_| eof(offset, buf.len(), self.len()))?;
        let src = start
            .checked_add(buf.len())
            .and_then(|end| self.data.get(start..end))
            .ok_or_else(|| eof(offset, buf.len(), self.data.len() as u64))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset exceeds address space"))?;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// Storage backed by a file on disk. The file cursor is owned by this
/// handle and repositioned for every access.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileStorage {
    /// Create (or truncate) a file for reading and writing.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self { file, path, len: 0 })
    }

    /// Open an existing file for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, path, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if offset.saturating_add(buf.len() as u64) > self.len {
            return Err(eof(offset, buf.len(), self.len));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.len = self.len.max(offset + data.len() as u64);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}

// ---------------------------------------------------------------------------
// BlockStore
// ---------------------------------------------------------------------------

/// A storage handle paired with its allocator, exposed as [`BlockIo`].
pub struct BlockStore<'a, S: Storage + ?Sized> {
    storage: &'a mut S,
    allocator: &'a mut FreeSpaceAllocator,
}

impl<'a, S: Storage + ?Sized> BlockStore<'a, S> {
    pub fn new(storage: &'a mut S, allocator: &'a mut FreeSpaceAllocator) -> Self {
        Self { storage, allocator }
    }
}

impl<S: Storage + ?Sized> BlockIo for BlockStore<'_, S> {
    fn read_block(&mut self, address: u64, len: usize) -> Result<Vec<u8>, FormatError> {
        let available = self.storage.len();
        if address.saturating_add(len as u64) > available {
            return Err(FormatError::UnexpectedEof {
                expected: address.saturating_add(len as u64) as usize,
                available: available as usize,
            });
        }
        let mut buf = vec![0u8; len];
        self.storage.read_at(address, &mut buf)?;
        Ok(buf)
    }

    fn allocate(&mut self, len: u64) -> Result<u64, FormatError> {
        self.allocator.allocate(len)
    }

    fn write_block(&mut self, address: u64, data: &[u8]) -> Result<(), FormatError> {
        self.storage.write_at(address, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_grows_on_write() {
        let mut s = MemoryStorage::new();
        assert!(s.is_empty());
        s.write_at(4, &[1, 2]).unwrap();
        assert_eq!(s.as_bytes(), &[0, 0, 0, 0, 1, 2]);
        s.write_at(0, &[9]).unwrap();
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn memory_storage_read_past_end() {
        let mut s = MemoryStorage::from_vec(vec![1, 2, 3]);
        let mut buf = [0u8; 2];
        s.read_at(1, &mut buf).unwrap();
        assert_eq!(buf, [2, 3]);
        let err = s.read_at(2, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn block_store_appends_through_allocator() {
        let mut storage = MemoryStorage::new();
        let mut alloc = FreeSpaceAllocator::new(16);
        let mut io = BlockStore::new(&mut storage, &mut alloc);
        let a = io.append_block(b"abcd").unwrap();
        let b = io.append_block(b"ef").unwrap();
        assert_eq!((a, b), (16, 20));
        assert_eq!(io.read_block(18, 4).unwrap(), b"cdef");
        assert!(matches!(
            io.read_block(20, 4),
            Err(FormatError::UnexpectedEof { .. })
        ));
        assert_eq!(storage.len(), 22);
    }
}
