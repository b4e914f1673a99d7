//! Read-only memory-mapped storage.

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use crate::Storage;

/// Read-only storage over a memory-mapped file. Writes fail with
/// [`io::ErrorKind::PermissionDenied`].
pub struct MmapStorage {
    _file: File,
    mmap: Mmap,
}

impl MmapStorage {
    /// Map `path` for reading.
    ///
    /// The file must not be modified by another process while mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: read-only mapping; external modification is excluded by
        // the caller.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Borrow `len` bytes at `offset` without copying.
    pub fn slice(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        self.mmap.get(start..start.checked_add(len)?)
    }
}

impl Storage for MmapStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let src = self.slice(offset, buf.len()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {} bytes at {offset} passes end of mapping", buf.len()),
            )
        })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, _offset: u64, _data: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "memory-mapped storage is read-only",
        ))
    }

    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }
}
