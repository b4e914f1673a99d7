//! Backend tests against real files.

use h5chunk_format::chunk_index::BlockIo;
use h5chunk_format::error::FormatError;
use h5chunk_io::{BlockStore, FileStorage, FreeSpaceAllocator, MemoryStorage, Storage};

// ---- FileStorage ----

#[test]
fn file_storage_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.bin");
    {
        let mut s = FileStorage::create(&path).unwrap();
        s.write_at(8, &[1, 2, 3]).unwrap();
        s.write_at(0, &[9; 4]).unwrap();
        assert_eq!(s.len(), 11);
        s.flush().unwrap();
    }
    let mut s = FileStorage::open(&path).unwrap();
    assert_eq!(s.len(), 11);
    let mut buf = [0u8; 5];
    s.read_at(6, &mut buf).unwrap();
    assert_eq!(buf, [0, 0, 1, 2, 3]);
    assert!(s.read_at(8, &mut buf).is_err());
}

#[test]
fn block_store_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage = FileStorage::create(dir.path().join("blocks.bin")).unwrap();
    let mut alloc = FreeSpaceAllocator::new(0).with_limit(8);
    let mut io = BlockStore::new(&mut storage, &mut alloc);
    let a = io.append_block(b"HEAD").unwrap();
    assert_eq!(io.read_block(a, 4).unwrap(), b"HEAD");
    assert!(matches!(
        io.append_block(b"too long"),
        Err(FormatError::AllocationExhausted { .. })
    ));
}

// ---- MemoryStorage ----

#[test]
fn memory_storage_behind_trait_object() {
    let mut storage: Box<dyn Storage> = Box::new(MemoryStorage::new());
    let mut alloc = FreeSpaceAllocator::new(0);
    let mut io = BlockStore::new(storage.as_mut(), &mut alloc);
    let addr = io.append_block(&[5; 10]).unwrap();
    io.write_block(addr + 2, &[6]).unwrap();
    assert_eq!(io.read_block(addr, 4).unwrap(), vec![5, 5, 6, 5]);
}

// ---- MmapStorage ----

#[cfg(feature = "mmap")]
#[test]
fn mmap_storage_reads_and_refuses_writes() {
    use h5chunk_io::MmapStorage;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mapped.bin");
    std::fs::write(&path, [1, 2, 3, 4, 5, 6]).unwrap();

    let mut s = MmapStorage::open(&path).unwrap();
    assert_eq!(s.len(), 6);
    assert_eq!(s.slice(3, 3), Some(&[4, 5, 6][..]));
    assert_eq!(s.slice(4, 3), None);

    let mut buf = [0u8; 2];
    s.read_at(1, &mut buf).unwrap();
    assert_eq!(buf, [2, 3]);
    assert_eq!(
        s.write_at(0, &[0]).unwrap_err().kind(),
        std::io::ErrorKind::PermissionDenied
    );
}
