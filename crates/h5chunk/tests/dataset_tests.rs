//! End-to-end tests for chunked dataset reads, writes and commits.

use h5chunk::h5chunk_format::chunk_index::ChunkIndexEntry;
use h5chunk::{
    ByteOrder, ChunkCacheConfig, ChunkIndexKind, DataLayout, Dataset, DatasetAccess,
    DatasetCreation, DatasetDescriptor, Dataspace, DecodedObject, ElementKind, Error,
    FileStorage, FormatError, FreeSpaceAllocator, MemoryStorage, ObjectEncoder, ObjectGraph,
    Selection, Storage, UNLIMITED,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn access(slots: usize, budget: usize) -> DatasetAccess {
    DatasetAccess::new().cache(ChunkCacheConfig::new(slots, budget).unwrap())
}

fn create_mem(
    space: Dataspace,
    kind: ElementKind,
    creation: &DatasetCreation,
    access: &DatasetAccess,
) -> Dataset<MemoryStorage> {
    Dataset::create(
        "data",
        MemoryStorage::new(),
        FreeSpaceAllocator::new(0),
        space,
        kind,
        creation,
        access,
    )
    .unwrap()
}

/// Commit, then reopen over the same bytes.
fn reopen(
    mut ds: Dataset<MemoryStorage>,
    access: &DatasetAccess,
) -> (Dataset<MemoryStorage>, DatasetDescriptor) {
    let desc = ds.commit().unwrap();
    let (storage, alloc) = ds.into_parts();
    let ds = Dataset::open("data", storage, alloc, &desc, access).unwrap();
    (ds, desc)
}

// ---------------------------------------------------------------------------
// Cache behavior
// ---------------------------------------------------------------------------

#[test]
fn full_pass_leaves_last_two_chunks_cached() {
    let mut ds = create_mem(
        Dataspace::simple(&[10]),
        ElementKind::I32,
        &DatasetCreation::new().chunk(&[4]),
        &access(2, 100),
    );
    let values: Vec<i32> = (0..10).collect();
    ds.write(&values).unwrap();
    // chunk 0 was pushed out (and stored) when chunk 2 came in
    assert_eq!(ds.cached_chunks(), vec![1, 2]);
    assert_eq!(ds.cache_stats().evictions, 1);

    assert_eq!(ds.read::<i32>().unwrap(), values);
    assert_eq!(ds.cached_chunks(), vec![1, 2]);
    assert_eq!(ds.cache_stats().evictions, 4);
}

#[test]
fn least_recently_used_chunk_is_evicted() {
    let mut ds = create_mem(
        Dataspace::simple(&[16]),
        ElementKind::U8,
        &DatasetCreation::new().chunk(&[4]),
        &access(2, 100),
    );
    ds.write(&[5u8; 16]).unwrap();
    ds.flush().unwrap();

    let chunk = |i: u64| Selection::slice(&[i * 4..i * 4 + 4]);
    for i in 0..3 {
        ds.read_slice::<u8>(&chunk(i)).unwrap();
    }
    assert_eq!(ds.cached_chunks(), vec![1, 2]);

    // A comes back and displaces B
    ds.read_slice::<u8>(&chunk(0)).unwrap();
    assert_eq!(ds.cached_chunks(), vec![0, 2]);

    // the next new chunk displaces C
    ds.read_slice::<u8>(&chunk(3)).unwrap();
    assert_eq!(ds.cached_chunks(), vec![0, 3]);
}

#[test]
fn oversized_chunks_are_never_retained() {
    let mut ds = create_mem(
        Dataspace::simple(&[64]),
        ElementKind::U64,
        &DatasetCreation::new().chunk(&[32]),
        &access(8, 100),
    );
    let values: Vec<u64> = (0..64).collect();
    ds.write(&values).unwrap();
    assert!(ds.cached_chunks().is_empty());
    assert_eq!(ds.read::<u64>().unwrap(), values);
    assert!(ds.cached_chunks().is_empty());
}

// ---------------------------------------------------------------------------
// Edge chunks and fill
// ---------------------------------------------------------------------------

#[test]
fn edge_chunk_holds_fill_past_the_extent() {
    let mut ds = create_mem(
        Dataspace::simple(&[10]),
        ElementKind::U8,
        &DatasetCreation::new().chunk(&[4]),
        &DatasetAccess::new(),
    );
    ds.write(&[1u8; 10]).unwrap();
    assert_eq!(ds.cached_chunk(2), Some(&[1u8, 1, 0, 0][..]));
    assert_eq!(ds.read::<u8>().unwrap(), vec![1u8; 10]);
}

#[test]
fn partial_write_preserves_neighbors() {
    let creation = DatasetCreation::new()
        .chunk(&[3, 3])
        .deflate(6)
        .fill_value(&(-1i16).to_le_bytes());
    let mut ds = create_mem(
        Dataspace::simple(&[5, 5]),
        ElementKind::I16,
        &creation,
        &access(0, 0),
    );
    ds.write_slice(&Selection::slice(&[1..4, 1..4]), &[7i16; 9]).unwrap();
    ds.write_slice(&Selection::slice(&[2..3, 0..5]), &[3i16; 5]).unwrap();

    let got = ds.read::<i16>().unwrap();
    let mut expected = vec![-1i16; 25];
    for r in 1..4 {
        for c in 1..4 {
            expected[r * 5 + c] = 7;
        }
    }
    for c in 0..5 {
        expected[10 + c] = 3;
    }
    assert_eq!(got, expected);
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[test]
fn every_filter_combination_roundtrips() {
    let values: Vec<i32> = (0..63).map(|i| (i % 7) * 1000).collect();
    for bits in 0u8..8 {
        for skip_edges in [false, true] {
            let mut creation = DatasetCreation::new().chunk(&[4, 4]);
            if bits & 1 != 0 {
                creation = creation.shuffle();
            }
            if bits & 2 != 0 {
                creation = creation.deflate(5);
            }
            if bits & 4 != 0 {
                creation = creation.fletcher32();
            }
            if skip_edges {
                creation = creation.skip_edge_chunk_filters();
            }
            let mut ds = create_mem(
                Dataspace::simple(&[9, 7]),
                ElementKind::I32,
                &creation,
                &DatasetAccess::new(),
            );
            ds.write(&values).unwrap();
            let (mut ds, _) = reopen(ds, &DatasetAccess::new());
            assert_eq!(ds.read::<i32>().unwrap(), values, "filters {bits:03b}");

            let filters = bits.count_ones();
            if skip_edges && filters > 0 {
                let entry = ds.chunk_entry(&[2, 1]).unwrap();
                assert_eq!(entry.stored_size, 64);
                assert_eq!(entry.filter_mask, (1 << filters) - 1);
            }
        }
    }
}

#[test]
fn corrupted_chunk_fails_only_its_own_read() {
    let creation = DatasetCreation::new().chunk(&[4]).fletcher32();
    let mut ds = create_mem(
        Dataspace::simple(&[8]),
        ElementKind::U8,
        &creation,
        &DatasetAccess::new(),
    );
    ds.write(&[1u8, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    let desc = ds.commit().unwrap();
    let address = ds.chunk_entry(&[1]).unwrap().address.unwrap();

    let (storage, alloc) = ds.into_parts();
    let mut bytes = storage.into_inner();
    bytes[address as usize] ^= 0x40;
    let mut ds = Dataset::open(
        "data",
        MemoryStorage::from_vec(bytes),
        alloc,
        &desc,
        &DatasetAccess::new(),
    )
    .unwrap();

    assert_eq!(
        ds.read_slice::<u8>(&Selection::slice(&[0..4])).unwrap(),
        vec![1, 2, 3, 4]
    );
    match ds.read::<u8>().unwrap_err() {
        Error::Chunk { coord, source, .. } => {
            assert_eq!(coord, vec![1]);
            assert!(matches!(source, FormatError::ChecksumMismatch { .. }));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn failed_store_keeps_evicted_chunks() {
    let mut ds = Dataset::create(
        "data",
        MemoryStorage::new(),
        FreeSpaceAllocator::new(0).with_limit(4),
        Dataspace::simple(&[12]),
        ElementKind::U8,
        &DatasetCreation::new()
            .chunk(&[4])
            .index_kind(ChunkIndexKind::FixedArray),
        &access(1, 1024),
    )
    .unwrap();
    let chunk = |i: u64| Selection::slice(&[i * 4..i * 4 + 4]);

    ds.write_slice(&chunk(0), &[1u8; 4]).unwrap();
    // chunk 0 is evicted and stored, using up the space
    ds.write_slice(&chunk(1), &[2u8; 4]).unwrap();
    match ds.write_slice(&chunk(2), &[3u8; 4]).unwrap_err() {
        Error::Chunk { coord, source, .. } => {
            assert_eq!(coord, vec![1]);
            assert!(matches!(source, FormatError::AllocationExhausted { .. }));
        }
        other => panic!("unexpected error {other}"),
    }

    assert_eq!(ds.dirty_chunks(), 2);
    assert!(ds.chunk_entry(&[0]).unwrap().is_allocated());
    assert!(!ds.chunk_entry(&[1]).unwrap().is_allocated());
    assert_eq!(ds.read_slice::<u8>(&chunk(1)).unwrap(), vec![2; 4]);
    assert_eq!(ds.read_slice::<u8>(&chunk(2)).unwrap(), vec![3; 4]);
    assert!(ds.commit().is_err());

    ds.allocator_mut().set_limit(None);
    let (mut ds, _) = reopen(ds, &access(1, 1024));
    let mut expected = vec![1u8; 4];
    expected.extend([2u8; 4]);
    expected.extend([3u8; 4]);
    assert_eq!(ds.read::<u8>().unwrap(), expected);
}

// ---------------------------------------------------------------------------
// Chunk index variants
// ---------------------------------------------------------------------------

fn index_roundtrip(space: Dataspace, creation: DatasetCreation, expected: ChunkIndexKind) {
    let fill = u32::MAX;
    let creation = creation.fill_value(&fill.to_le_bytes());
    let n = space.num_elements() as usize;
    let rows = space.dims[0];
    let cols = space.dims[1];

    let mut ds = create_mem(space, ElementKind::U32, &creation, &DatasetAccess::new());
    assert_eq!(ds.index_kind(), expected);
    let half = rows / 2;
    let first: Vec<u32> = (0..(half * cols) as u32).collect();
    ds.write_slice(&Selection::slice(&[0..half, 0..cols]), &first).unwrap();

    let (mut ds, desc) = reopen(ds, &DatasetAccess::new());
    match &desc.layout {
        DataLayout::Chunked { index, .. } => assert_eq!(index.kind(), expected),
        DataLayout::Contiguous { .. } => assert_eq!(expected, ChunkIndexKind::Implicit),
        DataLayout::Compact { .. } => panic!("compact layout"),
    }
    let mut expected_values = vec![fill; n];
    expected_values[..first.len()].copy_from_slice(&first);
    assert_eq!(ds.read::<u32>().unwrap(), expected_values, "{expected:?}");

    // grow the written region after reopening
    let second: Vec<u32> = (0..((rows - half) * cols) as u32).map(|v| v + 1000).collect();
    ds.write_slice(&Selection::slice(&[half..rows, 0..cols]), &second).unwrap();
    let (mut ds, _) = reopen(ds, &DatasetAccess::new());
    expected_values[first.len()..].copy_from_slice(&second);
    assert_eq!(ds.read::<u32>().unwrap(), expected_values, "{expected:?}");
}

#[test]
fn implicit_index_reopens() {
    index_roundtrip(
        Dataspace::simple(&[20, 6]),
        DatasetCreation::new().chunk(&[4, 3]),
        ChunkIndexKind::Implicit,
    );
}

#[test]
fn single_chunk_index_reopens() {
    index_roundtrip(
        Dataspace::simple(&[5, 6]),
        DatasetCreation::new().chunk(&[5, 6]).deflate(3),
        ChunkIndexKind::SingleChunk,
    );
}

#[test]
fn fixed_array_index_reopens() {
    index_roundtrip(
        Dataspace::simple(&[20, 6]),
        DatasetCreation::new().chunk(&[4, 3]).deflate(3),
        ChunkIndexKind::FixedArray,
    );
}

#[test]
fn extensible_array_index_reopens() {
    index_roundtrip(
        Dataspace::with_max_dims(&[20, 6], &[UNLIMITED, 6]),
        DatasetCreation::new().chunk(&[2, 3]).shuffle(),
        ChunkIndexKind::ExtensibleArray,
    );
}

#[test]
fn btree_v2_index_reopens() {
    index_roundtrip(
        Dataspace::with_max_dims(&[20, 6], &[20, UNLIMITED]),
        DatasetCreation::new().chunk(&[4, 3]).deflate(3).fletcher32(),
        ChunkIndexKind::BTreeV2,
    );
}

#[test]
fn btree_v1_index_reopens() {
    index_roundtrip(
        Dataspace::simple(&[20, 6]),
        DatasetCreation::new()
            .chunk(&[2, 2])
            .shuffle()
            .deflate(1)
            .index_kind(ChunkIndexKind::BTreeV1)
            .btree_node_capacity(4),
        ChunkIndexKind::BTreeV1,
    );
}

#[test]
fn contiguous_dataset_reopens() {
    index_roundtrip(
        Dataspace::simple(&[7, 3]),
        DatasetCreation::new(),
        ChunkIndexKind::Implicit,
    );
}

#[test]
fn implicit_index_rejects_filters() {
    let result = Dataset::create(
        "data",
        MemoryStorage::new(),
        FreeSpaceAllocator::new(0),
        Dataspace::simple(&[16]),
        ElementKind::U8,
        &DatasetCreation::new()
            .chunk(&[4])
            .deflate(1)
            .index_kind(ChunkIndexKind::Implicit),
        &DatasetAccess::new(),
    );
    let err = result.err().unwrap();
    assert!(matches!(
        err.format_error(),
        Some(FormatError::UnsupportedLayout(_))
    ));
}

#[test]
fn compact_layout_is_unsupported() {
    let desc = DatasetDescriptor {
        space: Dataspace::simple(&[4]),
        kind: ElementKind::U8,
        byte_order: ByteOrder::LittleEndian,
        layout: DataLayout::Compact {
            data: vec![1, 2, 3, 4],
        },
        pipeline: Default::default(),
        fill_value: vec![0],
        filter_edge_chunks: true,
    };
    let result = Dataset::open(
        "data",
        MemoryStorage::new(),
        FreeSpaceAllocator::new(0),
        &desc,
        &DatasetAccess::new(),
    );
    assert!(matches!(
        result.err().unwrap().format_error(),
        Some(FormatError::UnsupportedLayout(_))
    ));
}

#[test]
fn unwritten_chunks_stay_unallocated_across_commit() {
    let creation = DatasetCreation::new().chunk(&[4]).deflate(1);
    let mut ds = create_mem(
        Dataspace::simple(&[16]),
        ElementKind::U8,
        &creation,
        &DatasetAccess::new(),
    );
    ds.write_slice(&Selection::slice(&[4..8]), &[9u8; 4]).unwrap();
    let (ds, _) = reopen(ds, &DatasetAccess::new());
    assert_eq!(ds.chunk_entry(&[0]).unwrap(), ChunkIndexEntry::UNALLOCATED);
    assert!(ds.chunk_entry(&[1]).unwrap().is_allocated());
}

// ---------------------------------------------------------------------------
// Selections
// ---------------------------------------------------------------------------

fn grid_6x6() -> Dataset<MemoryStorage> {
    let creation = DatasetCreation::new()
        .chunk(&[4, 4])
        .fill_value(&9u16.to_le_bytes());
    let mut ds = create_mem(
        Dataspace::simple(&[6, 6]),
        ElementKind::U16,
        &creation,
        &DatasetAccess::new().bulk_copy(false),
    );
    let values: Vec<u16> = (0..36).collect();
    ds.write(&values).unwrap();
    ds
}

#[test]
fn read_into_strided_memory() {
    let mut ds = grid_6x6();
    // file rows 1..3 land on memory rows 0 and 2 of a 4 x 6 buffer
    let memory_sel = Selection::hyperslab(&[0, 0], &[2, 1], &[2, 1], &[1, 6]);
    let raw = ds
        .read_selection(
            Some(&Selection::slice(&[1..3, 0..6])),
            Some(&memory_sel),
            Some(&[4, 6]),
        )
        .unwrap();
    let got: Vec<u16> = raw
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    let mut expected = vec![9u16; 24];
    for c in 0..6 {
        expected[c] = 6 + c as u16;
        expected[12 + c] = 12 + c as u16;
    }
    assert_eq!(got, expected);
}

#[test]
fn point_selection_keeps_order() {
    let mut ds = grid_6x6();
    let points = Selection::Points(vec![vec![5, 5], vec![0, 0], vec![2, 3]]);
    assert_eq!(ds.read_slice::<u16>(&points).unwrap(), vec![35, 0, 15]);

    ds.write_slice(&points, &[100u16, 200, 300]).unwrap();
    assert_eq!(ds.read_slice::<u16>(&points).unwrap(), vec![100, 200, 300]);
}

#[test]
fn mismatched_counts_are_rejected() {
    let mut ds = grid_6x6();
    let err = ds
        .read_selection(Some(&Selection::slice(&[0..2, 0..6])), None, Some(&[5]))
        .unwrap_err();
    assert!(matches!(
        err.format_error(),
        Some(FormatError::SelectionCountMismatch {
            file: 12,
            memory: 5
        })
    ));
}

#[test]
fn out_of_bounds_selection_is_rejected() {
    let mut ds = grid_6x6();
    let err = ds.read_slice::<u16>(&Selection::slice(&[0..7, 0..1])).unwrap_err();
    assert!(matches!(
        err.format_error(),
        Some(FormatError::SelectionOutOfBounds { dim: 0, .. })
    ));
}

// ---------------------------------------------------------------------------
// Element kinds
// ---------------------------------------------------------------------------

#[test]
fn big_endian_elements_are_swapped() {
    let creation = DatasetCreation::new().byte_order(ByteOrder::BigEndian);
    let mut ds = create_mem(
        Dataspace::simple(&[3]),
        ElementKind::U32,
        &creation,
        &DatasetAccess::new(),
    );
    ds.write(&[1u32, 2, 0x0102_0304]).unwrap();
    let raw = ds.read_selection(None, None, None).unwrap();
    assert_eq!(raw, vec![0, 0, 0, 1, 0, 0, 0, 2, 1, 2, 3, 4]);
    assert_eq!(ds.read::<u32>().unwrap(), vec![1, 2, 0x0102_0304]);
}

#[test]
fn opaque_elements_use_raw_transfers() {
    let mut ds = create_mem(
        Dataspace::simple(&[4]),
        ElementKind::Opaque(3),
        &DatasetCreation::new().chunk(&[2]),
        &DatasetAccess::new(),
    );
    let data: Vec<u8> = (0..12).collect();
    ds.write_selection(&data, None, None, None).unwrap();
    assert_eq!(ds.read_selection(None, None, None).unwrap(), data);
    assert!(matches!(ds.read::<u8>(), Err(Error::TypeMismatch { .. })));
}

#[test]
fn scalar_dataset_holds_one_element() {
    let mut ds = create_mem(
        Dataspace::scalar(),
        ElementKind::F64,
        &DatasetCreation::new(),
        &DatasetAccess::new(),
    );
    ds.write(&[2.5f64]).unwrap();
    let (mut ds, _) = reopen(ds, &DatasetAccess::new());
    assert_eq!(ds.read::<f64>().unwrap(), vec![2.5]);
}

// ---------------------------------------------------------------------------
// Storage backends and structure
// ---------------------------------------------------------------------------

#[test]
fn file_backed_dataset_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunks.bin");
    let values: Vec<f32> = (0..200).map(|i| i as f32 * 0.5).collect();

    let desc = {
        let storage = FileStorage::create(&path).unwrap();
        let mut ds = Dataset::create(
            "series",
            storage,
            FreeSpaceAllocator::new(0),
            Dataspace::simple(&[200]),
            ElementKind::F32,
            &DatasetCreation::new().chunk(&[64]).shuffle().deflate(6),
            &DatasetAccess::new(),
        )
        .unwrap();
        ds.write(&values).unwrap();
        ds.commit().unwrap()
    };

    let storage = FileStorage::open(&path).unwrap();
    let alloc = FreeSpaceAllocator::new(storage.len());
    let mut ds = Dataset::open("series", storage, alloc, &desc, &DatasetAccess::new()).unwrap();
    assert_eq!(ds.read::<f32>().unwrap(), values);
}

#[test]
fn object_graph_shares_datasets_and_reopens_them() {
    let mut storage = MemoryStorage::new();
    let mut alloc = FreeSpaceAllocator::new(0);

    let mut descriptors = Vec::new();
    for (name, scale) in [("a", 1i64), ("b", -1)] {
        let mut ds = Dataset::create(
            name,
            &mut storage,
            alloc,
            Dataspace::simple(&[12]),
            ElementKind::I64,
            &DatasetCreation::new().chunk(&[5]).deflate(2),
            &DatasetAccess::new(),
        )
        .unwrap();
        let values: Vec<i64> = (0..12).map(|v| v * scale).collect();
        ds.write(&values).unwrap();
        descriptors.push(ds.commit().unwrap());
        alloc = ds.into_parts().1;
    }

    let mut graph = ObjectGraph::new();
    let root = graph.add_group();
    let a = graph.add_dataset(descriptors[0].clone());
    let b = graph.add_dataset(descriptors[1].clone());
    graph.link(root, "a", a).unwrap();
    graph.link(root, "b", b).unwrap();
    graph.link(root, "alias", a).unwrap();

    let root_addr = ObjectEncoder::new(&mut storage, &mut alloc)
        .encode(&graph, root)
        .unwrap();

    let DecodedObject::Group(links) = h5chunk::read_object(&mut storage, root_addr).unwrap()
    else {
        panic!("root is not a group");
    };
    assert_eq!(links.len(), 3);
    assert_eq!(links[0].1, links[2].1);
    assert_ne!(links[0].1, links[1].1);

    let DecodedObject::Dataset(desc) = h5chunk::read_object(&mut storage, links[1].1).unwrap()
    else {
        panic!("b is not a dataset");
    };
    assert_eq!(*desc, descriptors[1]);
    let mut ds = Dataset::open("b", &mut storage, alloc, &desc, &DatasetAccess::new()).unwrap();
    let expected: Vec<i64> = (0..12).map(|v| -v).collect();
    assert_eq!(ds.read::<i64>().unwrap(), expected);
}

#[test]
fn commit_is_repeatable() {
    let mut ds = create_mem(
        Dataspace::simple(&[8]),
        ElementKind::U8,
        &DatasetCreation::new().chunk(&[4]).deflate(1),
        &DatasetAccess::new(),
    );
    ds.write(&[3u8; 8]).unwrap();
    let first = ds.commit().unwrap();
    let used = ds.storage().len();
    let second = ds.commit().unwrap();
    assert_eq!(first, second);
    // nothing changed, so nothing new was written
    assert_eq!(ds.storage().len(), used);
}
