//! Benchmark: bulk vs per-element chunk transfers, cached vs uncached reads.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use h5chunk::{
    ChunkCacheConfig, Dataset, DatasetAccess, DatasetCreation, Dataspace, ElementKind,
    FreeSpaceAllocator, MemoryStorage, Selection,
};

const ROWS: u64 = 512;
const COLS: u64 = 512;

fn build(access: &DatasetAccess, deflate: bool) -> Dataset<MemoryStorage> {
    let mut creation = DatasetCreation::new().chunk(&[64, 64]);
    if deflate {
        creation = creation.shuffle().deflate(4);
    }
    let mut ds = Dataset::create(
        "bench",
        MemoryStorage::new(),
        FreeSpaceAllocator::new(0),
        Dataspace::simple(&[ROWS, COLS]),
        ElementKind::F64,
        &creation,
        access,
    )
    .unwrap();
    let values: Vec<f64> = (0..ROWS * COLS).map(|i| i as f64 * 0.001).collect();
    ds.write(&values).unwrap();
    ds.flush().unwrap();
    ds
}

fn bench_copy_modes(c: &mut Criterion) {
    let window = Selection::slice(&[100..400, 30..500]);
    for (label, bulk) in [("bulk", true), ("per-element", false)] {
        let mut ds = build(&DatasetAccess::new().bulk_copy(bulk), false);
        c.bench_function(&format!("read 300x470 window ({label})"), |b| {
            b.iter(|| ds.read_slice::<f64>(black_box(&window)).unwrap())
        });
    }
}

fn bench_cache(c: &mut Criterion) {
    let column = Selection::slice(&[0..ROWS, 7..8]);
    let cached = DatasetAccess::new().cache(ChunkCacheConfig::new(128, 8 << 20).unwrap());
    let uncached = DatasetAccess::new().cache(ChunkCacheConfig::disabled());
    for (label, access) in [("cached", cached), ("uncached", uncached)] {
        let mut ds = build(&access, true);
        c.bench_function(&format!("read deflated column ({label})"), |b| {
            b.iter(|| ds.read_slice::<f64>(black_box(&column)).unwrap())
        });
    }
}

criterion_group!(benches, bench_copy_modes, bench_cache);
criterion_main!(benches);
