use std::sync::Arc;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use rand::seq::SliceRandom;
use rand::{SeedableRng, rngs::StdRng};
use tempfile::TempDir;

use tyrdbs::io::{MemoryReader, MemoryWriter};
use tyrdbs::{Log, Options, OverwriteIterator, Slice, SliceWriter, StorageIterator};

fn key(i: u32) -> Vec<u8> {
    // Fixed-width keys ensure stable ordering.
    format!("k{:08}", i).into_bytes()
}

fn value(i: u32) -> Vec<u8> {
    format!("v{:08}", i).into_bytes()
}

fn build_slice(keys: impl Iterator<Item = u32>, tid: u64) -> Arc<Slice> {
    let mut w = SliceWriter::new(MemoryWriter::new());
    for i in keys {
        w.add(&key(i), &value(i), true, false, 0).expect("add");
    }
    w.flush().expect("flush");
    let reader = MemoryReader::from(w.commit().expect("commit"));
    let size = reader.len();
    Arc::new(Slice::open(reader, size).expect("open").with_tid(tid))
}

fn drain(iter: &mut dyn StorageIterator) -> usize {
    let mut n = 0;
    while iter.next().expect("next") {
        n += 1;
    }
    n
}

fn bench_slice_build(c: &mut Criterion) {
    c.bench_function("slice_build/100k", |b| {
        b.iter(|| build_slice(0..100_000, 1));
    });
}

fn bench_slice_scan(c: &mut Criterion) {
    let slice = build_slice(0..100_000, 1);
    c.bench_function("slice_scan/100k", |b| {
        b.iter(|| drain(&mut slice.begin().expect("begin").expect("non-empty")));
    });
}

fn bench_point_ranges(c: &mut Criterion) {
    let slice = build_slice(0..100_000, 1);
    let mut keys: Vec<u32> = (0..100_000).collect();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    keys.shuffle(&mut rng);
    keys.truncate(10_000);

    c.bench_function("slice_point_range/10k", |b| {
        b.iter(|| {
            for &k in &keys {
                let k = key(k);
                let mut it = slice.range(&k, &k).expect("range").expect("present");
                assert!(it.next().expect("next"));
            }
        });
    });
}

fn bench_overwrite_scan(c: &mut Criterion) {
    // Eight overlapping slices, each rewriting an interleaved subset.
    let slices: Vec<_> = (0..8u32)
        .map(|s| build_slice((0..100_000).filter(move |i| i % 8 == s || i % 3 == 0), s as u64 + 1))
        .collect();

    c.bench_function("overwrite_scan/8x", |b| {
        b.iter(|| drain(&mut OverwriteIterator::new(&slices).expect("merge")));
    });
}

fn bench_log_updates(c: &mut Criterion) {
    c.bench_function("log_update/1k_txn", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().expect("tempdir");
                let log = Log::open(Options::new(dir.path()).ushards(4)).expect("open");
                (dir, log)
            },
            |(_dir, log)| {
                for t in 0..1000u32 {
                    let mut txn = log.transaction();
                    for i in 0..16 {
                        let k = t * 16 + i;
                        txn.put((k % 4) as u16, &key(k), &value(k));
                    }
                    log.update(txn).expect("update");
                }
            },
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(
    benches,
    bench_slice_build,
    bench_slice_scan,
    bench_point_ranges,
    bench_overwrite_scan,
    bench_log_updates
);
criterion_main!(benches);
