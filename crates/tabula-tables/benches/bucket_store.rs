use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use tabula_tables::{
    Cell, ColumnKind, ColumnLayout, DataType, IncrementalStore, Scalar, StorageManager,
};

fn bench_rows() -> u64 {
    std::env::var("TABULA_BUCKET_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<u64>().ok())
        .filter(|&v| (1_000..=10_000_000).contains(&v))
        .unwrap_or(100_000)
}

fn store(bucket_size: usize) -> IncrementalStore {
    IncrementalStore::new(
        bucket_size,
        vec![
            ColumnLayout::new(DataType::Int32, ColumnKind::Scalar),
            ColumnLayout::new(DataType::Double, ColumnKind::Scalar),
        ],
    )
    .unwrap()
}

/// Slowly varying values, the case the run-length layout is meant for.
fn fill_sequential(rows: u64, bucket_size: usize) -> IncrementalStore {
    let mut store = store(bucket_size);
    store.add_rows(rows).unwrap();
    for row in 0..rows {
        store
            .put(0, row, &Cell::Scalar(Scalar::Int32((row / 64) as i32)))
            .unwrap();
    }
    store
}

fn bench_bucket_store(c: &mut Criterion) {
    let rows = bench_rows();

    let mut group = c.benchmark_group("bucket_store");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for bucket_size in [4096usize, 32768] {
        group.bench_with_input(
            BenchmarkId::new("sequential_put", bucket_size),
            &bucket_size,
            |b, &bucket_size| {
                b.iter(|| black_box(fill_sequential(rows, bucket_size).bucket_count()))
            },
        );
    }

    group.bench_with_input(BenchmarkId::new("scattered_put", rows), &rows, |b, &rows| {
        b.iter(|| {
            let mut store = store(4096);
            store.add_rows(rows).unwrap();
            let mut row = 1u64;
            for step in 0..rows {
                row = (row * 48_271 + 11) % rows;
                store
                    .put(1, row, &Cell::Scalar(Scalar::Double((step % 97) as f64)))
                    .unwrap();
            }
            black_box(store.bucket_count())
        })
    });

    let filled = fill_sequential(rows, 32768);
    let all: Vec<u64> = (0..rows).collect();
    group.bench_with_input(BenchmarkId::new("read_column", rows), &rows, |b, _| {
        b.iter(|| black_box(filled.get_rows(0, &all).unwrap().len()))
    });

    group.bench_with_input(BenchmarkId::new("append_rows", rows), &rows, |b, &rows| {
        b.iter(|| {
            let mut store = store(4096);
            for row in 0..rows.min(20_000) {
                store.add_rows(1).unwrap();
                store
                    .put(0, row, &Cell::Scalar(Scalar::Int32(row as i32)))
                    .unwrap();
            }
            black_box(store.bucket_count())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_bucket_store);
criterion_main!(benches);
