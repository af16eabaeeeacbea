use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use recfile::{DataStore, KeyOrder, RecordIndex};

/// Sorts 16-byte records by the second 8 bytes, then the first.
#[derive(Debug)]
struct Swap;

impl KeyOrder for Swap {
    fn sort_key(&self, record: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(&record[8..16]);
        out.extend_from_slice(&record[0..8]);
    }
}

fn generate_records(n: u64) -> Vec<[u8; 16]> {
    (0..n)
        .map(|i| {
            let mut r = [0u8; 16];
            r[0..8].copy_from_slice(&i.to_be_bytes());
            r[8..16].copy_from_slice(&(i % 97).to_be_bytes());
            r
        })
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_insert");
    for n in [1_000u64, 10_000] {
        let records = generate_records(n);
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &records, |b, records| {
            b.iter(|| {
                let dir = tempfile::tempdir().unwrap();
                let idx =
                    RecordIndex::open(&dir.path().join("b.dat"), 16, Arc::new(Swap), false).unwrap();
                for r in records {
                    idx.insert(r).unwrap();
                }
                idx.sync().unwrap();
            });
        });
    }
    group.finish();
}

fn bench_range_scan(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let idx = RecordIndex::open(&dir.path().join("b.dat"), 16, Arc::new(Swap), false).unwrap();
    for r in generate_records(50_000) {
        idx.insert(&r).unwrap();
    }
    let mut key = [0u8; 16];
    key[8..16].copy_from_slice(&42u64.to_be_bytes());
    let mut mask = [0u8; 16];
    mask[8..16].fill(0xFF);
    let mut max = key;
    max[0..8].fill(0xFF);
    c.bench_function("index_range_scan", |b| {
        b.iter(|| idx.iter_range(&key, &mask, &key, &max).count());
    });
    c.bench_function("index_full_scan", |b| {
        b.iter(|| idx.iter_values(&key, &mask).count());
    });
}

fn bench_datastore(c: &mut Criterion) {
    let values: Vec<String> = (0..10_000).map(|i| format!("http://example.org/v/{i}")).collect();
    c.bench_function("datastore_store_10k", |b| {
        b.iter(|| {
            let dir = tempfile::tempdir().unwrap();
            let ds = DataStore::open(&dir.path().join("v.dat"), false).unwrap();
            for v in &values {
                ds.store(v.as_bytes()).unwrap();
            }
            ds.sync().unwrap();
        });
    });
}

criterion_group!(benches, bench_insert, bench_range_scan, bench_datastore);
criterion_main!(benches);
