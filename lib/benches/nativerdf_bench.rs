use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use nativerdf::codec::{EncodedTerm, QuadPattern, QuadRecord};
use nativerdf::consts::WILDCARD;
use nativerdf::{ContextPattern, NativeStore, StoreConfig, Term, TripleStore};

fn bench_record_codec(c: &mut Criterion) {
    let record = QuadRecord::new(12, 345, 6789, 0, true);
    c.bench_function("quad_record_encode_decode", |b| {
        b.iter(|| QuadRecord::decode(&black_box(record).encode()).unwrap())
    });
    let literal = EncodedTerm::Literal {
        label: "a moderately long literal value".into(),
        datatype_id: 0,
        language: Some("en".into()),
    };
    c.bench_function("literal_encode", |b| b.iter(|| black_box(&literal).encode().unwrap()));
}

fn bench_pattern_scan(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path(), "spoc,posc", false).unwrap();
    for s in 1..=200 {
        for p in 1..=10 {
            store.store_triple(s, 1000 + p, s * p, 0, true).unwrap();
        }
    }
    store.commit().unwrap();

    let mut group = c.benchmark_group("triple_scan");
    let patterns = [
        ("subject", QuadPattern::new(42, WILDCARD, WILDCARD, WILDCARD)),
        ("predicate", QuadPattern::new(WILDCARD, 1003, WILDCARD, WILDCARD)),
        ("object", QuadPattern::new(WILDCARD, WILDCARD, 84, WILDCARD)),
    ];
    for (name, pattern) in patterns {
        group.bench_with_input(BenchmarkId::from_parameter(name), &pattern, |b, pattern| {
            b.iter(|| store.get_triples(pattern).unwrap().count())
        });
    }
    group.finish();
}

fn bench_add_statements(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_statements");
    let n = 500u64;
    group.throughput(Throughput::Elements(n));
    group.sample_size(10);
    group.bench_function("commit_500", |b| {
        b.iter(|| {
            let dir = tempfile::tempdir().unwrap();
            let store = NativeStore::open(StoreConfig::new(dir.path())).unwrap();
            let mut txn = store.begin();
            let pred = Term::iri("http://example.org/value");
            for i in 0..n {
                txn.add_statement(
                    &Term::iri(format!("http://example.org/item/{i}")),
                    &pred,
                    &Term::literal(i.to_string()),
                    None,
                )
                .unwrap();
            }
            txn.commit().unwrap();
            assert_eq!(store.size(ContextPattern::Any).unwrap(), n as usize);
        })
    });
    group.finish();
}

criterion_group!(benches, bench_record_codec, bench_pattern_scan, bench_add_statements);
criterion_main!(benches);
