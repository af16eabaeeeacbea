use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use nativerdf::{ContextPattern, NativeStore, StoreConfig, StoreError, Term};

fn ex(local: &str) -> Term {
    Term::iri(format!("http://example.org/{local}"))
}

fn open_store(dir: &std::path::Path) -> NativeStore {
    NativeStore::open(StoreConfig::new(dir)).expect("open store")
}

#[test]
fn test_try_begin_fails_while_transaction_active() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let txn = store.begin();
    thread::scope(|scope| {
        scope.spawn(|| {
            let err = store.try_begin().err().expect("transaction lock is held");
            assert!(matches!(err, StoreError::LockAcquisition(_)));
            assert!(store.begin_timeout(Duration::from_millis(20)).is_err());
        });
    });
    txn.commit().unwrap();
    assert!(store.try_begin().is_ok());
}

#[test]
fn test_readers_run_during_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let mut txn = store.begin();
    txn.add_statement(&ex("s"), &ex("p"), &ex("o"), None).unwrap();
    txn.commit().unwrap();

    let barrier = Barrier::new(2);
    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            let mut txn = store.begin();
            for i in 0..50 {
                txn.add_statement(&ex("s"), &ex("p"), &ex(&format!("n{i}")), None).unwrap();
            }
            barrier.wait();
            txn.commit().unwrap();
        });
        barrier.wait();
        let seen = store.size(ContextPattern::Any).unwrap();
        assert!(seen >= 1 && seen <= 51, "unexpected size {seen}");
        writer.join().unwrap();
    });
    assert_eq!(store.size(ContextPattern::Any).unwrap(), 51);
}

#[test]
fn test_transactions_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let active = AtomicBool::new(false);
    thread::scope(|scope| {
        for t in 0..4 {
            let store = &store;
            let active = &active;
            scope.spawn(move || {
                for i in 0..10 {
                    let mut txn = store.begin();
                    assert!(!active.swap(true, Ordering::SeqCst), "two transactions overlapped");
                    txn.add_statement(&ex(&format!("t{t}")), &ex("p"), &ex(&format!("o{i}")), None)
                        .unwrap();
                    active.store(false, Ordering::SeqCst);
                    txn.commit().unwrap();
                }
            });
        }
    });
    assert_eq!(store.size(ContextPattern::Any).unwrap(), 40);
    for t in 0..4 {
        let count = store
            .statements(Some(&ex(&format!("t{t}"))), None, None, ContextPattern::Any, true)
            .unwrap()
            .count();
        assert_eq!(count, 10);
    }
}

#[test]
fn test_value_ids_stable_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let values = store.value_store();
    let ids: Vec<Vec<i32>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    (0..20)
                        .map(|i| values.store_value(&ex(&format!("v{i}"))).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for other in &ids[1..] {
        assert_eq!(other, &ids[0]);
    }
    assert_eq!(values.max_id(), 20);
}

#[test]
fn test_failed_commit_releases_transaction_lock() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::builder()
        .data_dir(dir.path())
        .triple_indexes("spoc,posc")
        .build()
        .unwrap();
    let store = NativeStore::open(config).unwrap();
    let mut txn = store.begin();
    txn.add_statement(&ex("a"), &ex("p"), &ex("b"), None).unwrap();
    txn.commit().unwrap();

    let blocker = dir.path().join("triples-posc.dat.tmp");
    std::fs::create_dir(&blocker).unwrap();
    let mut txn = store.begin();
    txn.add_statement(&ex("c"), &ex("p"), &ex("d"), None).unwrap();
    assert!(txn.commit().is_err());

    let txn = store.try_begin().expect("lock released after failed commit");
    drop(txn);
    let triples = store.triple_store();
    for position in 0..2 {
        assert_eq!(triples.scan_index(position).unwrap().count(), 1);
    }
    assert_eq!(store.size(ContextPattern::Any).unwrap(), 1);

    std::fs::remove_dir(&blocker).unwrap();
    let mut txn = store.try_begin().unwrap();
    txn.add_statement(&ex("c"), &ex("p"), &ex("d"), None).unwrap();
    txn.commit().unwrap();
    assert_eq!(store.size(ContextPattern::Any).unwrap(), 2);
}

#[test]
fn test_open_statement_iterator_delays_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let mut txn = store.begin();
    txn.add_statement(&ex("s"), &ex("p"), &ex("o"), None).unwrap();
    txn.commit().unwrap();

    let committed = AtomicBool::new(false);
    let iter = store
        .statements(None, None, None, ContextPattern::Any, true)
        .unwrap();
    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            let mut txn = store.begin();
            txn.add_statement(&ex("s"), &ex("p"), &ex("o2"), None).unwrap();
            txn.commit().unwrap();
            committed.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(100));
        assert!(!committed.load(Ordering::SeqCst), "commit ran while a reader was open");
        drop(iter);
        writer.join().unwrap();
    });
    assert!(committed.load(Ordering::SeqCst));
    assert_eq!(store.size(ContextPattern::Any).unwrap(), 2);
}
