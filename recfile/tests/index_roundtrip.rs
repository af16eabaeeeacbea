use std::path::Path;
use std::sync::Arc;

use recfile::{DataStore, Error, KeyOrder, RecordIndex};

/// 6-byte records sorted by bytes 4..6 then 0..4, with no payload.
#[derive(Debug)]
struct TailFirst;

impl KeyOrder for TailFirst {
    fn sort_key(&self, record: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(&record[4..6]);
        out.extend_from_slice(&record[0..4]);
    }
}

fn record(a: u32, b: u16) -> [u8; 6] {
    let mut r = [0u8; 6];
    r[0..4].copy_from_slice(&a.to_be_bytes());
    r[4..6].copy_from_slice(&b.to_be_bytes());
    r
}

fn open(path: &Path) -> RecordIndex {
    RecordIndex::open(path, 6, Arc::new(TailFirst), true).unwrap()
}

#[test]
fn index_survives_reopen_in_sort_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tail.dat");
    {
        let idx = open(&path);
        for a in (0..50u32).rev() {
            idx.insert(&record(a, (a % 3) as u16)).unwrap();
        }
        idx.sync().unwrap();
        idx.close().unwrap();
    }
    let idx = open(&path);
    assert_eq!(idx.len(), 50);
    let tails: Vec<u16> = idx
        .iter_all()
        .map(|r| {
            let r = r.unwrap();
            u16::from_be_bytes([r[4], r[5]])
        })
        .collect();
    let mut sorted = tails.clone();
    sorted.sort();
    assert_eq!(tails, sorted);
}

#[test]
fn unsynced_changes_are_lost_on_revert() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tail.dat");
    let idx = open(&path);
    idx.insert(&record(1, 1)).unwrap();
    idx.sync().unwrap();
    idx.clear().unwrap();
    idx.insert(&record(2, 2)).unwrap();
    idx.revert().unwrap();
    let all: Vec<_> = idx.iter_all().map(|r| r.unwrap()).collect();
    assert_eq!(all, vec![record(1, 1).to_vec()]);
}

#[test]
fn index_file_rejected_as_data_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tail.dat");
    open(&path).close().unwrap();
    match DataStore::open(&path, false) {
        Err(Error::Corrupt(m)) => assert!(m.contains("expected")),
        other => panic!("expected kind mismatch, got {other:?}"),
    }
}

#[test]
fn delete_file_reports_presence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tail.dat");
    open(&path).close().unwrap();
    assert!(RecordIndex::delete_file(&path).unwrap());
    assert!(!RecordIndex::delete_file(&path).unwrap());
}
