use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use nativerdf::consts::WILDCARD;
use nativerdf::{
    CacheSizes, ChangeEvent, ContextPattern, NativeStore, QuadPattern, QuadRecord, Statement,
    StoreConfig, StoreError, StoreListener, Term, TripleStore, ValueStore,
};
use nativerdf::locks::LockManager;

fn ex(local: &str) -> Term {
    Term::iri(format!("http://example.org/{local}"))
}

fn open_store(dir: &std::path::Path) -> NativeStore {
    let _ = env_logger::builder().is_test(true).try_init();
    NativeStore::open(StoreConfig::new(dir)).expect("open store")
}

fn collect(store: &NativeStore, subj: Option<&Term>, ctx: ContextPattern<'_>) -> Vec<Statement> {
    store
        .statements(subj, None, None, ctx, true)
        .expect("scan")
        .collect::<nativerdf::Result<Vec<_>>>()
        .expect("statements")
}

#[test]
fn test_store_find_remove_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let values = ValueStore::open(
        dir.path(),
        false,
        CacheSizes::default(),
        Arc::new(LockManager::new()),
    )
    .unwrap();
    let triples = TripleStore::open(dir.path(), "spoc,posc", false).unwrap();

    let s1 = values.store_value(&ex("s1")).unwrap();
    let p1 = values.store_value(&ex("p1")).unwrap();
    let o1 = values.store_value(&ex("o1")).unwrap();

    assert!(triples.store_triple(s1, p1, o1, 0, true).unwrap());
    let pattern = QuadPattern::new(s1, WILDCARD, WILDCARD, WILDCARD);
    let found: Vec<QuadRecord> = triples
        .get_triples(&pattern)
        .unwrap()
        .collect::<nativerdf::Result<_>>()
        .unwrap();
    assert_eq!(found, vec![QuadRecord::new(s1, p1, o1, 0, true)]);
    assert_eq!(values.get_value(found[0].subj).unwrap().unwrap(), ex("s1"));

    assert_eq!(triples.remove_triples(&pattern).unwrap(), 1);
    assert_eq!(triples.get_triples(&pattern).unwrap().count(), 0);
}

#[test]
fn test_duplicate_insert_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let triples = TripleStore::open(dir.path(), "", false).unwrap();
    assert!(triples.store_triple(1, 2, 3, 4, true).unwrap());
    assert!(!triples.store_triple(1, 2, 3, 4, true).unwrap());
    assert_eq!(triples.count_triples(&QuadPattern::new(1, 2, 3, 4)).unwrap(), 1);
}

#[test]
fn test_indexes_agree_after_mixed_operations() {
    let dir = tempfile::tempdir().unwrap();
    let triples = TripleStore::open(dir.path(), "spoc,posc,ospc,cspo", false).unwrap();
    for s in 1..=6 {
        for p in 1..=3 {
            triples.store_triple(s, p + 10, s * p + 20, s % 3, p % 2 == 0).unwrap();
        }
    }
    triples.remove_triples(&QuadPattern::new(WILDCARD, 12, WILDCARD, WILDCARD)).unwrap();
    triples.remove_triples(&QuadPattern::new(4, WILDCARD, WILDCARD, WILDCARD)).unwrap();
    triples.store_triple(4, 11, 99, 0, false).unwrap();
    triples.sync().unwrap();

    let mut reference: Vec<QuadRecord> = triples
        .scan_index(0)
        .unwrap()
        .collect::<nativerdf::Result<_>>()
        .unwrap();
    reference.sort_by_key(|q| (q.subj, q.pred, q.obj, q.ctx));
    assert_eq!(reference.len(), 5 * 2 + 1);
    for position in 1..4 {
        let mut other: Vec<QuadRecord> = triples
            .scan_index(position)
            .unwrap()
            .collect::<nativerdf::Result<_>>()
            .unwrap();
        other.sort_by_key(|q| (q.subj, q.pred, q.obj, q.ctx));
        assert_eq!(other, reference, "index {position} disagrees");
    }
}

#[test]
fn test_transaction_commit_and_query() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let graph = ex("graph");
    let mut txn = store.begin();
    assert!(txn.add_statement(&ex("alice"), &ex("knows"), &ex("bob"), None).unwrap());
    assert!(txn
        .add_statement(&ex("alice"), &ex("name"), &Term::lang_literal("Alice", "en"), Some(&graph))
        .unwrap());
    assert!(!txn.add_statement(&ex("alice"), &ex("knows"), &ex("bob"), None).unwrap());
    txn.commit().unwrap();

    assert_eq!(store.size(ContextPattern::Any).unwrap(), 2);
    assert_eq!(store.size(ContextPattern::DefaultGraph).unwrap(), 1);
    assert_eq!(store.size(ContextPattern::Named(&graph)).unwrap(), 1);
    assert_eq!(store.size(ContextPattern::Named(&ex("nowhere"))).unwrap(), 0);

    let named = collect(&store, Some(&ex("alice")), ContextPattern::Named(&graph));
    assert_eq!(named.len(), 1);
    assert_eq!(named[0].object, Term::lang_literal("Alice", "en"));
    assert_eq!(named[0].context.as_ref().map(|c| c.term().clone()), Some(graph.clone()));
    assert!(named[0].explicit);
    assert!(named[0].subject.stamp().is_some());

    assert!(collect(&store, Some(&ex("unknown")), ContextPattern::Any).is_empty());
    let contexts = store.contexts().unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0], graph);
}

#[test]
fn test_statements_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(dir.path());
        let mut txn = store.begin();
        txn.add_statement(&ex("s"), &ex("p"), &Term::literal("o"), None).unwrap();
        txn.commit().unwrap();
        store.close().unwrap();
    }
    let store = open_store(dir.path());
    let all = collect(&store, None, ContextPattern::Any);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].to_string(), "<http://example.org/s> <http://example.org/p> \"o\" .");
}

#[test]
fn test_rollback_and_drop_discard_changes() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let mut txn = store.begin();
    txn.add_statement(&ex("kept"), &ex("p"), &ex("o"), None).unwrap();
    txn.commit().unwrap();

    let mut txn = store.begin();
    txn.add_statement(&ex("rolled"), &ex("p"), &ex("o"), None).unwrap();
    txn.remove_statements(Some(&ex("kept")), None, None, ContextPattern::Any).unwrap();
    txn.rollback().unwrap();
    assert_eq!(store.size(ContextPattern::Any).unwrap(), 1);

    {
        let mut txn = store.begin();
        txn.add_statement(&ex("dropped"), &ex("p"), &ex("o"), None).unwrap();
    }
    let all = collect(&store, None, ContextPattern::Any);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].subject, ex("kept"));
}

#[test]
fn test_inferred_statements() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let mut txn = store.begin();
    txn.add_inferred_statement(&ex("a"), &ex("type"), &ex("Thing"), None).unwrap();
    txn.add_statement(&ex("b"), &ex("type"), &ex("Thing"), None).unwrap();
    // explicit wins over inferred
    txn.add_inferred_statement(&ex("b"), &ex("type"), &ex("Thing"), None).unwrap();
    txn.commit().unwrap();

    let explicit_only: Vec<_> = store
        .statements(None, None, None, ContextPattern::Any, false)
        .unwrap()
        .map(|s| s.unwrap())
        .collect();
    assert_eq!(explicit_only.len(), 1);
    assert_eq!(explicit_only[0].subject, ex("b"));

    let mut txn = store.begin();
    assert_eq!(txn.remove_statements(Some(&ex("a")), None, None, ContextPattern::Any).unwrap(), 0);
    assert_eq!(
        txn.remove_inferred_statements(None, None, None, ContextPattern::Any).unwrap(),
        1
    );
    txn.commit().unwrap();
    assert_eq!(store.size(ContextPattern::Any).unwrap(), 1);
}

#[test]
fn test_clear_context_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let g1 = ex("g1");
    let g2 = ex("g2");
    let mut txn = store.begin();
    for (i, g) in [Some(&g1), Some(&g1), Some(&g2), None].into_iter().enumerate() {
        txn.add_statement(&ex(&format!("s{i}")), &ex("p"), &ex("o"), g).unwrap();
    }
    assert_eq!(txn.clear_context(ContextPattern::Named(&g1)).unwrap(), 2);
    txn.commit().unwrap();
    assert_eq!(store.size(ContextPattern::Any).unwrap(), 2);

    let before = store.value_store().revision();
    store.clear().unwrap();
    assert_eq!(store.size(ContextPattern::Any).unwrap(), 0);
    assert_eq!(store.value_store().max_id(), 0);
    assert!(store.value_store().revision() > before);
    assert!(store.contexts().unwrap().is_empty());
}

#[test]
fn test_rejects_invalid_statements() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let mut txn = store.begin();
    let lit = Term::literal("x");
    assert!(matches!(
        txn.add_statement(&lit, &ex("p"), &ex("o"), None),
        Err(StoreError::InvalidTerm(_))
    ));
    assert!(matches!(
        txn.add_statement(&ex("s"), &Term::bnode("b"), &ex("o"), None),
        Err(StoreError::InvalidTerm(_))
    ));
    assert!(matches!(
        txn.add_statement(&ex("s"), &ex("p"), &ex("o"), Some(&lit)),
        Err(StoreError::InvalidTerm(_))
    ));
}

#[derive(Default)]
struct Counter {
    added: AtomicUsize,
    removed: AtomicUsize,
    changed: AtomicUsize,
}

impl StoreListener for Counter {
    fn statement_added(&self, _statement: &Statement) {
        self.added.fetch_add(1, Ordering::SeqCst);
    }

    fn statement_removed(&self, _statement: &Statement) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }

    fn changed(&self, event: &ChangeEvent) {
        assert!(event.added || event.removed);
        self.changed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_listeners_see_changes() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let counter = Arc::new(Counter::default());
    store.add_listener(counter.clone());

    let mut txn = store.begin();
    txn.add_statement(&ex("s"), &ex("p"), &ex("o1"), None).unwrap();
    txn.add_statement(&ex("s"), &ex("p"), &ex("o2"), None).unwrap();
    txn.add_statement(&ex("s"), &ex("p"), &ex("o2"), None).unwrap();
    txn.commit().unwrap();
    assert_eq!(counter.added.load(Ordering::SeqCst), 2);
    assert_eq!(counter.changed.load(Ordering::SeqCst), 1);

    let mut txn = store.begin();
    txn.remove_statements(Some(&ex("s")), None, None, ContextPattern::Any).unwrap();
    txn.commit().unwrap();
    assert_eq!(counter.removed.load(Ordering::SeqCst), 2);
    assert_eq!(counter.changed.load(Ordering::SeqCst), 2);

    // nothing changed, no event
    store.begin().commit().unwrap();
    assert_eq!(counter.changed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_stamped_ids_do_not_survive_clear() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let mut txn = store.begin();
    txn.add_statement(&ex("s"), &ex("p"), &ex("o"), None).unwrap();
    txn.commit().unwrap();

    let mut subject = store
        .statements(None, None, None, ContextPattern::Any, true)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .subject;
    let values = store.value_store();
    let old_id = values.get_native_id(&mut subject).unwrap();
    assert!(old_id > 0);

    store.clear().unwrap();
    assert_eq!(values.get_native_id(&mut subject).unwrap(), nativerdf::consts::UNKNOWN_ID);
    assert!(subject.stamp().is_none());

    let fresh = values.store_value(&ex("o")).unwrap();
    assert_eq!(fresh, 1);
    assert_eq!(values.store_native_value(&mut subject).unwrap(), 2);
    assert!(values.is_current(&subject.stamp().unwrap()));
}
