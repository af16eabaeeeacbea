//! Maps RDF terms to dense integer ids and back.
//!
//! Terms live in `values.dat`, IRI namespaces in `namespaces.dat`; both are
//! append-only [`DataStore`]s. Four bounded LRU caches sit in front of them.
//! Every id handed out is stamped with this store's identity and current
//! revision; [`ValueStore::clear`] starts a new revision so stamps taken
//! before the clear stop being trusted.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use lru::LruCache;
use parking_lot::Mutex;
use recfile::DataStore;

use crate::codec::EncodedTerm;
use crate::consts::*;
use crate::errors::{Result, StoreError};
use crate::locks::LockManager;
use crate::term::{split_iri, IdStamp, NativeTerm, Term};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Capacities of the value store caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSizes {
    pub value: usize,
    pub value_id: usize,
    pub namespace: usize,
    pub namespace_id: usize,
}

impl Default for CacheSizes {
    fn default() -> Self {
        CacheSizes {
            value: VALUE_CACHE_SIZE,
            value_id: VALUE_ID_CACHE_SIZE,
            namespace: NAMESPACE_CACHE_SIZE,
            namespace_id: NAMESPACE_ID_CACHE_SIZE,
        }
    }
}

fn lru<K: std::hash::Hash + Eq, V>(capacity: usize) -> Mutex<LruCache<K, V>> {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
    ))
}

/// Produces blank node labels unique to one store generation.
#[derive(Debug)]
struct BNodeIds {
    prefix: String,
    next: u64,
}

impl BNodeIds {
    fn new() -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        BNodeIds {
            prefix: format!("node{}x", to_base32(millis)),
            next: 1,
        }
    }

    fn next_label(&mut self) -> String {
        let label = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        label
    }
}

fn to_base32(mut n: u64) -> String {
    const DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 32) as usize]);
        n /= 32;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

pub struct ValueStore {
    store_id: u64,
    revision: AtomicU64,
    values: DataStore,
    namespaces: DataStore,
    locks: Arc<LockManager>,
    value_cache: Mutex<LruCache<i32, Term>>,
    value_id_cache: Mutex<LruCache<Term, i32>>,
    namespace_cache: Mutex<LruCache<i32, String>>,
    namespace_id_cache: Mutex<LruCache<String, i32>>,
    bnodes: Mutex<BNodeIds>,
}

impl std::fmt::Debug for ValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueStore")
            .field("store_id", &self.store_id)
            .field("revision", &self.revision())
            .field("values", &self.values)
            .field("namespaces", &self.namespaces)
            .finish()
    }
}

impl ValueStore {
    /// Open the value store files in `dir`. `locks` is the store-wide lock
    /// manager; [`ValueStore::clear`] takes its write lock.
    pub fn open(
        dir: &Path,
        force_sync: bool,
        caches: CacheSizes,
        locks: Arc<LockManager>,
    ) -> Result<Self> {
        let values = DataStore::open(&dir.join(VALUES_FILE), force_sync)?;
        let namespaces = DataStore::open(&dir.join(NAMESPACES_FILE), force_sync)?;
        let store_id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Opened value store {} in {:?} ({} values)",
            store_id,
            dir,
            values.max_id()
        );
        Ok(ValueStore {
            store_id,
            revision: AtomicU64::new(0),
            values,
            namespaces,
            locks,
            value_cache: lru(caches.value),
            value_id_cache: lru(caches.value_id),
            namespace_cache: lru(caches.namespace),
            namespace_id_cache: lru(caches.namespace_id),
            bnodes: Mutex::new(BNodeIds::new()),
        })
    }

    pub fn store_id(&self) -> u64 {
        self.store_id
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn stamp(&self, id: i32) -> IdStamp {
        IdStamp {
            store_id: self.store_id,
            revision: self.revision(),
            id,
        }
    }

    /// True if `stamp` was issued by this store since its last clear.
    pub fn is_current(&self, stamp: &IdStamp) -> bool {
        stamp.store_id == self.store_id && stamp.revision == self.revision()
    }

    /// Highest id assigned so far.
    pub fn max_id(&self) -> i32 {
        self.values.max_id()
    }

    /// The term stored under `id`, or `None` if there is no such id.
    pub fn get_value(&self, id: i32) -> Result<Option<NativeTerm>> {
        if id <= UNKNOWN_ID {
            return Ok(None);
        }
        if let Some(term) = self.value_cache.lock().get(&id) {
            return Ok(Some(NativeTerm::with_stamp(term.clone(), self.stamp(id))));
        }
        let Some(data) = self.values.get(id)? else {
            return Ok(None);
        };
        let encoded =
            EncodedTerm::decode(&data).map_err(|reason| StoreError::CorruptValue { id, reason })?;
        let term = self.resolve(id, encoded)?;
        self.value_cache.lock().put(id, term.clone());
        Ok(Some(NativeTerm::with_stamp(term, self.stamp(id))))
    }

    fn resolve(&self, id: i32, encoded: EncodedTerm) -> Result<Term> {
        Ok(match encoded {
            EncodedTerm::Uri {
                namespace_id,
                local_name,
            } => {
                let namespace = self.get_namespace(namespace_id).map_err(|_| {
                    StoreError::CorruptValue {
                        id,
                        reason: format!("unknown namespace id {namespace_id}"),
                    }
                })?;
                Term::Iri(namespace + &local_name)
            }
            EncodedTerm::BNode { label } => Term::BNode(label),
            EncodedTerm::Literal {
                datatype_id,
                language,
                label,
            } => {
                let datatype = if datatype_id == UNKNOWN_ID {
                    None
                } else {
                    match self.get_value(datatype_id)?.map(NativeTerm::into_term) {
                        Some(Term::Iri(dt)) => Some(dt),
                        _ => {
                            return Err(StoreError::CorruptValue {
                                id,
                                reason: format!("datatype id {datatype_id} is not an IRI"),
                            })
                        }
                    }
                };
                Term::Literal {
                    label,
                    datatype,
                    language,
                }
            }
        })
    }

    fn get_namespace(&self, id: i32) -> Result<String> {
        if let Some(ns) = self.namespace_cache.lock().get(&id) {
            return Ok(ns.clone());
        }
        let data = self
            .namespaces
            .get(id)?
            .ok_or_else(|| StoreError::CorruptValue {
                id,
                reason: "no such namespace".into(),
            })?;
        let ns = String::from_utf8(data).map_err(|e| StoreError::CorruptValue {
            id,
            reason: e.to_string(),
        })?;
        self.namespace_cache.lock().put(id, ns.clone());
        Ok(ns)
    }

    fn namespace_id(&self, namespace: &str, create: bool) -> Result<i32> {
        if let Some(id) = self.namespace_id_cache.lock().get(namespace) {
            return Ok(*id);
        }
        let id = if create {
            self.namespaces.store(namespace.as_bytes())?
        } else {
            self.namespaces.get_id(namespace.as_bytes())?
        };
        if id != UNKNOWN_ID {
            self.namespace_id_cache.lock().put(namespace.to_string(), id);
        }
        Ok(id)
    }

    /// Binary form of `term`. Without `create`, returns `None` as soon as a
    /// namespace or datatype turns out not to be stored yet.
    fn encode_term(&self, term: &Term, create: bool) -> Result<Option<Vec<u8>>> {
        let encoded = match term {
            Term::Iri(iri) => {
                let (namespace, local_name) = split_iri(iri);
                let namespace_id = self.namespace_id(namespace, create)?;
                if namespace_id == UNKNOWN_ID {
                    return Ok(None);
                }
                EncodedTerm::Uri {
                    namespace_id,
                    local_name: local_name.to_string(),
                }
            }
            Term::BNode(label) => EncodedTerm::BNode {
                label: label.clone(),
            },
            Term::Literal {
                label,
                datatype,
                language,
            } => {
                let datatype_id = match datatype {
                    None => UNKNOWN_ID,
                    Some(dt) => {
                        let dt = Term::Iri(dt.clone());
                        let id = if create {
                            self.store_value(&dt)?
                        } else {
                            self.get_id(&dt)?
                        };
                        if id == UNKNOWN_ID {
                            return Ok(None);
                        }
                        id
                    }
                };
                EncodedTerm::Literal {
                    datatype_id,
                    language: language.clone(),
                    label: label.clone(),
                }
            }
        };
        encoded.encode().map(Some)
    }

    /// Id of `term`, or [`UNKNOWN_ID`] if it is not stored.
    pub fn get_id(&self, term: &Term) -> Result<i32> {
        if let Some(id) = self.value_id_cache.lock().get(term) {
            return Ok(*id);
        }
        let Some(data) = self.encode_term(term, false)? else {
            return Ok(UNKNOWN_ID);
        };
        let id = self.values.get_id(&data)?;
        if id != UNKNOWN_ID {
            self.value_id_cache.lock().put(term.clone(), id);
        }
        Ok(id)
    }

    /// Like [`Self::get_id`], but first trusts an id stamped on the term by
    /// this store in its current revision, and stamps the term on a hit.
    pub fn get_native_id(&self, term: &mut NativeTerm) -> Result<i32> {
        if let Some(stamp) = term.stamp() {
            if self.is_current(&stamp) {
                return Ok(stamp.id);
            }
            term.clear_stamp();
        }
        let id = self.get_id(term.term())?;
        if id != UNKNOWN_ID {
            term.set_stamp(self.stamp(id));
        }
        Ok(id)
    }

    /// Id of `term`, storing it first if needed.
    pub fn store_value(&self, term: &Term) -> Result<i32> {
        if let Some(id) = self.value_id_cache.lock().get(term) {
            return Ok(*id);
        }
        let Some(data) = self.encode_term(term, true)? else {
            return Err(StoreError::InvalidTerm(format!("cannot encode {term}")));
        };
        let id = self.values.store(&data)?;
        self.value_id_cache.lock().put(term.clone(), id);
        Ok(id)
    }

    /// Like [`Self::store_value`], stamping the term with the resulting id.
    pub fn store_native_value(&self, term: &mut NativeTerm) -> Result<i32> {
        if let Some(stamp) = term.stamp() {
            if self.is_current(&stamp) {
                return Ok(stamp.id);
            }
        }
        let id = self.store_value(term.term())?;
        term.set_stamp(self.stamp(id));
        Ok(id)
    }

    /// A blank node with a label not handed out before by this store generation.
    pub fn create_bnode(&self) -> Term {
        Term::BNode(self.bnodes.lock().next_label())
    }

    /// Drop every value and namespace and start a new revision.
    pub fn clear(&self) -> Result<()> {
        let _write = self.locks.write_lock();
        self.values.clear()?;
        self.namespaces.clear()?;
        self.value_cache.lock().clear();
        self.value_id_cache.lock().clear();
        self.namespace_cache.lock().clear();
        self.namespace_id_cache.lock().clear();
        *self.bnodes.lock() = BNodeIds::new();
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        info!("Cleared value store {}, now at revision {}", self.store_id, revision);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.values.sync()?;
        self.namespaces.sync()?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.values.close()?;
        self.namespaces.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &Path) -> ValueStore {
        ValueStore::open(
            dir,
            false,
            CacheSizes::default(),
            Arc::new(LockManager::new()),
        )
        .unwrap()
    }

    #[test]
    fn interns_each_kind_of_term() {
        let dir = tempfile::tempdir().unwrap();
        let vs = open(dir.path());
        let terms = [
            Term::iri("http://example.org/ns#a"),
            Term::iri("http://example.org/ns#b"),
            Term::bnode("b0"),
            Term::literal("plain"),
            Term::lang_literal("hallo", "de"),
            Term::typed_literal("5", "http://www.w3.org/2001/XMLSchema#int"),
        ];
        let ids: Vec<i32> = terms.iter().map(|t| vs.store_value(t).unwrap()).collect();
        for (t, id) in terms.iter().zip(&ids) {
            assert!(*id > 0);
            assert_eq!(vs.get_id(t).unwrap(), *id);
            assert_eq!(vs.get_value(*id).unwrap().unwrap(), *t);
            assert_eq!(vs.store_value(t).unwrap(), *id);
        }
        assert_eq!(vs.get_id(&Term::iri("http://example.org/other#x")).unwrap(), UNKNOWN_ID);
        assert_eq!(vs.get_value(UNKNOWN_ID).unwrap(), None);
        assert_eq!(vs.get_value(vs.max_id() + 1).unwrap(), None);
    }

    #[test]
    fn values_survive_reopen_without_caches() {
        let dir = tempfile::tempdir().unwrap();
        let lit = Term::typed_literal("x", "http://example.org/dt");
        let id = {
            let vs = open(dir.path());
            let id = vs.store_value(&lit).unwrap();
            vs.close().unwrap();
            id
        };
        let vs = open(dir.path());
        assert_eq!(vs.get_value(id).unwrap().unwrap(), lit);
        assert_eq!(vs.get_id(&lit).unwrap(), id);
    }

    #[test]
    fn stamps_are_invalidated_by_clear() {
        let dir = tempfile::tempdir().unwrap();
        let vs = open(dir.path());
        vs.store_value(&Term::iri("http://example.org/first")).unwrap();
        let mut term = NativeTerm::new(Term::iri("http://example.org/second"));
        let id = vs.store_native_value(&mut term).unwrap();
        assert_eq!(id, 2);
        assert_eq!(term.stamp().map(|s| s.id), Some(2));
        assert_eq!(vs.get_native_id(&mut term).unwrap(), 2);

        vs.clear().unwrap();
        assert_eq!(vs.get_native_id(&mut term).unwrap(), UNKNOWN_ID);
        assert!(term.stamp().is_none());
        assert_eq!(vs.store_native_value(&mut term).unwrap(), 1);
    }

    #[test]
    fn stamps_from_other_stores_are_ignored() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let vs_a = open(a.path());
        let vs_b = open(b.path());
        let mut term = NativeTerm::new(Term::literal("shared"));
        vs_a.store_value(&Term::literal("filler")).unwrap();
        assert_eq!(vs_a.store_native_value(&mut term).unwrap(), 2);
        assert_eq!(vs_b.get_native_id(&mut term).unwrap(), UNKNOWN_ID);
        assert_eq!(vs_b.store_native_value(&mut term).unwrap(), 1);
    }

    #[test]
    fn bnode_labels_are_unique_and_restart_after_clear() {
        let dir = tempfile::tempdir().unwrap();
        let vs = open(dir.path());
        let a = vs.create_bnode();
        let b = vs.create_bnode();
        assert_ne!(a, b);
        match &a {
            Term::BNode(label) => {
                assert!(label.starts_with("node"));
                assert!(label.ends_with("x1"));
            }
            other => panic!("expected blank node, got {other}"),
        }
        vs.clear().unwrap();
        match vs.create_bnode() {
            Term::BNode(label) => assert!(label.ends_with("x1")),
            other => panic!("expected blank node, got {other}"),
        }
    }

    #[test]
    fn base32_matches_radix_32() {
        assert_eq!(to_base32(0), "0");
        assert_eq!(to_base32(31), "v");
        assert_eq!(to_base32(32), "10");
        assert_eq!(to_base32(1_000_000), "ugi0");
    }
}
