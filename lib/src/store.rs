//! The store handle: ties the value store and the triple store together and
//! coordinates readers, transactions and commits.
//!
//! Scans hold a shared read lock for as long as their [`StatementIter`] is
//! alive. Write transactions serialize on a separate transaction lock and
//! mutate the stores directly; readers may observe uncommitted changes. Commit
//! and rollback take the exclusive write lock only while flushing, so a thread
//! must drop its own open scans before finishing a transaction.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use parking_lot::RwLock;

use crate::codec::{IndexSpec, QuadPattern, QuadRecord};
use crate::config::StoreConfig;
use crate::consts::*;
use crate::errors::{Result, StoreError};
use crate::locks::{LockManager, ReadLock, TransactionGuard, TransactionLock};
use crate::options::ExplicitFilter;
use crate::term::{NativeTerm, Term};
use crate::triple_store::{TripleIter, TripleStore};
use crate::value_store::ValueStore;

/// Which graphs a pattern covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPattern<'a> {
    Any,
    DefaultGraph,
    Named(&'a Term),
}

impl<'a> From<Option<&'a Term>> for ContextPattern<'a> {
    /// `None` is the default graph.
    fn from(value: Option<&'a Term>) -> Self {
        match value {
            None => ContextPattern::DefaultGraph,
            Some(t) => ContextPattern::Named(t),
        }
    }
}

/// A quad with its terms resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Statement {
    pub subject: NativeTerm,
    pub predicate: NativeTerm,
    pub object: NativeTerm,
    /// `None` for the default graph.
    pub context: Option<NativeTerm>,
    pub explicit: bool,
}

impl fmt::Display for Statement {
    /// N-Quads line without the trailing newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let Some(ctx) = &self.context {
            write!(f, " {ctx}")?;
        }
        f.write_str(" .")
    }
}

/// Summary of a committed transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeEvent {
    pub added: bool,
    pub removed: bool,
}

/// Hooks for observing changes to a store.
pub trait StoreListener: Send + Sync {
    /// Called for every newly stored statement, before commit.
    fn statement_added(&self, _statement: &Statement) {}
    /// Called for every removed statement, before commit.
    fn statement_removed(&self, _statement: &Statement) {}
    /// Called after a transaction that changed something committed.
    fn changed(&self, _event: &ChangeEvent) {}
}

pub struct NativeStore {
    config: StoreConfig,
    locks: Arc<LockManager>,
    txn_lock: TransactionLock,
    value_store: ValueStore,
    triple_store: TripleStore,
    listeners: RwLock<Vec<Arc<dyn StoreListener>>>,
    closed: bool,
}

impl fmt::Debug for NativeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeStore")
            .field("config", &self.config)
            .field("triple_store", &self.triple_store)
            .finish()
    }
}

impl NativeStore {
    /// Open (or create) the store described by `config`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let dir = config.data_dir.clone();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Config(format!("cannot create data directory {}: {e}", dir.display()))
        })?;
        let locks = Arc::new(LockManager::new());
        let force_sync = config.force_sync();
        let value_store = ValueStore::open(&dir, force_sync, config.cache_sizes(), locks.clone())?;
        let triple_store = TripleStore::open(&dir, &config.triple_indexes, force_sync)?;
        info!(
            "Opened native store in {} (indexes {}, sync {})",
            dir.display(),
            IndexSpec::format_list(&triple_store.index_specs()),
            config.sync_mode
        );
        Ok(NativeStore {
            config,
            locks,
            txn_lock: TransactionLock::new(),
            value_store,
            triple_store,
            listeners: RwLock::new(Vec::new()),
            closed: false,
        })
    }

    /// Open a store in `dir` with the default configuration.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(StoreConfig::new(dir.as_ref()))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn value_store(&self) -> &ValueStore {
        &self.value_store
    }

    pub fn triple_store(&self) -> &TripleStore {
        &self.triple_store
    }

    pub fn index_specs(&self) -> Vec<IndexSpec> {
        self.triple_store.index_specs()
    }

    pub fn add_listener(&self, listener: Arc<dyn StoreListener>) {
        self.listeners.write().push(listener);
    }

    fn has_listeners(&self) -> bool {
        !self.listeners.read().is_empty()
    }

    fn notify(&self, f: impl Fn(&dyn StoreListener)) {
        for listener in self.listeners.read().iter() {
            f(listener.as_ref());
        }
    }

    pub fn create_bnode(&self) -> Term {
        self.value_store.create_bnode()
    }

    /// Translate a term pattern into an id pattern. `None` if a bound term
    /// is not stored, in which case nothing can match.
    fn resolve_pattern(
        &self,
        subj: Option<&Term>,
        pred: Option<&Term>,
        obj: Option<&Term>,
        context: ContextPattern<'_>,
        explicit: ExplicitFilter,
    ) -> Result<Option<QuadPattern>> {
        let id_of = |term: Option<&Term>| -> Result<Option<i32>> {
            match term {
                None => Ok(Some(WILDCARD)),
                Some(t) => {
                    let id = self.value_store.get_id(t)?;
                    Ok((id != UNKNOWN_ID).then_some(id))
                }
            }
        };
        let ctx = match context {
            ContextPattern::Any => Some(WILDCARD),
            ContextPattern::DefaultGraph => Some(DEFAULT_CONTEXT),
            ContextPattern::Named(t) => id_of(Some(t))?,
        };
        let (Some(s), Some(p), Some(o), Some(c)) = (id_of(subj)?, id_of(pred)?, id_of(obj)?, ctx)
        else {
            return Ok(None);
        };
        Ok(Some(QuadPattern::new(s, p, o, c).with_explicit(explicit)))
    }

    fn term_for(&self, id: i32) -> Result<NativeTerm> {
        self.value_store
            .get_value(id)?
            .ok_or_else(|| StoreError::CorruptValue {
                id,
                reason: "referenced by a statement but not stored".into(),
            })
    }

    fn statement_for(&self, record: &QuadRecord) -> Result<Statement> {
        Ok(Statement {
            subject: self.term_for(record.subj)?,
            predicate: self.term_for(record.pred)?,
            object: self.term_for(record.obj)?,
            context: if record.ctx == DEFAULT_CONTEXT {
                None
            } else {
                Some(self.term_for(record.ctx)?)
            },
            explicit: record.explicit,
        })
    }

    /// Statements matching the pattern; `None` terms are wildcards.
    ///
    /// The iterator holds the store's read lock until it is dropped.
    pub fn statements(
        &self,
        subj: Option<&Term>,
        pred: Option<&Term>,
        obj: Option<&Term>,
        context: ContextPattern<'_>,
        include_inferred: bool,
    ) -> Result<StatementIter<'_>> {
        let read = self.locks.read_lock();
        let filter = ExplicitFilter::including_inferred(include_inferred);
        let inner = match self.resolve_pattern(subj, pred, obj, context, filter)? {
            Some(pattern) => Some(self.triple_store.get_triples(&pattern)?),
            None => None,
        };
        Ok(StatementIter {
            store: self,
            inner,
            _read: read,
        })
    }

    /// Number of statements (explicit and inferred) in the given graphs.
    pub fn size(&self, context: ContextPattern<'_>) -> Result<usize> {
        let _read = self.locks.read_lock();
        match self.resolve_pattern(None, None, None, context, ExplicitFilter::Any)? {
            Some(pattern) => self.triple_store.count_triples(&pattern),
            None => Ok(0),
        }
    }

    /// Named graphs that hold at least one statement.
    pub fn contexts(&self) -> Result<Vec<NativeTerm>> {
        let _read = self.locks.read_lock();
        self.triple_store
            .contexts()?
            .into_iter()
            .map(|id| self.term_for(id))
            .collect()
    }

    /// Start a write transaction, waiting for any active one to finish.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new(self, self.txn_lock.lock())
    }

    /// Start a write transaction, failing if another one is active.
    pub fn try_begin(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new(self, self.txn_lock.try_lock()?))
    }

    /// Start a write transaction, waiting at most `timeout`.
    pub fn begin_timeout(&self, timeout: Duration) -> Result<Transaction<'_>> {
        Ok(Transaction::new(self, self.txn_lock.lock_for(timeout)?))
    }

    /// Flush both stores to disk.
    pub fn sync(&self) -> Result<()> {
        let _txn = self.txn_lock.lock();
        let _write = self.locks.write_lock();
        self.value_store.sync()?;
        self.triple_store.sync()
    }

    /// Remove every statement and value.
    pub fn clear(&self) -> Result<()> {
        let _txn = self.txn_lock.lock();
        let removed = {
            let _write = self.locks.write_lock();
            let removed = self.triple_store.count_triples(&QuadPattern::all())? > 0;
            self.triple_store.clear()?;
            self.triple_store.commit()?;
            removed
        };
        self.value_store.clear()?;
        if removed {
            self.notify(|l| {
                l.changed(&ChangeEvent {
                    added: false,
                    removed: true,
                })
            });
        }
        Ok(())
    }

    /// Change the active index list. Needs exclusive access to the store.
    pub fn reindex(&mut self, index_spec: &str) -> Result<()> {
        self.value_store.sync()?;
        let result = self.triple_store.reindex(index_spec);
        self.config.triple_indexes = IndexSpec::format_list(&self.triple_store.index_specs());
        result
    }

    fn close_stores(&mut self) -> Result<()> {
        self.closed = true;
        let values = self.value_store.close();
        let triples = self.triple_store.close();
        values?;
        triples?;
        debug!("Closed native store in {}", self.config.data_dir.display());
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.close_stores()
    }
}

impl Drop for NativeStore {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.close_stores() {
                error!("Failed to close native store on drop: {err}");
            }
        }
    }
}

/// Lazily resolved statements from one scan.
pub struct StatementIter<'a> {
    store: &'a NativeStore,
    inner: Option<TripleIter<'a>>,
    _read: ReadLock<'a>,
}

impl Iterator for StatementIter<'_> {
    type Item = Result<Statement>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.inner.as_mut()?.next()?;
        Some(record.and_then(|r| self.store.statement_for(&r)))
    }
}

/// A write transaction. Dropping it without `commit` rolls it back.
pub struct Transaction<'a> {
    store: &'a NativeStore,
    added: bool,
    removed: bool,
    finished: bool,
    _guard: TransactionGuard<'a>,
}

impl<'a> Transaction<'a> {
    fn new(store: &'a NativeStore, guard: TransactionGuard<'a>) -> Self {
        debug!("Transaction started");
        Transaction {
            store,
            added: false,
            removed: false,
            finished: false,
            _guard: guard,
        }
    }

    pub fn store(&self) -> &'a NativeStore {
        self.store
    }

    /// Add an explicit statement. Returns `true` if it was not stored before.
    pub fn add_statement(
        &mut self,
        subj: &Term,
        pred: &Term,
        obj: &Term,
        context: Option<&Term>,
    ) -> Result<bool> {
        self.add(subj, pred, obj, context, true)
    }

    /// Add an inferred statement. An existing explicit statement stays explicit.
    pub fn add_inferred_statement(
        &mut self,
        subj: &Term,
        pred: &Term,
        obj: &Term,
        context: Option<&Term>,
    ) -> Result<bool> {
        self.add(subj, pred, obj, context, false)
    }

    fn add(
        &mut self,
        subj: &Term,
        pred: &Term,
        obj: &Term,
        context: Option<&Term>,
        explicit: bool,
    ) -> Result<bool> {
        if !subj.is_resource() {
            return Err(StoreError::InvalidTerm(format!("literal subject {subj}")));
        }
        if !pred.is_iri() {
            return Err(StoreError::InvalidTerm(format!("predicate {pred} is not an IRI")));
        }
        if let Some(ctx) = context.filter(|c| !c.is_resource()) {
            return Err(StoreError::InvalidTerm(format!("literal context {ctx}")));
        }
        let values = &self.store.value_store;
        let s = values.store_value(subj)?;
        let p = values.store_value(pred)?;
        let o = values.store_value(obj)?;
        let c = match context {
            Some(ctx) => values.store_value(ctx)?,
            None => DEFAULT_CONTEXT,
        };
        let is_new = self.store.triple_store.store_triple(s, p, o, c, explicit)?;
        if is_new {
            self.added = true;
            if self.store.has_listeners() {
                let statement = self.store.statement_for(&QuadRecord::new(s, p, o, c, explicit))?;
                self.store.notify(|l| l.statement_added(&statement));
            }
        }
        Ok(is_new)
    }

    /// Remove explicit statements matching the pattern.
    pub fn remove_statements(
        &mut self,
        subj: Option<&Term>,
        pred: Option<&Term>,
        obj: Option<&Term>,
        context: ContextPattern<'_>,
    ) -> Result<usize> {
        self.remove(subj, pred, obj, context, ExplicitFilter::ExplicitOnly)
    }

    /// Remove inferred statements matching the pattern.
    pub fn remove_inferred_statements(
        &mut self,
        subj: Option<&Term>,
        pred: Option<&Term>,
        obj: Option<&Term>,
        context: ContextPattern<'_>,
    ) -> Result<usize> {
        self.remove(subj, pred, obj, context, ExplicitFilter::InferredOnly)
    }

    /// Remove every statement, explicit or inferred, in the given graphs.
    pub fn clear_context(&mut self, context: ContextPattern<'_>) -> Result<usize> {
        self.remove(None, None, None, context, ExplicitFilter::Any)
    }

    fn remove(
        &mut self,
        subj: Option<&Term>,
        pred: Option<&Term>,
        obj: Option<&Term>,
        context: ContextPattern<'_>,
        filter: ExplicitFilter,
    ) -> Result<usize> {
        let store = self.store;
        let Some(pattern) = store.resolve_pattern(subj, pred, obj, context, filter)? else {
            return Ok(0);
        };
        let removed_statements = if store.has_listeners() {
            store
                .triple_store
                .get_triples(&pattern)?
                .map(|r| r.and_then(|r| store.statement_for(&r)))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };
        let count = store.triple_store.remove_triples(&pattern)?;
        if count > 0 {
            self.removed = true;
            for statement in &removed_statements {
                store.notify(|l| l.statement_removed(statement));
            }
        }
        Ok(count)
    }

    /// Make the transaction's changes durable.
    ///
    /// On failure the triple store is reverted to its last committed state.
    /// The transaction lock is released either way.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let store = self.store;
        let result = {
            let _write = store.locks.write_lock();
            let result = store
                .value_store
                .sync()
                .and_then(|_| store.triple_store.commit());
            if result.is_err() {
                if let Err(err) = store.triple_store.rollback() {
                    error!("Failed to roll back after failed commit: {err}");
                }
            }
            result
        };
        result?;
        debug!("Transaction committed");
        if self.added || self.removed {
            let event = ChangeEvent {
                added: self.added,
                removed: self.removed,
            };
            store.notify(|l| l.changed(&event));
        }
        Ok(())
    }

    /// Discard the transaction's changes.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.rollback_changes()
    }

    fn rollback_changes(&self) -> Result<()> {
        let _write = self.store.locks.write_lock();
        self.store.value_store.sync()?;
        self.store.triple_store.rollback()?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.rollback_changes() {
                error!("Failed to roll back unfinished transaction: {err}");
            }
        }
    }
}
