//! nativerdf: an embedded, disk-backed RDF quad store.
//!
//! Statements are stored as fixed-width records of four term ids in several
//! permuted indexes (`spoc`, `posc`, ...), and terms are interned in an
//! append-only value store. [`NativeStore`] coordinates concurrent readers
//! with one write transaction at a time.
//!
//! ```no_run
//! use nativerdf::{ContextPattern, NativeStore, StoreConfig, Term};
//!
//! let store = NativeStore::open(StoreConfig::new("data"))?;
//! let mut txn = store.begin();
//! txn.add_statement(
//!     &Term::iri("http://example.org/alice"),
//!     &Term::iri("http://xmlns.com/foaf/0.1/name"),
//!     &Term::literal("Alice"),
//!     None,
//! )?;
//! txn.commit()?;
//!
//! for st in store.statements(None, None, None, ContextPattern::Any, true)? {
//!     println!("{}", st?);
//! }
//! # Ok::<(), nativerdf::StoreError>(())
//! ```

extern crate derive_builder;

pub mod codec;
pub mod config;
pub mod consts;
pub mod errors;
pub mod locks;
pub mod options;
pub mod store;
pub mod term;
pub mod triple_store;
pub mod value_store;

pub use codec::{IndexSpec, QuadPattern, QuadRecord};
pub use config::{StoreConfig, StoreConfigBuilder};
pub use errors::{Result, StoreError};
pub use options::{ExplicitFilter, SyncMode};
pub use store::{
    ChangeEvent, ContextPattern, NativeStore, Statement, StatementIter, StoreListener,
    Transaction,
};
pub use term::{IdStamp, NativeTerm, Term};
pub use triple_store::TripleStore;
pub use value_store::{CacheSizes, ValueStore};

/// Lets `NATIVERDF_LOG` override `RUST_LOG` before a logger is initialised.
pub fn init_logging() {
    if let Ok(log_level) = std::env::var("NATIVERDF_LOG") {
        std::env::set_var("RUST_LOG", log_level);
    }
}
