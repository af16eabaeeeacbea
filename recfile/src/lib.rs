//! recfile: on-disk building blocks for the nativerdf quad store.
//!
//! Two file types share the 32-byte header defined in [`header`]:
//!
//! - [`RecordIndex`]: an ordered set of fixed-width records. The order is
//!   supplied by a [`KeyOrder`], so the same records can be kept in several
//!   differently sorted indexes.
//! - [`DataStore`]: an append-only store of variable-length byte strings keyed
//!   by a dense integer id, with content lookup (`get_id`) for interning.
//!
//! Quick start: an index over 8-byte records sorted by their last 4 bytes
//!
//! ```no_run
//! use recfile::{KeyOrder, RecordIndex};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct BySecondHalf;
//! impl KeyOrder for BySecondHalf {
//!     fn sort_key(&self, record: &[u8], out: &mut Vec<u8>) {
//!         out.extend_from_slice(&record[4..8]);
//!     }
//! }
//!
//! let idx = RecordIndex::open(Path::new("pairs.dat"), 8, Arc::new(BySecondHalf), false)
//!     .expect("open");
//! idx.insert(&[0, 0, 0, 1, 0, 0, 0, 9]).expect("insert");
//! for rec in idx.iter_all() {
//!     println!("{:?}", rec.expect("read"));
//! }
//! idx.sync().expect("sync");
//! ```

pub mod datastore;
pub mod header;
pub mod index;

pub use datastore::DataStore;
pub use index::{KeyOrder, PendingSync, RecordIndex, RecordIter};

use thiserror::Error;

/// Errors raised by recfile files.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The file failed an integrity or bounds check.
    #[error("corrupt file: {0}")]
    Corrupt(String),
    /// Structural problem with inputs.
    #[error("{0}")]
    Invalid(&'static str),
    /// The file was closed and can no longer be used.
    #[error("{0} has been closed")]
    Closed(String),
}

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Writes `bytes` to `path` by way of a sibling temporary file and a rename,
/// so a crash leaves either the old or the new contents in place.
pub fn write_atomic(path: &std::path::Path, bytes: &[u8], force_sync: bool) -> Result<()> {
    let tmp = write_temp(path, bytes, force_sync)?;
    replace_with_temp(&tmp, path, force_sync)
}

/// Sibling temporary file used while rewriting `path`.
pub fn temp_path(path: &std::path::Path) -> std::path::PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::path::PathBuf::from(tmp)
}

/// First half of [`write_atomic`]: writes `bytes` to the temporary file of
/// `path` and returns its location. `path` itself is untouched.
pub fn write_temp(
    path: &std::path::Path,
    bytes: &[u8],
    force_sync: bool,
) -> Result<std::path::PathBuf> {
    use std::io::Write;

    let tmp = temp_path(path);
    let written = std::fs::File::create(&tmp).and_then(|mut f| {
        f.write_all(bytes)?;
        if force_sync {
            f.sync_all()?;
        }
        Ok(())
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(tmp)
}

/// Second half of [`write_atomic`]: renames `tmp` over `path`.
pub fn replace_with_temp(
    tmp: &std::path::Path,
    path: &std::path::Path,
    force_sync: bool,
) -> Result<()> {
    std::fs::rename(tmp, path)?;
    if force_sync {
        sync_parent_dir(path)?;
    }
    Ok(())
}

#[cfg(unix)]
fn sync_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        let dir = if parent.as_os_str().is_empty() {
            std::path::Path::new(".")
        } else {
            parent
        };
        std::fs::File::open(dir)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &std::path::Path) -> Result<()> {
    Ok(())
}
