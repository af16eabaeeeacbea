//! Ordered index of fixed-width records.
//!
//! A [`RecordIndex`] keeps its entries in memory, sorted by the sort key its
//! [`KeyOrder`] derives from each record, and persists them as
//! `header | record*` where records appear in index order. `sync` rewrites the
//! file atomically when the index is dirty; `revert` throws away everything
//! since the last `sync` by reloading the file.
//!
//! Iteration goes through [`RecordIter`], a cursor that only holds the
//! index's lock while it copies out the next batch of entries.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::header::{FileKind, HEADER_LEN, Header, crc32_ieee};
use crate::{Error, Result, replace_with_temp, write_atomic, write_temp};

/// Number of entries a cursor examines per lock acquisition.
const SCAN_BATCH: usize = 256;

/// Defines the order of an index by mapping each record to a sort key.
///
/// Records whose sort keys are equal occupy the same slot: inserting one
/// replaces the other. Bytes of the record that do not contribute to the sort
/// key are payload.
pub trait KeyOrder: Send + Sync + fmt::Debug {
    fn sort_key(&self, record: &[u8], out: &mut Vec<u8>);
}

struct IndexState {
    entries: BTreeMap<Box<[u8]>, Box<[u8]>>,
    created: u64,
    dirty: bool,
    closed: bool,
}

/// A persistent, ordered set of fixed-width records.
pub struct RecordIndex {
    path: PathBuf,
    record_len: usize,
    order: Arc<dyn KeyOrder>,
    force_sync: bool,
    state: RwLock<IndexState>,
}

impl fmt::Debug for RecordIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordIndex")
            .field("path", &self.path)
            .field("record_len", &self.record_len)
            .field("order", &self.order)
            .finish()
    }
}

impl RecordIndex {
    /// Open the index stored at `path`, creating an empty one if the file does
    /// not exist yet.
    ///
    /// With `force_sync` every `sync` fsyncs the index file and its directory.
    pub fn open(
        path: &Path,
        record_len: usize,
        order: Arc<dyn KeyOrder>,
        force_sync: bool,
    ) -> Result<Self> {
        if record_len == 0 || record_len > u32::MAX as usize {
            return Err(Error::Invalid("record length out of range"));
        }
        let index = RecordIndex {
            path: path.to_path_buf(),
            record_len,
            order,
            force_sync,
            state: RwLock::new(IndexState {
                entries: BTreeMap::new(),
                created: 0,
                dirty: false,
                closed: false,
            }),
        };
        if path.exists() {
            let (entries, created) = index.load()?;
            let mut state = index.state.write();
            state.entries = entries;
            state.created = created;
        } else {
            debug!("Creating record index {:?}", path);
            let mut state = index.state.write();
            state.created = Header::new(FileKind::RecordIndex, record_len).created_unix64;
            index.persist(&state)?;
        }
        Ok(index)
    }

    /// Remove the file backing an index. Returns `false` if there was none.
    pub fn delete_file(path: &Path) -> Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_len(&self) -> usize {
        self.record_len
    }

    /// Number of records currently in the index (0 once closed).
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the index holds changes that have not been synced.
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    fn closed_error(&self) -> Error {
        Error::Closed(self.path.display().to_string())
    }

    fn check_len(&self, record: &[u8]) -> Result<()> {
        if record.len() != self.record_len {
            return Err(Error::Invalid("record length does not match index"));
        }
        Ok(())
    }

    fn key_of(&self, record: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.record_len);
        self.order.sort_key(record, &mut key);
        key
    }

    /// Insert `record`, replacing any record with the same sort key.
    ///
    /// Returns the record previously stored in that slot.
    pub fn insert(&self, record: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_len(record)?;
        let key = self.key_of(record);
        let mut state = self.state.write();
        if state.closed {
            return Err(self.closed_error());
        }
        let previous = state
            .entries
            .insert(key.into_boxed_slice(), record.into());
        if previous.as_deref() != Some(record) {
            state.dirty = true;
        }
        Ok(previous.map(Vec::from))
    }

    /// Look up the stored record occupying the slot of `record`.
    pub fn get(&self, record: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_len(record)?;
        let key = self.key_of(record);
        let state = self.state.read();
        if state.closed {
            return Err(self.closed_error());
        }
        Ok(state.entries.get(key.as_slice()).map(|r| r.to_vec()))
    }

    /// Remove the record occupying the slot of `record`.
    pub fn remove(&self, record: &[u8]) -> Result<bool> {
        self.check_len(record)?;
        let key = self.key_of(record);
        let mut state = self.state.write();
        if state.closed {
            return Err(self.closed_error());
        }
        let removed = state.entries.remove(key.as_slice()).is_some();
        if removed {
            state.dirty = true;
        }
        Ok(removed)
    }

    /// Iterate over every record in index order.
    pub fn iter_all(&self) -> RecordIter<'_> {
        RecordIter::new(self, Bound::Unbounded, Bound::Unbounded, None)
    }

    /// Full scan returning the records `r` with `r & mask == key & mask`.
    pub fn iter_values(&self, key: &[u8], mask: &[u8]) -> RecordIter<'_> {
        RecordIter::new(
            self,
            Bound::Unbounded,
            Bound::Unbounded,
            Some((key.to_vec(), mask.to_vec())),
        )
    }

    /// Range scan over the records sorting between `min` and `max`
    /// (inclusive), filtered by `key` and `mask` like [`Self::iter_values`].
    pub fn iter_range(&self, key: &[u8], mask: &[u8], min: &[u8], max: &[u8]) -> RecordIter<'_> {
        RecordIter::new(
            self,
            Bound::Included(self.key_of(min)),
            Bound::Included(self.key_of(max)),
            Some((key.to_vec(), mask.to_vec())),
        )
    }

    /// Write the index to disk if it changed since the last sync.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(self.closed_error());
        }
        if !state.dirty {
            return Ok(());
        }
        self.persist(&state)?;
        state.dirty = false;
        Ok(())
    }

    /// First phase of a sync: write the new contents next to the index file
    /// without replacing it.
    ///
    /// Returns `None` when the index is clean. The returned [`PendingSync`]
    /// keeps the index locked until it is finished or dropped; dropping it
    /// discards the temporary file and leaves the index dirty.
    pub fn prepare_sync(&self) -> Result<Option<PendingSync<'_>>> {
        let state = self.state.write();
        if state.closed {
            return Err(self.closed_error());
        }
        if !state.dirty {
            return Ok(None);
        }
        let tmp = write_temp(&self.path, &self.encode(&state), self.force_sync)?;
        Ok(Some(PendingSync {
            index: self,
            state,
            tmp: Some(tmp),
        }))
    }

    /// Discard all changes made since the last successful sync.
    pub fn revert(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(self.closed_error());
        }
        if !state.dirty {
            return Ok(());
        }
        let (entries, created) = self.load()?;
        state.entries = entries;
        state.created = created;
        state.dirty = false;
        debug!("Reverted record index {:?}", self.path);
        Ok(())
    }

    /// Remove every record. The empty index is persisted by the next sync.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(self.closed_error());
        }
        if !state.entries.is_empty() {
            state.entries.clear();
            state.dirty = true;
        }
        Ok(())
    }

    /// Sync pending changes and release the in-memory entries.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        if state.dirty {
            self.persist(&state)?;
            state.dirty = false;
        }
        state.entries = BTreeMap::new();
        state.closed = true;
        Ok(())
    }

    fn persist(&self, state: &IndexState) -> Result<()> {
        write_atomic(&self.path, &self.encode(state), self.force_sync)
    }

    fn encode(&self, state: &IndexState) -> Vec<u8> {
        let mut body = Vec::with_capacity(state.entries.len() * self.record_len);
        for record in state.entries.values() {
            body.extend_from_slice(record);
        }
        let mut header = Header::new(FileKind::RecordIndex, self.record_len);
        header.created_unix64 = state.created;
        header.count_u64 = state.entries.len() as u64;
        header.body_crc32 = crc32_ieee(&body);

        let mut file = Vec::with_capacity(HEADER_LEN + body.len());
        file.extend_from_slice(&header.to_bytes());
        file.extend_from_slice(&body);
        file
    }

    fn load(&self) -> Result<(BTreeMap<Box<[u8]>, Box<[u8]>>, u64)> {
        #[cfg(feature = "mmap")]
        {
            let f = std::fs::File::open(&self.path)?;
            let mmap = unsafe { memmap2::MmapOptions::new().map(&f) }?;
            self.parse(&mmap)
        }
        #[cfg(not(feature = "mmap"))]
        {
            let data = std::fs::read(&self.path)?;
            self.parse(&data)
        }
    }

    fn parse(&self, data: &[u8]) -> Result<(BTreeMap<Box<[u8]>, Box<[u8]>>, u64)> {
        let header = Header::expect(data, FileKind::RecordIndex)?;
        if header.record_len_u32 as usize != self.record_len {
            return Err(Error::Corrupt(format!(
                "{}: record length {} does not match expected {}",
                self.path.display(),
                header.record_len_u32,
                self.record_len
            )));
        }
        let body_len = (header.count_u64 as usize)
            .checked_mul(self.record_len)
            .ok_or_else(|| Error::Corrupt("record count overflow".into()))?;
        if data.len() != HEADER_LEN + body_len {
            return Err(Error::Corrupt(format!(
                "{}: expected {} body bytes, found {}",
                self.path.display(),
                body_len,
                data.len() - HEADER_LEN
            )));
        }
        let body = &data[HEADER_LEN..];
        if crc32_ieee(body) != header.body_crc32 {
            return Err(Error::Corrupt(format!(
                "{}: body CRC mismatch",
                self.path.display()
            )));
        }
        let mut entries = BTreeMap::new();
        for record in body.chunks_exact(self.record_len) {
            entries.insert(self.key_of(record).into_boxed_slice(), record.into());
        }
        Ok((entries, header.created_unix64))
    }
}

/// A sync whose new contents are written but not yet in place.
///
/// Produced by [`RecordIndex::prepare_sync`]. Writers of the index block
/// until it is finished or dropped.
pub struct PendingSync<'a> {
    index: &'a RecordIndex,
    state: RwLockWriteGuard<'a, IndexState>,
    tmp: Option<PathBuf>,
}

impl PendingSync<'_> {
    /// Move the prepared file over the index file and mark the index clean.
    pub fn finish(mut self) -> Result<()> {
        let Some(tmp) = self.tmp.take() else {
            return Ok(());
        };
        if let Err(e) = replace_with_temp(&tmp, &self.index.path, self.index.force_sync) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        self.state.dirty = false;
        Ok(())
    }
}

impl Drop for PendingSync<'_> {
    fn drop(&mut self) {
        if let Some(tmp) = self.tmp.take() {
            if let Err(e) = std::fs::remove_file(&tmp) {
                debug!("Could not remove {:?}: {}", tmp, e);
            }
        }
    }
}

/// Lazy cursor over a [`RecordIndex`].
///
/// Records inserted behind the cursor while it is open are not returned;
/// records inserted ahead of it may be.
pub struct RecordIter<'a> {
    index: &'a RecordIndex,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    filter: Option<(Vec<u8>, Vec<u8>)>,
    buffer: VecDeque<Vec<u8>>,
    exhausted: bool,
}

impl<'a> RecordIter<'a> {
    fn new(
        index: &'a RecordIndex,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        filter: Option<(Vec<u8>, Vec<u8>)>,
    ) -> Self {
        let exhausted = match (&lower, &upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            _ => false,
        };
        RecordIter {
            index,
            lower,
            upper,
            filter,
            buffer: VecDeque::new(),
            exhausted,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let index = self.index;
        let state = index.state.read();
        if state.closed {
            self.exhausted = true;
            return Err(index.closed_error());
        }
        let range = (as_slice_bound(&self.lower), as_slice_bound(&self.upper));
        let mut scanned = 0usize;
        let mut last: Option<&[u8]> = None;
        let mut batch = Vec::new();
        for (key, record) in state.entries.range::<[u8], _>(range) {
            scanned += 1;
            last = Some(&**key);
            if matches(self.filter.as_ref(), record) {
                batch.push(record.to_vec());
            }
            if scanned == SCAN_BATCH {
                break;
            }
        }
        let next_lower = match last {
            Some(key) if scanned == SCAN_BATCH => Some(key.to_vec()),
            _ => None,
        };
        drop(state);
        self.buffer.extend(batch);
        match next_lower {
            Some(key) => self.lower = Bound::Excluded(key),
            None => self.exhausted = true,
        }
        Ok(())
    }
}

fn matches(filter: Option<&(Vec<u8>, Vec<u8>)>, record: &[u8]) -> bool {
    match filter {
        None => true,
        Some((key, mask)) => record
            .iter()
            .zip(key.iter().zip(mask.iter()))
            .all(|(r, (k, m))| r & m == k & m),
    }
}

fn as_slice_bound(b: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match b {
        Bound::Included(v) => Bound::Included(v.as_slice()),
        Bound::Excluded(v) => Bound::Excluded(v.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

impl Iterator for RecordIter<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                return Some(Err(e));
            }
        }
    }
}
