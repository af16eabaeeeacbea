//! Quad records kept in several permuted indexes.
//!
//! Every configured [`IndexSpec`] has its own [`RecordIndex`] file
//! (`triples-<spec>.dat`) holding the same set of records in a different
//! order. The first configured index is the primary one: inserts go there
//! first, and only propagate to the others when the primary reports a change.
//! `triples.json` records the format version and the active index list, so a
//! change of configuration is detected and migrated on open.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use recfile::{RecordIndex, RecordIter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::{encode, IndexSpec, QuadPattern, QuadRecord};
use crate::consts::*;
use crate::errors::{Result, StoreError};

/// Contents of `triples.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TripleStoreMetadata {
    pub version: u32,
    pub indexes: String,
    pub updated: DateTime<Utc>,
}

/// `triples.json` as found on disk; either field may be absent or malformed.
#[derive(Debug, Default, Deserialize)]
struct StoredMetadata {
    #[serde(default)]
    version: Option<serde_json::Value>,
    #[serde(default)]
    indexes: Option<String>,
}

impl StoredMetadata {
    fn version(&self) -> Option<u32> {
        match self.version.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Path of the backing file for `spec` in `dir`.
pub fn index_file(dir: &Path, spec: &IndexSpec) -> PathBuf {
    dir.join(format!("{INDEX_FILE_PREFIX}{spec}.dat"))
}

fn read_json<T: DeserializeOwned>(dir: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(dir.join(METADATA_FILE)) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn read_metadata(dir: &Path) -> Result<Option<StoredMetadata>> {
    read_json(dir)
}

fn write_metadata(dir: &Path, specs: &[IndexSpec], force_sync: bool) -> Result<()> {
    let metadata = TripleStoreMetadata {
        version: CURRENT_VERSION,
        indexes: IndexSpec::format_list(specs),
        updated: Utc::now(),
    };
    let bytes = serde_json::to_vec_pretty(&metadata)?;
    recfile::write_atomic(&dir.join(METADATA_FILE), &bytes, force_sync)?;
    debug!("Wrote {} with indexes {}", METADATA_FILE, metadata.indexes);
    Ok(())
}

/// Reads `triples.json` from `dir`, if present and well formed.
pub fn load_metadata(dir: &Path) -> Result<Option<TripleStoreMetadata>> {
    read_json(dir)
}

fn open_index(dir: &Path, spec: IndexSpec, force_sync: bool) -> Result<RecordIndex> {
    Ok(RecordIndex::open(
        &index_file(dir, &spec),
        RECORD_LEN,
        Arc::new(spec),
        force_sync,
    )?)
}

/// Make `new` the configured index list of `dir`.
///
/// Indexes missing from `current` are built out of the first current index,
/// then `triples.json` is rewritten. Files of dropped indexes are left for
/// [`delete_removed`]. On failure the built files are deleted and `current`
/// stays the configuration on disk.
fn switch_indexes(dir: &Path, current: &[IndexSpec], new: &[IndexSpec], force_sync: bool) -> Result<()> {
    let added: Vec<IndexSpec> = new.iter().filter(|s| !current.contains(s)).copied().collect();
    let mut built: Vec<PathBuf> = Vec::new();
    let switched = build_added(dir, current, &added, force_sync, &mut built)
        .and_then(|()| write_metadata(dir, new, force_sync));
    if let Err(e) = switched {
        for path in &built {
            if let Err(del) = RecordIndex::delete_file(path) {
                warn!("Unable to delete partially built index {:?}: {}", path, del);
            }
        }
        return Err(e);
    }
    if !added.is_empty() {
        info!(
            "Indexes switched to [{}], added [{}]",
            IndexSpec::format_list(new),
            IndexSpec::format_list(&added)
        );
    }
    Ok(())
}

fn build_added(
    dir: &Path,
    current: &[IndexSpec],
    added: &[IndexSpec],
    force_sync: bool,
    built: &mut Vec<PathBuf>,
) -> Result<()> {
    if added.is_empty() {
        return Ok(());
    }
    let source_spec = current
        .first()
        .ok_or_else(|| StoreError::Config("no existing index to build from".into()))?;
    let source_path = index_file(dir, source_spec);
    if !source_path.exists() {
        return Err(StoreError::Config(format!(
            "index file {} for '{}' is missing",
            source_path.display(),
            source_spec
        )));
    }
    let source = open_index(dir, *source_spec, force_sync)?;
    for spec in added {
        debug!("Initializing new index '{spec}' from '{source_spec}'...");
        let path = index_file(dir, spec);
        built.push(path.clone());
        if let Err(e) = build_index(&source, &path, *spec, force_sync) {
            let _ = source.close();
            return Err(e);
        }
    }
    source.close()?;
    debug!("New index(es) initialized");
    Ok(())
}

/// Delete the files of indexes in `current` that `new` dropped.
///
/// Every file is attempted; the first failure is returned.
fn delete_removed(dir: &Path, current: &[IndexSpec], new: &[IndexSpec]) -> Result<()> {
    let removed: Vec<IndexSpec> = current.iter().filter(|s| !new.contains(s)).copied().collect();
    let mut failed: Vec<IndexSpec> = Vec::new();
    let mut first_error = None;
    for spec in &removed {
        match RecordIndex::delete_file(&index_file(dir, spec)) {
            Ok(true) => debug!("Deleted file for removed {spec} index"),
            Ok(false) => warn!("No file found for removed {spec} index"),
            Err(e) => {
                warn!("Unable to delete file for removed {spec} index: {e}");
                failed.push(*spec);
                first_error.get_or_insert(e);
            }
        }
    }
    if !removed.is_empty() {
        info!(
            "Removed indexes [{}], could not delete [{}]",
            IndexSpec::format_list(&removed),
            IndexSpec::format_list(&failed)
        );
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn build_index(source: &RecordIndex, path: &Path, spec: IndexSpec, force_sync: bool) -> Result<()> {
    RecordIndex::delete_file(path)?;
    let target = RecordIndex::open(path, RECORD_LEN, Arc::new(spec), force_sync)?;
    for record in source.iter_all() {
        target.insert(&record?)?;
    }
    target.close()?;
    Ok(())
}

struct TripleIndex {
    spec: IndexSpec,
    records: RecordIndex,
}

pub struct TripleStore {
    dir: PathBuf,
    force_sync: bool,
    indexes: Vec<TripleIndex>,
}

impl fmt::Debug for TripleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TripleStore")
            .field("dir", &self.dir)
            .field("indexes", &IndexSpec::format_list(&self.index_specs()))
            .finish()
    }
}

impl TripleStore {
    /// Open the triple store in `dir` with the given index list.
    ///
    /// Indexes added to or removed from the list since the last open are
    /// built or deleted before the store becomes usable.
    pub fn open(dir: &Path, index_spec: &str, force_sync: bool) -> Result<Self> {
        if !dir.is_dir() {
            return Err(StoreError::Config(format!(
                "data directory {} does not exist",
                dir.display()
            )));
        }
        if index_spec.trim().is_empty() {
            info!("No indexes specified, defaulting to indexes: {DEFAULT_INDEXES}");
        }
        let specs = IndexSpec::parse_list(index_spec)?;

        let stored = read_metadata(dir)?;
        let mut rewrite = stored.is_none();
        if let Some(stored) = &stored {
            match stored.version() {
                Some(v) if v < MINIMUM_VERSION => {
                    return Err(StoreError::IncompatibleFormat {
                        found: v,
                        minimum: MINIMUM_VERSION,
                    })
                }
                Some(v) if v > CURRENT_VERSION => {
                    warn!("{METADATA_FILE} has version {v}, newer than supported {CURRENT_VERSION}");
                }
                Some(CURRENT_VERSION) => {}
                Some(_) => rewrite = true,
                None => {
                    warn!("{METADATA_FILE} has a missing or malformed version; assuming {CURRENT_VERSION}");
                    rewrite = true;
                }
            }
            match &stored.indexes {
                Some(persisted) => {
                    let current = IndexSpec::parse_tokens(persisted)?;
                    if current.is_empty() {
                        return Err(StoreError::Config(format!(
                            "invalid index specification found in {METADATA_FILE}"
                        )));
                    }
                    if current != specs {
                        switch_indexes(dir, &current, &specs, force_sync)?;
                        rewrite = false;
                        delete_removed(dir, &current, &specs)?;
                    } else if persisted.as_str() != IndexSpec::format_list(&specs) {
                        rewrite = true;
                    }
                }
                None => rewrite = true,
            }
        }

        let mut indexes = Vec::with_capacity(specs.len());
        for spec in &specs {
            debug!("Activating index '{spec}'...");
            indexes.push(TripleIndex {
                spec: *spec,
                records: open_index(dir, *spec, force_sync)?,
            });
        }
        if rewrite {
            write_metadata(dir, &specs, force_sync)?;
        }
        Ok(TripleStore {
            dir: dir.to_path_buf(),
            force_sync,
            indexes,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Active indexes, primary first.
    pub fn index_specs(&self) -> Vec<IndexSpec> {
        self.indexes.iter().map(|i| i.spec).collect()
    }

    fn primary(&self) -> Result<&RecordIndex> {
        self.indexes
            .first()
            .map(|i| &i.records)
            .ok_or_else(|| StoreError::Config("triple store has no indexes".into()))
    }

    /// Change the active index list of an open store.
    ///
    /// Pending changes are synced first. Requires exclusive access.
    pub fn reindex(&mut self, new_spec: &str) -> Result<()> {
        let new = IndexSpec::parse_list(new_spec)?;
        let current = self.index_specs();
        if new == current {
            return Ok(());
        }
        self.commit()?;
        for index in &self.indexes {
            index.records.close()?;
        }

        let switched = switch_indexes(&self.dir, &current, &new, self.force_sync);
        let active = if switched.is_ok() { &new } else { &current };
        let mut reopened = Vec::with_capacity(active.len());
        for spec in active {
            reopened.push(TripleIndex {
                spec: *spec,
                records: open_index(&self.dir, *spec, self.force_sync)?,
            });
        }
        self.indexes = reopened;
        switched?;
        delete_removed(&self.dir, &current, &new)
    }

    /// Index to scan for `pattern` and its score: the highest scoring index,
    /// the earliest one on ties.
    pub fn select_index(&self, pattern: &QuadPattern) -> (usize, usize) {
        let mut best = (0, 0);
        for (i, index) in self.indexes.iter().enumerate() {
            let score = index.spec.pattern_score(pattern);
            if score > best.1 {
                best = (i, score);
            }
        }
        best
    }

    /// Records matching `pattern`.
    pub fn get_triples(&self, pattern: &QuadPattern) -> Result<TripleIter<'_>> {
        let (position, score) = self.select_index(pattern);
        let index = self
            .indexes
            .get(position)
            .ok_or_else(|| StoreError::Config("triple store has no indexes".into()))?;
        let key = pattern.search_key();
        let mask = pattern.search_mask();
        let inner = if score == 0 {
            index.records.iter_values(&key, &mask)
        } else {
            let (min, max) = pattern.range_bounds();
            index.records.iter_range(&key, &mask, &min, &max)
        };
        Ok(TripleIter { inner })
    }

    /// Every record of the index at `position`, in that index's order.
    pub fn scan_index(&self, position: usize) -> Option<TripleIter<'_>> {
        self.indexes.get(position).map(|index| TripleIter {
            inner: index.records.iter_all(),
        })
    }

    pub fn count_triples(&self, pattern: &QuadPattern) -> Result<usize> {
        if *pattern == QuadPattern::all() {
            return Ok(self.primary()?.len());
        }
        let mut count = 0;
        for record in self.get_triples(pattern)? {
            record?;
            count += 1;
        }
        Ok(count)
    }

    /// Distinct non-default context ids, ascending.
    pub fn contexts(&self) -> Result<Vec<i32>> {
        let mut contexts = BTreeSet::new();
        for record in self.get_triples(&QuadPattern::all())? {
            let record = record?;
            if record.ctx != DEFAULT_CONTEXT {
                contexts.insert(record.ctx);
            }
        }
        Ok(contexts.into_iter().collect())
    }

    /// Store a quad. Returns `true` if it was not present in any form.
    ///
    /// A quad stored as inferred that already exists as explicit stays explicit.
    pub fn store_triple(&self, subj: i32, pred: i32, obj: i32, ctx: i32, explicit: bool) -> Result<bool> {
        let data = encode(subj, pred, obj, ctx, explicit);
        let primary = self.primary()?;
        let previous = primary.insert(&data)?;

        let stored = match &previous {
            None => data,
            Some(prev) => {
                let mut merged = data;
                merged[FLAG_IDX] |= prev[FLAG_IDX];
                if merged != data {
                    primary.insert(&merged)?;
                }
                if prev.as_slice() == merged.as_slice() {
                    return Ok(false);
                }
                merged
            }
        };
        for index in &self.indexes[1..] {
            index.records.insert(&stored)?;
        }
        Ok(previous.is_none())
    }

    /// Remove every quad matching `pattern` from every index.
    pub fn remove_triples(&self, pattern: &QuadPattern) -> Result<usize> {
        let matches: Vec<QuadRecord> = self.get_triples(pattern)?.collect::<Result<_>>()?;
        for record in &matches {
            let data = record.encode();
            for index in &self.indexes {
                index.records.remove(&data)?;
            }
        }
        Ok(matches.len())
    }

    /// Make every change since the last commit durable.
    ///
    /// Every dirty index is written to its temporary file before any of them
    /// replaces its file, so a failed write leaves all files at the previous
    /// commit and every index dirty for [`rollback`](Self::rollback).
    pub fn commit(&self) -> Result<()> {
        let mut prepared = Vec::with_capacity(self.indexes.len());
        for index in &self.indexes {
            if let Some(pending) = index.records.prepare_sync()? {
                prepared.push(pending);
            }
        }
        for pending in prepared {
            pending.finish()?;
        }
        Ok(())
    }

    /// Discard every change since the last commit.
    pub fn rollback(&self) -> Result<()> {
        for index in &self.indexes {
            index.records.revert()?;
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.commit()
    }

    pub fn clear(&self) -> Result<()> {
        for index in &self.indexes {
            index.records.clear()?;
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        for index in &self.indexes {
            index.records.close()?;
        }
        Ok(())
    }
}

/// Decoded records from one index scan.
pub struct TripleIter<'a> {
    inner: RecordIter<'a>,
}

impl Iterator for TripleIter<'_> {
    type Item = Result<QuadRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.inner.next()?;
        Some(record.map_err(StoreError::from).and_then(|r| QuadRecord::decode(&r)))
    }
}
