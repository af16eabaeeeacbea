//! Append-only store of variable-length byte strings.
//!
//! File layout: `header | (len_u32_be | bytes)*`. Entry ids are 1-based
//! ordinals in file order, so an id never changes once assigned. Opening a
//! store scans the file once to rebuild the offset table and the content hash
//! map used by [`DataStore::get_id`].

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::header::{FileKind, HEADER_LEN, Header};
use crate::{Error, Result};

struct Inner {
    header: Header,
    writer: Option<BufWriter<File>>,
    reader: File,
    offsets: Vec<u64>,
    by_hash: HashMap<blake3::Hash, i32>,
    end: u64,
    unflushed: bool,
}

pub struct DataStore {
    path: PathBuf,
    force_sync: bool,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore").field("path", &self.path).finish()
    }
}

impl DataStore {
    /// Open (or create) the store at `path`.
    ///
    /// A trailing entry cut short by a crash is dropped with a warning.
    pub fn open(path: &Path, force_sync: bool) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let header = if file.metadata()?.len() == 0 {
            debug!("Creating data store {:?}", path);
            let header = Header::new(FileKind::DataStore, 0);
            file.write_all(&header.to_bytes())?;
            if force_sync {
                file.sync_all()?;
            }
            header
        } else {
            let mut buf = [0u8; HEADER_LEN];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf).map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => Error::Invalid("short or invalid header"),
                _ => Error::Io(e),
            })?;
            Header::expect(&buf, FileKind::DataStore)?
        };

        let (offsets, by_hash, end) = scan(path, &file)?;
        let file_len = file.metadata()?.len();
        if end < file_len {
            warn!(
                "{:?}: dropping {} bytes of truncated trailing entry",
                path,
                file_len - end
            );
            file.set_len(end)?;
        }
        file.seek(SeekFrom::Start(end))?;
        let reader = File::open(path)?;

        Ok(DataStore {
            path: path.to_path_buf(),
            force_sync,
            inner: Mutex::new(Inner {
                header,
                writer: Some(BufWriter::new(file)),
                reader,
                offsets,
                by_hash,
                end,
                unflushed: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest id assigned so far (0 when empty).
    pub fn max_id(&self) -> i32 {
        self.inner.lock().offsets.len() as i32
    }

    /// Fetch the bytes stored under `id`, or `None` if no such entry exists.
    pub fn get(&self, id: i32) -> Result<Option<Vec<u8>>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let writer = inner.writer.as_mut().ok_or_else(|| self.closed())?;
        if id <= 0 || id as usize > inner.offsets.len() {
            return Ok(None);
        }
        if inner.unflushed {
            writer.flush()?;
            inner.unflushed = false;
        }
        let offset = inner.offsets[id as usize - 1];
        let reader = &mut inner.reader;
        reader.seek(SeekFrom::Start(offset))?;
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let mut data = vec![0u8; u32::from_be_bytes(len) as usize];
        reader.read_exact(&mut data)?;
        Ok(Some(data))
    }

    /// Id of the entry holding exactly `data`, or 0 if there is none.
    pub fn get_id(&self, data: &[u8]) -> Result<i32> {
        let inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(self.closed());
        }
        Ok(inner
            .by_hash
            .get(&blake3::hash(data))
            .copied()
            .unwrap_or(0))
    }

    /// Append `data` unless an identical entry exists; returns its id.
    pub fn store(&self, data: &[u8]) -> Result<i32> {
        if data.len() > u32::MAX as usize {
            return Err(Error::Invalid("entry too large"));
        }
        let hash = blake3::hash(data);
        let mut inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(self.closed());
        }
        if let Some(id) = inner.by_hash.get(&hash) {
            return Ok(*id);
        }
        if inner.offsets.len() >= i32::MAX as usize {
            return Err(Error::Invalid("data store id space exhausted"));
        }
        let offset = inner.end;
        let mut entry = Vec::with_capacity(4 + data.len());
        entry.extend_from_slice(&(data.len() as u32).to_be_bytes());
        entry.extend_from_slice(data);
        let appended = match inner.writer.as_mut() {
            Some(writer) => writer.write_all(&entry),
            None => return Err(self.closed()),
        };
        if let Err(e) = appended {
            if let Err(reset) = discard_partial(&mut inner) {
                warn!(
                    "{:?}: could not discard partial entry, refusing further writes: {}",
                    self.path, reset
                );
            }
            return Err(e.into());
        }
        inner.end = offset + 4 + data.len() as u64;
        inner.offsets.push(offset);
        let id = inner.offsets.len() as i32;
        inner.by_hash.insert(hash, id);
        inner.unflushed = true;
        Ok(id)
    }

    /// Flush buffered appends and refresh the entry count in the header.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(self.closed());
        }
        self.sync_locked(&mut inner)
    }

    fn sync_locked(&self, inner: &mut Inner) -> Result<()> {
        inner.header.count_u64 = inner.offsets.len() as u64;
        let header = inner.header.to_bytes();
        let end = inner.end;
        if let Some(writer) = inner.writer.as_mut() {
            writer.flush()?;
            let file = writer.get_mut();
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header)?;
            file.seek(SeekFrom::Start(end))?;
            if self.force_sync {
                file.sync_data()?;
            }
        }
        inner.unflushed = false;
        Ok(())
    }

    /// Drop every entry. Ids are reassigned from 1 afterwards.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(self.closed());
        }
        if let Some(writer) = inner.writer.as_mut() {
            writer.flush()?;
            writer.get_mut().set_len(HEADER_LEN as u64)?;
        }
        inner.offsets.clear();
        inner.by_hash.clear();
        inner.end = HEADER_LEN as u64;
        self.sync_locked(&mut inner)
    }

    /// Sync and release the file handles. Further calls return [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.writer.is_none() {
            return Ok(());
        }
        self.sync_locked(&mut inner)?;
        inner.writer = None;
        inner.offsets = Vec::new();
        inner.by_hash = HashMap::new();
        Ok(())
    }

    fn closed(&self) -> Error {
        Error::Closed(self.path.display().to_string())
    }
}

/// Cut the stream back to `inner.end` after a failed append.
///
/// Bytes of the failed entry may sit in the file, in the write buffer, or
/// both. Whatever precedes `inner.end` is kept. If this fails the writer is
/// gone and the store reports itself closed.
fn discard_partial(inner: &mut Inner) -> std::io::Result<()> {
    let Some(writer) = inner.writer.take() else {
        return Ok(());
    };
    let (mut file, buffered) = writer.into_parts();
    let buffered = buffered.unwrap_or_else(|panicked| panicked.into_inner());
    let written = file.stream_position()?;
    let keep_in_file = written.min(inner.end);
    let keep_buffered = ((inner.end - keep_in_file) as usize).min(buffered.len());
    file.set_len(keep_in_file)?;
    file.seek(SeekFrom::Start(keep_in_file))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&buffered[..keep_buffered])?;
    inner.writer = Some(writer);
    debug!("Discarded partial entry, resuming appends at {}", inner.end);
    Ok(())
}

type ScanResult = (Vec<u64>, HashMap<blake3::Hash, i32>, u64);

/// Walk the entries after the header. Returns the offset table, the hash map,
/// and the end of the last complete entry.
fn scan(path: &Path, file: &File) -> Result<ScanResult> {
    let mut reader = BufReader::new(file.try_clone()?);
    reader.seek(SeekFrom::Start(HEADER_LEN as u64))?;
    let mut offsets = Vec::new();
    let mut by_hash = HashMap::new();
    let mut pos = HEADER_LEN as u64;
    let mut data = Vec::new();
    loop {
        let mut len = [0u8; 4];
        match read_full(&mut reader, &mut len)? {
            0 => break,
            4 => {}
            _ => break,
        }
        let n = u32::from_be_bytes(len) as usize;
        data.resize(n, 0);
        if read_full(&mut reader, &mut data)? < n {
            break;
        }
        offsets.push(pos);
        by_hash.insert(blake3::hash(&data), offsets.len() as i32);
        pos += 4 + n as u64;
    }
    debug!("{:?}: {} entries", path, offsets.len());
    Ok((offsets, by_hash, pos))
}

/// Like `read_exact`, but reports how many bytes were read before EOF.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
