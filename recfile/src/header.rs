//! File header and checksum helpers shared by every recfile file.
//!
//! Layout of the 32-byte header (all integers little-endian):
//!
//! | bytes  | field            |
//! |--------|------------------|
//! | 0..4   | magic `NRDF`     |
//! | 4..6   | format version   |
//! | 6..8   | file kind        |
//! | 8..16  | created (unix s) |
//! | 16..24 | record count     |
//! | 24..28 | body CRC-32      |
//! | 28..32 | record length    |

use crate::{Error, Result};

pub const MAGIC: &[u8; 4] = b"NRDF";
pub const HEADER_LEN: usize = 32;
pub const FORMAT_VERSION: u16 = 1;

/// Enumerates the kinds of files that carry a recfile header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FileKind {
    RecordIndex = 1,
    DataStore = 2,
}

impl FileKind {
    /// Convert a little-endian `u16` value into a kind, if recognized.
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(FileKind::RecordIndex),
            2 => Some(FileKind::DataStore),
            _ => None,
        }
    }
}

/// Parsed fixed-size file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version_u16: u16,
    pub kind: FileKind,
    pub created_unix64: u64,
    pub count_u64: u64,
    pub body_crc32: u32,
    pub record_len_u32: u32,
}

impl Header {
    pub fn new(kind: FileKind, record_len: usize) -> Self {
        let created_unix64 = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Header {
            version_u16: FORMAT_VERSION,
            kind,
            created_unix64,
            count_u64: 0,
            body_crc32: 0,
            record_len_u32: record_len as u32,
        }
    }

    /// Parse a header from the first 32 bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN || &buf[0..4] != MAGIC {
            return None;
        }
        let version_u16 = u16::from_le_bytes([buf[4], buf[5]]);
        let kind = FileKind::from_u16(u16::from_le_bytes([buf[6], buf[7]]))?;
        let created_unix64 = u64::from_le_bytes(buf[8..16].try_into().ok()?);
        let count_u64 = u64::from_le_bytes(buf[16..24].try_into().ok()?);
        let body_crc32 = u32::from_le_bytes(buf[24..28].try_into().ok()?);
        let record_len_u32 = u32::from_le_bytes(buf[28..32].try_into().ok()?);
        Some(Header {
            version_u16,
            kind,
            created_unix64,
            count_u64,
            body_crc32,
            record_len_u32,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(MAGIC);
        out[4..6].copy_from_slice(&self.version_u16.to_le_bytes());
        out[6..8].copy_from_slice(&(self.kind as u16).to_le_bytes());
        out[8..16].copy_from_slice(&self.created_unix64.to_le_bytes());
        out[16..24].copy_from_slice(&self.count_u64.to_le_bytes());
        out[24..28].copy_from_slice(&self.body_crc32.to_le_bytes());
        out[28..32].copy_from_slice(&self.record_len_u32.to_le_bytes());
        out
    }

    /// Parse and check that the header belongs to a file of `kind`.
    pub fn expect(buf: &[u8], kind: FileKind) -> Result<Self> {
        let header = Header::parse(buf).ok_or(Error::Invalid("short or invalid header"))?;
        if header.kind != kind {
            return Err(Error::Corrupt(format!(
                "expected a {:?} file, found {:?}",
                kind, header.kind
            )));
        }
        if header.version_u16 > FORMAT_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported file version {}",
                header.version_u16
            )));
        }
        Ok(header)
    }
}

/// Compute IEEE CRC-32.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in data {
        let mut x = (crc ^ (b as u32)) & 0xFF;
        for _ in 0..8 {
            let lsb = x & 1;
            x >>= 1;
            if lsb != 0 {
                x ^= 0xEDB88320;
            }
        }
        crc = (crc >> 8) ^ x;
    }
    crc ^ 0xFFFF_FFFF
}
