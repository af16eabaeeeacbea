//! Shared option types that replace boolean flag parameters in the Rust API.

use serde::{Deserialize, Serialize};

use crate::consts::EXPLICIT_FLAG;

/// Controls whether writes are forced to stable storage on every sync.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Leave flushed data in the OS page cache.
    #[default]
    Buffered,
    /// `fsync` data files (and their directory) on every sync.
    Force,
}

impl SyncMode {
    pub fn is_force(self) -> bool {
        matches!(self, SyncMode::Force)
    }
}

impl From<bool> for SyncMode {
    fn from(value: bool) -> Self {
        if value {
            SyncMode::Force
        } else {
            SyncMode::Buffered
        }
    }
}

impl From<SyncMode> for bool {
    fn from(value: SyncMode) -> Self {
        value.is_force()
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SyncMode::Buffered => write!(f, "buffered"),
            SyncMode::Force => write!(f, "force"),
        }
    }
}

/// Restricts a pattern to explicit or inferred statements.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum ExplicitFilter {
    #[default]
    Any,
    ExplicitOnly,
    InferredOnly,
}

impl ExplicitFilter {
    /// `Any` when inferred statements are wanted, `ExplicitOnly` otherwise.
    pub fn including_inferred(include_inferred: bool) -> Self {
        if include_inferred {
            ExplicitFilter::Any
        } else {
            ExplicitFilter::ExplicitOnly
        }
    }

    /// Flag byte and flag mask for a search key.
    pub fn flag_key_mask(self) -> (u8, u8) {
        match self {
            ExplicitFilter::Any => (0, 0),
            ExplicitFilter::ExplicitOnly => (EXPLICIT_FLAG, EXPLICIT_FLAG),
            ExplicitFilter::InferredOnly => (0, EXPLICIT_FLAG),
        }
    }
}

impl From<Option<bool>> for ExplicitFilter {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => ExplicitFilter::Any,
            Some(true) => ExplicitFilter::ExplicitOnly,
            Some(false) => ExplicitFilter::InferredOnly,
        }
    }
}

impl From<ExplicitFilter> for Option<bool> {
    fn from(value: ExplicitFilter) -> Self {
        match value {
            ExplicitFilter::Any => None,
            ExplicitFilter::ExplicitOnly => Some(true),
            ExplicitFilter::InferredOnly => Some(false),
        }
    }
}
