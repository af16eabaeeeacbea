//! Constants shared by the record codec, the stores and the on-disk layout.

/// Id used in search patterns to match any value. Never stored.
pub const WILDCARD: i32 = -1;
/// Id that never denotes a real term.
pub const UNKNOWN_ID: i32 = 0;
/// Context id of the default graph.
pub const DEFAULT_CONTEXT: i32 = 0;

// quad records
pub const SUBJ_IDX: usize = 0;
pub const PRED_IDX: usize = 4;
pub const OBJ_IDX: usize = 8;
pub const CONTEXT_IDX: usize = 12;
pub const FLAG_IDX: usize = 16;
pub const RECORD_LEN: usize = 17;
pub const EXPLICIT_FLAG: u8 = 0x1;

// triple store layout
pub const DEFAULT_INDEXES: &str = "spoc,posc";
pub const CURRENT_VERSION: u32 = 10;
pub const MINIMUM_VERSION: u32 = 10;
pub const METADATA_FILE: &str = "triples.json";
pub const INDEX_FILE_PREFIX: &str = "triples-";

// value store layout
pub const VALUES_FILE: &str = "values.dat";
pub const NAMESPACES_FILE: &str = "namespaces.dat";
pub const VALUE_CACHE_SIZE: usize = 512;
pub const VALUE_ID_CACHE_SIZE: usize = 128;
pub const NAMESPACE_CACHE_SIZE: usize = 64;
pub const NAMESPACE_ID_CACHE_SIZE: usize = 32;

// term encoding discriminants
pub const URI_VALUE: u8 = 0x1;
pub const BNODE_VALUE: u8 = 0x2;
pub const LITERAL_VALUE: u8 = 0x3;

/// Store configuration file written by the CLI next to the data files.
pub const CONFIG_FILE: &str = "nativerdf.json";
