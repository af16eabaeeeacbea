//! Binary encodings used by the stores.
//!
//! Quad records are 17 bytes: subject, predicate, object and context ids as
//! big-endian `i32` at offsets 0, 4, 8 and 12, then a flag byte whose low bit
//! marks the statement as explicit.
//!
//! Terms are stored as a discriminant byte followed by a kind-specific body:
//!
//! | kind    | layout                                                         |
//! |---------|----------------------------------------------------------------|
//! | URI     | `0x1`, namespace id (`i32` BE), local name (UTF-8)             |
//! | BNode   | `0x2`, label (UTF-8)                                           |
//! | Literal | `0x3`, datatype id (`i32` BE, 0 = none), lang length (`u8`), lang, label |

use std::fmt;

use log::warn;
use recfile::KeyOrder;

use crate::consts::*;
use crate::errors::{Result, StoreError};
use crate::options::ExplicitFilter;

/// A decoded quad record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuadRecord {
    pub subj: i32,
    pub pred: i32,
    pub obj: i32,
    pub ctx: i32,
    pub explicit: bool,
}

impl QuadRecord {
    pub fn new(subj: i32, pred: i32, obj: i32, ctx: i32, explicit: bool) -> Self {
        QuadRecord {
            subj,
            pred,
            obj,
            ctx,
            explicit,
        }
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        encode(self.subj, self.pred, self.obj, self.ctx, self.explicit)
    }

    pub fn decode(record: &[u8]) -> Result<Self> {
        decode(record)
    }

    pub fn field(&self, field: Field) -> i32 {
        match field {
            Field::Subject => self.subj,
            Field::Predicate => self.pred,
            Field::Object => self.obj,
            Field::Context => self.ctx,
        }
    }
}

pub fn encode(subj: i32, pred: i32, obj: i32, ctx: i32, explicit: bool) -> [u8; RECORD_LEN] {
    let mut record = [0u8; RECORD_LEN];
    record[SUBJ_IDX..SUBJ_IDX + 4].copy_from_slice(&subj.to_be_bytes());
    record[PRED_IDX..PRED_IDX + 4].copy_from_slice(&pred.to_be_bytes());
    record[OBJ_IDX..OBJ_IDX + 4].copy_from_slice(&obj.to_be_bytes());
    record[CONTEXT_IDX..CONTEXT_IDX + 4].copy_from_slice(&ctx.to_be_bytes());
    if explicit {
        record[FLAG_IDX] = EXPLICIT_FLAG;
    }
    record
}

pub fn decode(record: &[u8]) -> Result<QuadRecord> {
    if record.len() != RECORD_LEN {
        return Err(recfile::Error::Invalid("quad record must be 17 bytes").into());
    }
    Ok(QuadRecord {
        subj: read_i32(record, SUBJ_IDX),
        pred: read_i32(record, PRED_IDX),
        obj: read_i32(record, OBJ_IDX),
        ctx: read_i32(record, CONTEXT_IDX),
        explicit: record[FLAG_IDX] & EXPLICIT_FLAG != 0,
    })
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// One of the four positions of a quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Subject,
    Predicate,
    Object,
    Context,
}

impl Field {
    /// Byte offset of the field in a quad record.
    pub fn offset(self) -> usize {
        match self {
            Field::Subject => SUBJ_IDX,
            Field::Predicate => PRED_IDX,
            Field::Object => OBJ_IDX,
            Field::Context => CONTEXT_IDX,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Field::Subject => 's',
            Field::Predicate => 'p',
            Field::Object => 'o',
            Field::Context => 'c',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            's' => Some(Field::Subject),
            'p' => Some(Field::Predicate),
            'o' => Some(Field::Object),
            'c' => Some(Field::Context),
            _ => None,
        }
    }
}

/// A quad pattern over term ids; [`WILDCARD`] matches any value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadPattern {
    pub subj: i32,
    pub pred: i32,
    pub obj: i32,
    pub ctx: i32,
    pub explicit: ExplicitFilter,
}

impl QuadPattern {
    pub fn new(subj: i32, pred: i32, obj: i32, ctx: i32) -> Self {
        QuadPattern {
            subj,
            pred,
            obj,
            ctx,
            explicit: ExplicitFilter::Any,
        }
    }

    pub fn all() -> Self {
        QuadPattern::new(WILDCARD, WILDCARD, WILDCARD, WILDCARD)
    }

    pub fn with_explicit(mut self, explicit: impl Into<ExplicitFilter>) -> Self {
        self.explicit = explicit.into();
        self
    }

    pub fn field(&self, field: Field) -> i32 {
        match field {
            Field::Subject => self.subj,
            Field::Predicate => self.pred,
            Field::Object => self.obj,
            Field::Context => self.ctx,
        }
    }

    pub fn is_bound(&self, field: Field) -> bool {
        self.field(field) != WILDCARD
    }

    /// Search key: bound ids in place, wildcards zeroed.
    pub fn search_key(&self) -> [u8; RECORD_LEN] {
        let mut key = [0u8; RECORD_LEN];
        for field in ALL_FIELDS {
            if self.is_bound(field) {
                let at = field.offset();
                key[at..at + 4].copy_from_slice(&self.field(field).to_be_bytes());
            }
        }
        key[FLAG_IDX] = self.explicit.flag_key_mask().0;
        key
    }

    /// Search mask: `0xFF` over bound fields, zero over wildcards. The flag
    /// byte is masked only when explicit/inferred status is constrained.
    pub fn search_mask(&self) -> [u8; RECORD_LEN] {
        let mut mask = [0u8; RECORD_LEN];
        for field in ALL_FIELDS {
            if self.is_bound(field) {
                let at = field.offset();
                mask[at..at + 4].fill(0xFF);
            }
        }
        mask[FLAG_IDX] = self.explicit.flag_key_mask().1;
        mask
    }

    /// Smallest and largest records that can match the pattern.
    ///
    /// Wildcards become `0x00..` in `min` and `0xFF..` in `max`. Both are
    /// records in natural field order; an index maps them to its own sort
    /// order, which turns the bound prefix of its permutation into a range.
    pub fn range_bounds(&self) -> ([u8; RECORD_LEN], [u8; RECORD_LEN]) {
        let mut min = [0u8; RECORD_LEN];
        let mut max = [0xFFu8; RECORD_LEN];
        for field in ALL_FIELDS {
            if self.is_bound(field) {
                let at = field.offset();
                let bytes = self.field(field).to_be_bytes();
                min[at..at + 4].copy_from_slice(&bytes);
                max[at..at + 4].copy_from_slice(&bytes);
            }
        }
        min[FLAG_IDX] = 0;
        max[FLAG_IDX] = 0xFF;
        (min, max)
    }
}

const ALL_FIELDS: [Field; 4] = [Field::Subject, Field::Predicate, Field::Object, Field::Context];

/// A field order for one triple index, e.g. `spoc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    fields: [Field; 4],
}

impl IndexSpec {
    /// Parse a four-letter permutation of `s`, `p`, `o` and `c` (case-insensitive).
    pub fn parse(name: &str) -> Result<Self> {
        let lower = name.to_lowercase();
        let invalid = || StoreError::Config(format!("invalid index specification '{name}'"));
        let mut fields = [Field::Subject; 4];
        let mut chars = lower.chars();
        for slot in fields.iter_mut() {
            *slot = chars.next().and_then(Field::from_letter).ok_or_else(invalid)?;
        }
        if chars.next().is_some() {
            return Err(invalid());
        }
        for field in ALL_FIELDS {
            if !fields.contains(&field) {
                return Err(invalid());
            }
        }
        Ok(IndexSpec { fields })
    }

    /// Parse a comma or whitespace separated list, keeping the given order.
    ///
    /// An empty list yields the default `spoc,posc`. Repeated entries are
    /// dropped with a warning.
    pub fn parse_list(spec: &str) -> Result<Vec<IndexSpec>> {
        let specs = IndexSpec::parse_tokens(spec)?;
        if specs.is_empty() {
            return IndexSpec::parse_tokens(DEFAULT_INDEXES);
        }
        Ok(specs)
    }

    /// Like [`IndexSpec::parse_list`] without the default for an empty list.
    pub fn parse_tokens(spec: &str) -> Result<Vec<IndexSpec>> {
        let mut specs: Vec<IndexSpec> = Vec::new();
        for token in spec
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let parsed = IndexSpec::parse(token).map_err(|_| {
                StoreError::Config(format!(
                    "invalid value '{token}' in index specification: {spec}"
                ))
            })?;
            if specs.contains(&parsed) {
                warn!("Ignoring duplicate index '{parsed}' in '{spec}'");
                continue;
            }
            specs.push(parsed);
        }
        Ok(specs)
    }

    pub fn format_list(specs: &[IndexSpec]) -> String {
        specs
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn fields(&self) -> &[Field; 4] {
        &self.fields
    }

    /// Number of leading fields of this index that the pattern binds.
    pub fn pattern_score(&self, pattern: &QuadPattern) -> usize {
        self.fields
            .iter()
            .take_while(|f| pattern.is_bound(**f))
            .count()
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in self.fields {
            write!(f, "{}", field.letter())?;
        }
        Ok(())
    }
}

impl KeyOrder for IndexSpec {
    fn sort_key(&self, record: &[u8], out: &mut Vec<u8>) {
        for field in self.fields {
            let at = field.offset();
            out.extend_from_slice(&record[at..at + 4]);
        }
    }
}

/// Binary form of a term, with namespace and datatype already interned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedTerm {
    Uri { namespace_id: i32, local_name: String },
    BNode { label: String },
    Literal {
        datatype_id: i32,
        language: Option<String>,
        label: String,
    },
}

impl EncodedTerm {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            EncodedTerm::Uri {
                namespace_id,
                local_name,
            } => {
                out.reserve(5 + local_name.len());
                out.push(URI_VALUE);
                out.extend_from_slice(&namespace_id.to_be_bytes());
                out.extend_from_slice(local_name.as_bytes());
            }
            EncodedTerm::BNode { label } => {
                out.reserve(1 + label.len());
                out.push(BNODE_VALUE);
                out.extend_from_slice(label.as_bytes());
            }
            EncodedTerm::Literal {
                datatype_id,
                language,
                label,
            } => {
                let lang = language.as_deref().unwrap_or("");
                let lang_len = u8::try_from(lang.len()).map_err(|_| {
                    StoreError::InvalidTerm(format!(
                        "language tag of {} bytes exceeds 255",
                        lang.len()
                    ))
                })?;
                out.reserve(6 + lang.len() + label.len());
                out.push(LITERAL_VALUE);
                out.extend_from_slice(&datatype_id.to_be_bytes());
                out.push(lang_len);
                out.extend_from_slice(lang.as_bytes());
                out.extend_from_slice(label.as_bytes());
            }
        }
        Ok(out)
    }

    /// Decode a stored term. The error string describes what is wrong.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, String> {
        let (&kind, body) = data.split_first().ok_or("empty value")?;
        match kind {
            URI_VALUE => {
                if body.len() < 4 {
                    return Err("truncated URI".into());
                }
                Ok(EncodedTerm::Uri {
                    namespace_id: read_i32(body, 0),
                    local_name: utf8(&body[4..])?,
                })
            }
            BNODE_VALUE => Ok(EncodedTerm::BNode { label: utf8(body)? }),
            LITERAL_VALUE => {
                if body.len() < 5 {
                    return Err("truncated literal".into());
                }
                let datatype_id = read_i32(body, 0);
                let lang_len = body[4] as usize;
                let rest = &body[5..];
                if rest.len() < lang_len {
                    return Err("truncated language tag".into());
                }
                let language = if lang_len == 0 {
                    None
                } else {
                    Some(utf8(&rest[..lang_len])?)
                };
                Ok(EncodedTerm::Literal {
                    datatype_id,
                    language,
                    label: utf8(&rest[lang_len..])?,
                })
            }
            other => Err(format!("unknown value type {other:#x}")),
        }
    }
}

fn utf8(bytes: &[u8]) -> std::result::Result<String, String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string())
}
