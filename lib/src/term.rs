//! RDF terms as the store sees them.
//!
//! [`Term`] is a plain value. [`NativeTerm`] pairs a term with the id a
//! particular value store assigned to it, stamped with that store's identity
//! and revision so the id can be trusted only while the store has not been
//! cleared.

use std::fmt;
use std::hash::{Hash, Hasher};

#[cfg(feature = "oxigraph")]
use crate::errors::{Result, StoreError};

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Iri(String),
    BNode(String),
    Literal {
        label: String,
        datatype: Option<String>,
        language: Option<String>,
    },
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    pub fn bnode(label: impl Into<String>) -> Self {
        Term::BNode(label.into())
    }

    pub fn literal(label: impl Into<String>) -> Self {
        Term::Literal {
            label: label.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed_literal(label: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            label: label.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    pub fn lang_literal(label: impl Into<String>, language: impl Into<String>) -> Self {
        Term::Literal {
            label: label.into(),
            datatype: None,
            language: Some(language.into()),
        }
    }

    /// True for IRIs and blank nodes, the terms allowed in subject and context position.
    pub fn is_resource(&self) -> bool {
        !matches!(self, Term::Literal { .. })
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    /// Parse the N-Triples-like syntax produced by `Display`:
    /// `<iri>`, `_:label`, `"label"`, `"label"@lang` or `"label"^^<datatype>`.
    /// Anything else is taken as a bare IRI.
    pub fn parse(s: &str) -> Option<Term> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if let Some(iri) = s.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
            return Some(Term::iri(iri));
        }
        if let Some(label) = s.strip_prefix("_:") {
            return Some(Term::bnode(label));
        }
        if let Some(rest) = s.strip_prefix('"') {
            let close = find_closing_quote(rest)?;
            let label = unescape(&rest[..close]);
            let suffix = &rest[close + 1..];
            if suffix.is_empty() {
                return Some(Term::literal(label));
            }
            if let Some(lang) = suffix.strip_prefix('@') {
                return Some(Term::lang_literal(label, lang));
            }
            let dt = suffix
                .strip_prefix("^^<")
                .and_then(|r| r.strip_suffix('>'))?;
            return Some(Term::typed_literal(label, dt));
        }
        Some(Term::iri(s))
    }
}

fn find_closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{c}")?,
        }
    }
    Ok(())
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::BNode(label) => write!(f, "_:{label}"),
            Term::Literal {
                label,
                datatype,
                language,
            } => {
                f.write_str("\"")?;
                write_escaped(f, label)?;
                f.write_str("\"")?;
                if let Some(lang) = language {
                    write!(f, "@{lang}")
                } else if let Some(dt) = datatype {
                    write!(f, "^^<{dt}>")
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Splits an IRI into namespace and local name.
///
/// The local name starts after the last `#`, else the last `/`, else the last
/// `:`. Without any of these the namespace is empty.
pub fn split_iri(iri: &str) -> (&str, &str) {
    let split = iri
        .rfind('#')
        .or_else(|| iri.rfind('/'))
        .or_else(|| iri.rfind(':'))
        .map(|i| i + 1)
        .unwrap_or(0);
    iri.split_at(split)
}

/// An id assigned by one value store, valid for one of its revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdStamp {
    pub store_id: u64,
    pub revision: u64,
    pub id: i32,
}

/// A [`Term`] carrying the id a value store assigned to it, if any.
///
/// Equality and hashing only look at the term.
#[derive(Debug, Clone)]
pub struct NativeTerm {
    term: Term,
    stamp: Option<IdStamp>,
}

impl NativeTerm {
    pub fn new(term: Term) -> Self {
        NativeTerm { term, stamp: None }
    }

    pub fn term(&self) -> &Term {
        &self.term
    }

    pub fn into_term(self) -> Term {
        self.term
    }

    pub fn stamp(&self) -> Option<IdStamp> {
        self.stamp
    }

    pub(crate) fn with_stamp(term: Term, stamp: IdStamp) -> Self {
        NativeTerm {
            term,
            stamp: Some(stamp),
        }
    }

    pub(crate) fn set_stamp(&mut self, stamp: IdStamp) {
        self.stamp = Some(stamp);
    }

    pub(crate) fn clear_stamp(&mut self) {
        self.stamp = None;
    }
}

impl From<Term> for NativeTerm {
    fn from(term: Term) -> Self {
        NativeTerm::new(term)
    }
}

impl PartialEq for NativeTerm {
    fn eq(&self, other: &Self) -> bool {
        self.term == other.term
    }
}

impl Eq for NativeTerm {}

impl PartialEq<Term> for NativeTerm {
    fn eq(&self, other: &Term) -> bool {
        &self.term == other
    }
}

impl Hash for NativeTerm {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.term.hash(state);
    }
}

impl fmt::Display for NativeTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.term.fmt(f)
    }
}

// ---------------- Oxigraph helpers ----------------

#[cfg(feature = "oxigraph")]
impl Term {
    pub fn from_oxigraph(t: oxigraph::model::TermRef<'_>) -> Result<Term> {
        use oxigraph::model::TermRef as TR;
        match t {
            TR::NamedNode(n) => Ok(Term::iri(n.as_str())),
            TR::BlankNode(b) => Ok(Term::bnode(b.as_str())),
            TR::Literal(l) => {
                let label = l.value().to_string();
                if let Some(lang) = l.language() {
                    Ok(Term::lang_literal(label, lang))
                } else if l.datatype().as_str() == XSD_STRING {
                    Ok(Term::literal(label))
                } else {
                    Ok(Term::typed_literal(label, l.datatype().as_str()))
                }
            }
            #[allow(unreachable_patterns)]
            _ => Err(StoreError::InvalidTerm(format!("unsupported term {t}"))),
        }
    }

    pub fn from_oxigraph_resource(n: &oxigraph::model::NamedOrBlankNode) -> Result<Term> {
        use oxigraph::model::NamedOrBlankNode;
        match n {
            NamedOrBlankNode::NamedNode(n) => Ok(Term::iri(n.as_str())),
            NamedOrBlankNode::BlankNode(b) => Ok(Term::bnode(b.as_str())),
            #[allow(unreachable_patterns)]
            _ => Err(StoreError::InvalidTerm(format!("unsupported resource {n}"))),
        }
    }

    pub fn to_oxigraph(&self) -> Result<oxigraph::model::Term> {
        use oxigraph::model::{BlankNode, Literal, NamedNode};
        let invalid = |what: &str| StoreError::InvalidTerm(format!("{what}: {self}"));
        Ok(match self {
            Term::Iri(iri) => NamedNode::new(iri.as_str())
                .map_err(|_| invalid("invalid IRI"))?
                .into(),
            Term::BNode(label) => BlankNode::new(label.as_str())
                .map_err(|_| invalid("invalid blank node"))?
                .into(),
            Term::Literal {
                label,
                datatype,
                language,
            } => {
                if let Some(lang) = language {
                    Literal::new_language_tagged_literal(label.as_str(), lang.as_str())
                        .map_err(|_| invalid("invalid lang tag"))?
                        .into()
                } else if let Some(dt) = datatype {
                    let nn = NamedNode::new(dt.as_str()).map_err(|_| invalid("invalid datatype IRI"))?;
                    Literal::new_typed_literal(label.as_str(), nn).into()
                } else {
                    Literal::new_simple_literal(label.as_str()).into()
                }
            }
        })
    }
}
