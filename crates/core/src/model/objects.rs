//! PDF object types.
//!
//! The closed value universe of a PDF file. Objects are immutable once the
//! parser has built them; the document hands out resolved indirect objects as
//! `Arc<PDFObject>` so every holder shares one copy.

use super::name::Name;
use crate::codec::DecodedStream;
use crate::error::{PdfError, Result};
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::OnceLock;

/// A parsed PDF value.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFObject {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Name(Name),
    /// Raw bytes; PDF strings are not necessarily text.
    String(Vec<u8>),
    Array(Vec<Self>),
    Dict(Dict),
    Stream(Box<PDFStream>),
    /// `N G R`, resolved through the document's cross-reference table.
    Ref(PDFObjRef),
}

impl PDFObject {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    const fn mismatch(&self, expected: &'static str) -> PdfError {
        PdfError::TypeError {
            expected,
            got: self.type_name(),
        }
    }

    pub const fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            _ => Err(self.mismatch("bool")),
        }
    }

    pub const fn as_int(&self) -> Result<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            _ => Err(self.mismatch("int")),
        }
    }

    pub const fn as_real(&self) -> Result<f64> {
        match self {
            Self::Real(n) => Ok(*n),
            _ => Err(self.mismatch("real")),
        }
    }

    /// Integers coerce to `f64`; anything else is a type error.
    pub const fn as_num(&self) -> Result<f64> {
        match self {
            Self::Int(n) => Ok(*n as f64),
            Self::Real(n) => Ok(*n),
            _ => Err(self.mismatch("number")),
        }
    }

    pub const fn as_name(&self) -> Result<Name> {
        match self {
            Self::Name(n) => Ok(*n),
            _ => Err(self.mismatch("name")),
        }
    }

    pub fn as_string(&self) -> Result<&[u8]> {
        match self {
            Self::String(s) => Ok(s),
            _ => Err(self.mismatch("string")),
        }
    }

    pub fn as_array(&self) -> Result<&[Self]> {
        match self {
            Self::Array(items) => Ok(items),
            _ => Err(self.mismatch("array")),
        }
    }

    pub const fn as_dict(&self) -> Result<&Dict> {
        match self {
            Self::Dict(d) => Ok(d),
            _ => Err(self.mismatch("dict")),
        }
    }

    pub fn as_stream(&self) -> Result<&PDFStream> {
        match self {
            Self::Stream(s) => Ok(s),
            _ => Err(self.mismatch("stream")),
        }
    }

    pub const fn as_ref(&self) -> Result<PDFObjRef> {
        match self {
            Self::Ref(r) => Ok(*r),
            _ => Err(self.mismatch("ref")),
        }
    }

    /// The dictionary of a dict or a stream.
    pub fn dict(&self) -> Option<&Dict> {
        match self {
            Self::Dict(d) => Some(d),
            Self::Stream(s) => Some(&s.dict),
            _ => None,
        }
    }

    /// Short tag used in type errors.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Real(_) => "real",
            Self::Name(_) => "name",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Dict(_) => "dict",
            Self::Stream(_) => "stream",
            Self::Ref(_) => "ref",
        }
    }
}

impl fmt::Display for PDFObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Real(n) => write!(f, "{}", n),
            Self::Name(n) => write!(f, "{}", n),
            Self::String(s) => write_string(f, s),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Self::Dict(d) => write!(f, "{}", d),
            Self::Stream(s) => write!(f, "{} stream[{} bytes]", s.dict, s.raw.len()),
            Self::Ref(r) => write!(f, "{}", r),
        }
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &[u8]) -> fmt::Result {
    if s.iter().all(|&b| (0x20..0x7f).contains(&b)) {
        f.write_str("(")?;
        for &b in s {
            if matches!(b, b'(' | b')' | b'\\') {
                f.write_str("\\")?;
            }
            write!(f, "{}", b as char)?;
        }
        f.write_str(")")
    } else {
        f.write_str("<")?;
        for b in s {
            write!(f, "{:02X}", b)?;
        }
        f.write_str(">")
    }
}

/// Identity of an indirect object: object number plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PDFObjRef {
    pub objid: u32,
    pub genno: u16,
}

impl PDFObjRef {
    pub const fn new(objid: u32, genno: u16) -> Self {
        Self { objid, genno }
    }
}

impl fmt::Display for PDFObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.objid, self.genno)
    }
}

/// A PDF dictionary keyed by interned names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dict(FxHashMap<Name, PDFObject>);

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Name, value: PDFObject) -> Option<PDFObject> {
        self.0.insert(key, value)
    }

    /// Get entry by key. Keys never interned cannot be present.
    pub fn get(&self, key: &str) -> Option<&PDFObject> {
        Name::lookup(key).and_then(|name| self.0.get(&name))
    }

    pub fn remove(&mut self, key: &str) -> Option<PDFObject> {
        Name::lookup(key).and_then(|name| self.0.remove(&name))
    }

    /// Get entry, trying multiple keys (full name, then abbreviation).
    pub fn get_any(&self, keys: &[&str]) -> Option<&PDFObject> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_int().ok())
    }

    pub fn get_name(&self, key: &str) -> Option<Name> {
        self.get(key).and_then(|v| v.as_name().ok())
    }

    pub fn get_dict(&self, key: &str) -> Option<&Dict> {
        self.get(key).and_then(|v| v.as_dict().ok())
    }

    pub fn get_ref(&self, key: &str) -> Option<PDFObjRef> {
        self.get(key).and_then(|v| v.as_ref().ok())
    }

    /// True if `/Type` equals `ty`.
    pub fn is_type(&self, ty: &str) -> bool {
        self.get_name("Type").is_some_and(|n| n == ty)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &PDFObject)> {
        self.0.iter()
    }

    pub(crate) fn into_map(self) -> FxHashMap<Name, PDFObject> {
        self.0
    }
}

impl FromIterator<(Name, PDFObject)> for Dict {
    fn from_iter<I: IntoIterator<Item = (Name, PDFObject)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.0.iter().collect();
        entries.sort_by_key(|(k, _)| k.as_str());
        f.write_str("<<")?;
        for (k, v) in entries {
            write!(f, " {} {}", k, v)?;
        }
        f.write_str(" >>")
    }
}

/// Where a stream's payload currently stands.
#[derive(Debug, Clone, Copy)]
pub enum StreamContent<'a> {
    /// Raw bytes as stored (decrypted if the document is encrypted).
    Encoded(&'a Bytes),
    /// The filter chain has run; the result is cached here.
    Decoded(&'a DecodedStream),
}

/// A stream object: its dictionary plus the payload as stored in the file.
///
/// The decoded form is computed at most once through the owning document and
/// then kept for the stream's lifetime.
#[derive(Clone)]
pub struct PDFStream {
    pub dict: Dict,
    raw: Bytes,
    /// Set once `raw` holds plaintext
    raw_decrypted: bool,
    /// Declared `/Length`, when it was usable
    length_hint: Option<usize>,
    /// Identity of the indirect object that owns this stream
    pub objref: Option<PDFObjRef>,
    decoded: OnceLock<DecodedStream>,
}

impl PDFStream {
    pub fn new(dict: Dict, raw: impl Into<Bytes>) -> Self {
        Self {
            dict,
            raw: raw.into(),
            raw_decrypted: false,
            length_hint: None,
            objref: None,
            decoded: OnceLock::new(),
        }
    }

    pub(crate) fn with_length_hint(mut self, hint: Option<usize>) -> Self {
        self.length_hint = hint;
        self
    }

    pub fn set_objref(&mut self, objref: PDFObjRef) {
        self.objref = Some(objref);
    }

    /// Get raw (undecoded) data.
    pub fn raw(&self) -> &[u8] {
        self.raw.as_ref()
    }

    /// Get raw data as shared bytes.
    pub fn raw_bytes(&self) -> Bytes {
        self.raw.clone()
    }

    /// Declared `/Length` as read from the dictionary, if one was usable.
    pub const fn length_hint(&self) -> Option<usize> {
        self.length_hint
    }

    pub const fn raw_is_decrypted(&self) -> bool {
        self.raw_decrypted
    }

    /// Replace raw data and mark it as decrypted.
    pub(crate) fn set_raw_decrypted(&mut self, data: Vec<u8>) {
        self.raw = Bytes::from(data);
        self.raw_decrypted = true;
        self.decoded = OnceLock::new();
    }

    pub fn content(&self) -> StreamContent<'_> {
        match self.decoded.get() {
            Some(decoded) => StreamContent::Decoded(decoded),
            None => StreamContent::Encoded(&self.raw),
        }
    }

    pub(crate) fn decoded_or_init(&self, init: impl FnOnce() -> DecodedStream) -> &DecodedStream {
        self.decoded.get_or_init(init)
    }

    pub fn get(&self, key: &str) -> Option<&PDFObject> {
        self.dict.get(key)
    }

    pub fn get_any(&self, keys: &[&str]) -> Option<&PDFObject> {
        self.dict.get_any(keys)
    }
}

impl PartialEq for PDFStream {
    fn eq(&self, other: &Self) -> bool {
        self.dict == other.dict && self.raw == other.raw
    }
}

impl fmt::Debug for PDFStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PDFStream")
            .field("dict", &self.dict)
            .field("raw_len", &self.raw.len())
            .field("objref", &self.objref)
            .field("decoded", &self.decoded.get().is_some())
            .finish()
    }
}
