//! Cross-reference tables: locating, loading and merging every section of a
//! document, and rebuilding the index by scanning when the sections are
//! unusable.

use crate::codec::{DecodeLimits, decode_stream_data};
use crate::error::{Diagnostic, PdfError, Result};
use crate::model::name::Name;
use crate::model::objects::{Dict, PDFObjRef, PDFObject};
use crate::parser::lexer::{Keyword, Token, find_bytes, rfind_bytes};
use crate::parser::pdf_parser::PDFParser;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use regex::bytes::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::OnceLock;
use tracing::{debug, trace, warn};

/// Where an object number currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    Free { genno: u16 },
    InFile { offset: usize, genno: u16 },
    /// Compressed objects always have generation 0.
    InObjectStream { container: u32, index: usize },
}

impl XRefEntry {
    pub const fn genno(&self) -> u16 {
        match self {
            Self::Free { genno } | Self::InFile { genno, .. } => *genno,
            Self::InObjectStream { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// `xref` keyword table.
    Classic,
    /// `/Type /XRef` stream.
    Stream,
    /// Synthesized by scanning for object headers.
    Reconstructed,
}

/// One section that contributed to the table, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XRefSection {
    pub offset: usize,
    pub kind: SectionKind,
    pub entries: usize,
    pub prev: Option<usize>,
}

/// The merged trailer of all sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trailer {
    pub root: Option<PDFObjRef>,
    pub info: Option<PDFObjRef>,
    /// Usually a reference, occasionally a direct dictionary.
    pub encrypt: Option<PDFObject>,
    pub id: Vec<Vec<u8>>,
    pub size: Option<i64>,
    pub prev: Option<usize>,
    pub xref_stm: Option<usize>,
    pub dict: Dict,
}

impl Trailer {
    pub fn from_dict(dict: Dict) -> Self {
        let id = match dict.get("ID") {
            Some(PDFObject::Array(items)) => items
                .iter()
                .filter_map(|o| o.as_string().ok().map(<[u8]>::to_vec))
                .collect(),
            _ => Vec::new(),
        };
        Self {
            root: dict.get_ref("Root"),
            info: dict.get_ref("Info"),
            encrypt: dict.get("Encrypt").filter(|o| !o.is_null()).cloned(),
            id,
            size: dict.get_int("Size"),
            prev: offset_value(&dict, "Prev"),
            xref_stm: offset_value(&dict, "XRefStm"),
            dict,
        }
    }
}

fn offset_value(dict: &Dict, key: &str) -> Option<usize> {
    dict.get_int(key).and_then(|n| usize::try_from(n).ok())
}

/// Object number to location, merged across revisions.
#[derive(Debug, Default)]
pub struct XRefTable {
    entries: FxHashMap<u32, XRefEntry>,
    sections: Vec<XRefSection>,
    trailer: Trailer,
    reconstructed: bool,
    scan: OnceLock<ScanIndex>,
}

impl XRefTable {
    pub fn entry(&self, objid: u32) -> Option<&XRefEntry> {
        self.entries.get(&objid)
    }

    /// All object numbers with an entry, ascending.
    pub fn object_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn sections(&self) -> &[XRefSection] {
        &self.sections
    }

    pub const fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    pub const fn is_reconstructed(&self) -> bool {
        self.reconstructed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Header offsets found by scanning `data`, built on first use.
    pub(crate) fn scan_index(&self, data: &[u8]) -> &ScanIndex {
        self.scan.get_or_init(|| ScanIndex::build(data))
    }

    /// Older sections never override what a newer one already set.
    fn merge(&mut self, section: ParsedSection, trailer: &mut Dict) {
        trace!(
            offset = section.offset,
            entries = section.entries.len(),
            "merging xref section"
        );
        let count = section.entries.len();
        for (objid, entry) in section.entries {
            self.entries.entry(objid).or_insert(entry);
        }
        let prev = offset_value(&section.trailer, "Prev");
        for (key, value) in section.trailer.into_map() {
            if trailer.get(key.as_str()).is_none() {
                trailer.insert(key, value);
            }
        }
        self.sections.push(XRefSection {
            offset: section.offset,
            kind: section.kind,
            entries: count,
            prev,
        });
    }
}

/// Knobs for [`load`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoadOptions {
    pub startxref_window: usize,
    pub max_sections: usize,
    pub reconstruct: bool,
    pub limits: DecodeLimits,
}

/// A single section as read from the file.
struct ParsedSection {
    offset: usize,
    kind: SectionKind,
    entries: Vec<(u32, XRefEntry)>,
    trailer: Dict,
}

/// Build the table for `data`: follow `startxref` and the `Prev` chain, or
/// rebuild by scanning when that fails.
pub(crate) fn load(data: &Bytes, opts: &LoadOptions) -> Result<(XRefTable, Vec<Diagnostic>)> {
    let mut diagnostics = Vec::new();

    let reason = match find_startxref(data, opts.startxref_window) {
        None => "startxref not found".to_string(),
        Some(pos) => match load_chain(data, pos, opts, &mut diagnostics) {
            Ok(table) if table.trailer.root.is_some() => {
                debug!(
                    sections = table.sections.len(),
                    objects = table.entries.len(),
                    "xref loaded"
                );
                return Ok((table, diagnostics));
            }
            Ok(_) => "trailer has no /Root".to_string(),
            Err(e) => e.to_string(),
        },
    };

    if !opts.reconstruct {
        debug!(%reason, "xref unusable and reconstruction disabled");
        return Err(PdfError::NoValidXRef);
    }
    warn!(%reason, "rebuilding xref by scanning");
    diagnostics.push(Diagnostic::XRefCorrupt(reason));
    let table = reconstruct(data)?;
    Ok((table, diagnostics))
}

/// Offset recorded after the last `startxref` within `window` bytes of EOF.
pub(crate) fn find_startxref(data: &[u8], window: usize) -> Option<usize> {
    let start = data.len().saturating_sub(window);
    let hit = start + rfind_bytes(&data[start..], b"startxref")?;
    let mut parser = PDFParser::new(Bytes::copy_from_slice(&data[hit..]));
    let _ = parser.next_lexeme();
    match parser.next_lexeme().token {
        Token::Int(n) => usize::try_from(n).ok().filter(|&n| n < data.len()),
        _ => None,
    }
}

fn load_chain(
    data: &Bytes,
    start: usize,
    opts: &LoadOptions,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<XRefTable> {
    let mut table = XRefTable::default();
    let mut trailer = Dict::new();
    let mut visited = FxHashSet::default();
    let mut next = Some(start);

    while let Some(pos) = next.take() {
        if !visited.insert(pos) {
            debug!(pos, "xref Prev chain loops; stopping");
            break;
        }
        if table.sections.len() >= opts.max_sections {
            warn!(limit = opts.max_sections, "too many xref sections");
            diagnostics.push(Diagnostic::XRefCorrupt(format!(
                "more than {} xref sections",
                opts.max_sections
            )));
            break;
        }

        let section = match parse_section(data, pos, opts) {
            Ok(section) => section,
            Err(e) if table.sections.is_empty() => return Err(e),
            Err(e) => {
                warn!(pos, error = %e, "skipping unreadable older xref section");
                diagnostics.push(Diagnostic::XRefCorrupt(format!(
                    "section at {}: {}",
                    pos, e
                )));
                break;
            }
        };

        // Hybrid file: the overlay stream wins over its own classic table.
        if let Some(stm) = offset_value(&section.trailer, "XRefStm")
            && visited.insert(stm)
        {
            match parse_section(data, stm, opts) {
                Ok(overlay) if overlay.kind == SectionKind::Stream => {
                    table.merge(overlay, &mut trailer);
                }
                Ok(_) => debug!(stm, "XRefStm does not point at a stream"),
                Err(e) => {
                    warn!(stm, error = %e, "unreadable XRefStm");
                    diagnostics.push(Diagnostic::XRefCorrupt(format!(
                        "XRefStm at {}: {}",
                        stm, e
                    )));
                }
            }
        }

        next = offset_value(&section.trailer, "Prev");
        table.merge(section, &mut trailer);
    }

    table.trailer = Trailer::from_dict(trailer);
    Ok(table)
}

fn parse_section(data: &Bytes, pos: usize, opts: &LoadOptions) -> Result<ParsedSection> {
    if pos >= data.len() {
        return Err(PdfError::SyntaxError(format!(
            "xref offset {} beyond end of file",
            pos
        )));
    }
    let mut parser = PDFParser::new(data.clone());
    parser.set_pos(pos);
    let first = parser.next_lexeme();
    match first.token {
        Token::Keyword(Keyword::Xref) => parse_classic(&mut parser, pos),
        Token::Int(_) => {
            parser.push_back(first);
            parse_stream_section(&mut parser, pos, opts)
        }
        _ => Err(PdfError::SyntaxError(format!(
            "no xref table or stream at {}",
            pos
        ))),
    }
}

/// Subsections of `start count` followed by `offset gen n|f` lines, then
/// `trailer << ... >>`.
fn parse_classic(parser: &mut PDFParser<'_>, pos: usize) -> Result<ParsedSection> {
    let mut entries = Vec::new();
    let mut trailer = Dict::new();

    loop {
        let lx = parser.next_lexeme();
        let (start, count) = match lx.token {
            Token::Keyword(Keyword::Trailer) => {
                if let Ok(PDFObject::Dict(dict)) = parser.parse_object() {
                    trailer = dict;
                }
                break;
            }
            Token::Int(start) => match parser.next_lexeme().token {
                Token::Int(count) => (start, count),
                _ => {
                    return Err(PdfError::SyntaxError(format!(
                        "bad xref subsection header at {}",
                        lx.pos
                    )));
                }
            },
            Token::Eof => break,
            _ => {
                return Err(PdfError::SyntaxError(format!(
                    "unexpected token in xref table at {}",
                    lx.pos
                )));
            }
        };
        let (Ok(mut base), Ok(count)) = (u32::try_from(start), u32::try_from(count)) else {
            return Err(PdfError::SyntaxError(format!(
                "xref subsection out of range at {}",
                lx.pos
            )));
        };

        for i in 0..count {
            let Some((offset, genno, in_use)) = read_classic_entry(parser) else {
                return Err(PdfError::SyntaxError(format!(
                    "truncated xref subsection starting at object {}",
                    base
                )));
            };
            // Subsection declared from 1 but still carrying object 0's free entry.
            if i == 0 && base == 1 && !in_use && offset == 0 && genno == 65535 {
                debug!("xref subsection off by one; shifting to 0");
                base = 0;
            }
            let objid = base.saturating_add(i);
            let entry = if in_use {
                XRefEntry::InFile { offset, genno }
            } else {
                XRefEntry::Free { genno }
            };
            entries.push((objid, entry));
        }
    }

    Ok(ParsedSection {
        offset: pos,
        kind: SectionKind::Classic,
        entries,
        trailer,
    })
}

fn read_classic_entry(parser: &mut PDFParser<'_>) -> Option<(usize, u16, bool)> {
    let offset = match parser.next_lexeme().token {
        Token::Int(n) => usize::try_from(n).ok()?,
        _ => return None,
    };
    let genno = match parser.next_lexeme().token {
        Token::Int(n) => u16::try_from(n).unwrap_or(u16::MAX),
        _ => return None,
    };
    match parser.next_lexeme().token {
        Token::Keyword(Keyword::Other(kw)) if kw == b"n" => Some((offset, genno, true)),
        Token::Keyword(Keyword::Other(kw)) if kw == b"f" => Some((offset, genno, false)),
        _ => None,
    }
}

/// Stream dictionary keys that describe the stream itself, not the trailer.
const STREAM_ONLY_KEYS: [&str; 5] = ["Length", "Filter", "DecodeParms", "W", "Index"];

fn parse_stream_section(
    parser: &mut PDFParser<'_>,
    pos: usize,
    opts: &LoadOptions,
) -> Result<ParsedSection> {
    let (objref, obj) = parser.parse_indirect()?;
    let PDFObject::Stream(stream) = obj else {
        return Err(PdfError::SyntaxError(format!(
            "object {} at {} is not an xref stream",
            objref, pos
        )));
    };

    let widths = match stream.get("W") {
        Some(PDFObject::Array(items)) if items.len() == 3 => {
            let mut w = [0usize; 3];
            for (slot, item) in w.iter_mut().zip(items) {
                *slot = item
                    .as_int()
                    .ok()
                    .and_then(|n| usize::try_from(n).ok())
                    .filter(|&n| n <= 8)
                    .ok_or_else(|| PdfError::SyntaxError("bad /W entry".into()))?;
            }
            w
        }
        _ => return Err(PdfError::SyntaxError("xref stream without /W".into())),
    };
    let row = widths.iter().sum::<usize>();
    if row == 0 {
        return Err(PdfError::SyntaxError("xref stream /W is all zero".into()));
    }

    let size = stream.dict.get_int("Size").unwrap_or(0).max(0);
    let index = match stream.get("Index") {
        Some(PDFObject::Array(items)) => items
            .chunks_exact(2)
            .filter_map(|pair| Some((pair[0].as_int().ok()?, pair[1].as_int().ok()?)))
            .collect(),
        _ => vec![(0, size)],
    };

    // Never decrypted: the key is not known yet and xref streams are exempt.
    let decoded = decode_stream_data(stream.raw_bytes(), &stream.dict, &opts.limits);
    if let Some(diag) = &decoded.diagnostic {
        warn!(%objref, %diag, "xref stream did not decode cleanly");
    }
    let data = decoded.data;

    let mut entries = Vec::new();
    let mut rows = data.chunks_exact(row);
    'outer: for (start, count) in index {
        let (Ok(start), Ok(count)) = (u32::try_from(start), u32::try_from(count)) else {
            continue;
        };
        for i in 0..count {
            let Some(bytes) = rows.next() else {
                debug!(%objref, "xref stream data shorter than /Index");
                break 'outer;
            };
            let (t, rest) = bytes.split_at(widths[0]);
            let (f1, f2) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { be_uint(t) };
            let (f1, f2) = (be_uint(f1), be_uint(f2));
            let objid = start.saturating_add(i);
            let entry = match kind {
                0 => XRefEntry::Free {
                    genno: u16::try_from(f2).unwrap_or(u16::MAX),
                },
                1 => XRefEntry::InFile {
                    offset: usize::try_from(f1).unwrap_or(usize::MAX),
                    genno: u16::try_from(f2).unwrap_or(0),
                },
                2 => XRefEntry::InObjectStream {
                    container: u32::try_from(f1).unwrap_or(0),
                    index: usize::try_from(f2).unwrap_or(usize::MAX),
                },
                other => {
                    trace!(objid, other, "unknown xref entry type");
                    continue;
                }
            };
            entries.push((objid, entry));
        }
    }

    let trailer = stream
        .dict
        .iter()
        .filter(|(k, _)| !STREAM_ONLY_KEYS.iter().any(|s| **k == *s))
        .map(|(k, v)| (*k, v.clone()))
        .collect();

    Ok(ParsedSection {
        offset: pos,
        kind: SectionKind::Stream,
        entries,
        trailer,
    })
}

fn be_uint(bytes: &[u8]) -> u64 {
    if bytes.is_empty() {
        return 0;
    }
    BigEndian::read_uint(bytes, bytes.len())
}

const OBJ_HEADER: &str = r"(\d+)\s+(\d+)\s+obj\b";

/// Every `N G obj` header in the file, later headers winning.
#[derive(Debug, Default)]
pub(crate) struct ScanIndex {
    headers: FxHashMap<u32, (usize, u16)>,
    /// Objects whose bodies mention `/ObjStm`, in file order.
    objstms: Vec<u32>,
    /// Candidates mentioning `/XRef`, in file order.
    xref_streams: Vec<usize>,
    /// Candidates mentioning `/Catalog`, in file order.
    catalogs: Vec<usize>,
}

impl ScanIndex {
    pub(crate) fn build(data: &[u8]) -> Self {
        let mut index = Self::default();
        let Ok(re) = Regex::new(OBJ_HEADER) else {
            return index;
        };

        let mut found: Vec<(usize, u32, u16)> = Vec::new();
        for cap in re.captures_iter(data) {
            let (Some(whole), Some(objid), Some(genno)) = (cap.get(0), cap.get(1), cap.get(2))
            else {
                continue;
            };
            let (Some(objid), Some(genno)) = (
                parse_digits(objid.as_bytes()),
                parse_digits(genno.as_bytes()),
            ) else {
                continue;
            };
            let (Ok(objid), Ok(genno)) = (u32::try_from(objid), u16::try_from(genno)) else {
                continue;
            };
            found.push((whole.start(), objid, genno));
        }

        for (i, &(offset, objid, genno)) in found.iter().enumerate() {
            index.headers.insert(objid, (offset, genno));
            let end = found.get(i + 1).map_or(data.len(), |next| next.0);
            let body = &data[offset..end];
            if find_bytes(body, b"/ObjStm").is_some() {
                index.objstms.push(objid);
            }
            if find_bytes(body, b"/XRef").is_some() {
                index.xref_streams.push(offset);
            }
            if find_bytes(body, b"/Catalog").is_some() {
                index.catalogs.push(offset);
            }
        }
        debug!(objects = index.headers.len(), "scanned object headers");
        index
    }

    pub(crate) fn offset(&self, objid: u32) -> Option<(usize, u16)> {
        self.headers.get(&objid).copied()
    }

    pub(crate) fn objstms(&self) -> &[u32] {
        &self.objstms
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

fn parse_digits(digits: &[u8]) -> Option<u64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Rebuild the table from object headers found anywhere in the file.
pub(crate) fn reconstruct(data: &Bytes) -> Result<XRefTable> {
    let scan = ScanIndex::build(data);
    if scan.is_empty() {
        return Err(PdfError::NoValidXRef);
    }

    let entries: FxHashMap<u32, XRefEntry> = scan
        .headers
        .iter()
        .map(|(&objid, &(offset, genno))| (objid, XRefEntry::InFile { offset, genno }))
        .collect();
    let trailer = recover_trailer(data, &scan);

    let table = XRefTable {
        sections: vec![XRefSection {
            offset: 0,
            kind: SectionKind::Reconstructed,
            entries: entries.len(),
            prev: None,
        }],
        entries,
        trailer: Trailer::from_dict(trailer),
        reconstructed: true,
        scan: OnceLock::from(scan),
    };
    debug!(objects = table.len(), "xref reconstructed");
    Ok(table)
}

/// Last `trailer` dictionary naming a root, else the last xref stream
/// dictionary, else a synthesized one pointing at a catalog object.
fn recover_trailer(data: &Bytes, scan: &ScanIndex) -> Dict {
    let mut parser = PDFParser::new(data.clone());

    let mut best = None;
    let mut from = 0;
    while let Some(hit) = find_bytes(&data[from..], b"trailer") {
        let pos = from + hit;
        parser.set_pos(pos + b"trailer".len());
        if let Ok(PDFObject::Dict(dict)) = parser.parse_object()
            && dict.get_ref("Root").is_some()
        {
            best = Some(dict);
        }
        from = pos + 1;
    }
    if let Some(dict) = best {
        return dict;
    }

    for &offset in scan.xref_streams.iter().rev() {
        parser.set_pos(offset);
        if let Ok((_, obj)) = parser.parse_indirect()
            && let Some(dict) = obj.dict()
            && dict.is_type("XRef")
            && dict.get_ref("Root").is_some()
        {
            debug!(offset, "trailer recovered from xref stream");
            return dict
                .iter()
                .filter(|(k, _)| !STREAM_ONLY_KEYS.iter().any(|s| **k == *s))
                .map(|(k, v)| (*k, v.clone()))
                .collect();
        }
    }

    for &offset in scan.catalogs.iter().rev() {
        parser.set_pos(offset);
        if let Ok((objref, obj)) = parser.parse_indirect()
            && obj.dict().is_some_and(|d| d.is_type("Catalog"))
        {
            debug!(%objref, "trailer synthesized from catalog object");
            let mut dict = Dict::new();
            dict.insert(Name::new("Root"), PDFObject::Ref(objref));
            return dict;
        }
    }

    warn!("no trailer or catalog found while rebuilding xref");
    Dict::new()
}
