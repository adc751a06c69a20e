//! PDF Document - main entry point for object access.
//!
//! Handles:
//! - XRef loading (with reconstruction for damaged files)
//! - Security handler setup before any object body is decoded
//! - Lazy, cached, cycle-safe object resolution
//! - Object streams and once-only stream decoding

use super::cache::{CacheStats, CachedObject, ObjectCache};
use super::security::{SecurityHandler, StandardSecurityHandler, stream_crypt_filter};
use super::xref::{self, LoadOptions, Trailer, XRefEntry, XRefTable};
use crate::api::builder::OpenOptions;
use crate::codec::{DecodeLimits, DecodedStream, decode_stream_data};
use crate::error::{Diagnostic, PdfError, Result};
use crate::model::name::Name;
use crate::model::objects::{Dict, PDFObjRef, PDFObject, PDFStream};
use crate::parser::lexer::Token;
use crate::parser::pdf_parser::{PDFParser, ResolveLength};
use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, trace, warn};

/// Longest `N G R` chain [`PDFDocument::resolve`] follows.
const MAX_REFERENCE_CHAIN: usize = 32;

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Objects being resolved on this thread's call stack, per document.
    static RESOLVING: RefCell<FxHashSet<(u64, u32)>> = RefCell::new(FxHashSet::default());
}

/// Marks an object as in progress for as long as it lives.
struct ResolvingGuard {
    key: (u64, u32),
}

impl ResolvingGuard {
    /// `None` when the object is already being resolved on this thread.
    fn enter(document: u64, objid: u32) -> Option<Self> {
        let key = (document, objid);
        let inserted = RESOLVING.with(|set| set.borrow_mut().insert(key));
        inserted.then_some(Self { key })
    }
}

impl Drop for ResolvingGuard {
    fn drop(&mut self) {
        RESOLVING.with(|set| {
            set.borrow_mut().remove(&self.key);
        });
    }
}

/// A resolved object plus what went wrong on the way.
///
/// `diagnostics` is empty when the object resolved cleanly, which lets a
/// caller tell a legitimately null object from a damaged one.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub object: Arc<PDFObject>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Resolved {
    fn null(diagnostic: Diagnostic) -> Self {
        Self {
            object: Arc::new(PDFObject::Null),
            diagnostics: vec![diagnostic],
        }
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// PDF Document - provides access to PDF objects and metadata.
/// Owns its data via Bytes for thread-safe sharing.
pub struct PDFDocument {
    id: u64,
    data: Bytes,
    xref: XRefTable,
    security: Option<Box<dyn SecurityHandler>>,
    /// The `/Encrypt` object is stored in the clear.
    encrypt_ref: Option<PDFObjRef>,
    cache: Mutex<ObjectCache>,
    /// Object number to (container, index) for every object stream in the file.
    objstm_index: OnceLock<FxHashMap<u32, (u32, usize)>>,
    limits: DecodeLimits,
    diagnostics: Vec<Diagnostic>,
}

impl PDFDocument {
    /// Open `data` with default options.
    ///
    /// Without a password an encrypted document is tried with the empty
    /// password.
    pub fn open(data: impl Into<Bytes>, password: Option<&str>) -> Result<Self> {
        let mut options = OpenOptions::new();
        if let Some(password) = password {
            options = options.password(password);
        }
        options.open_bytes(data)
    }

    /// Memory-map and open the file at `path` with default options.
    pub fn open_path(path: impl AsRef<Path>, password: Option<&str>) -> Result<Self> {
        let mut options = OpenOptions::new();
        if let Some(password) = password {
            options = options.password(password);
        }
        options.open_path(path)
    }

    pub(crate) fn open_with(data: Bytes, options: &OpenOptions) -> Result<Self> {
        let load = LoadOptions {
            startxref_window: options.startxref_window,
            max_sections: options.max_xref_sections,
            reconstruct: options.reconstruct_on_failure,
            limits: options.limits(),
        };
        let (xref, diagnostics) = xref::load(&data, &load)?;

        let mut doc = Self {
            id: NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed),
            data,
            xref,
            security: None,
            encrypt_ref: None,
            cache: Mutex::new(ObjectCache::new(options.cache_capacity)),
            objstm_index: OnceLock::new(),
            limits: options.limits(),
            diagnostics,
        };
        doc.setup_security(options.password.as_deref().unwrap_or(""))?;
        debug!(
            objects = doc.xref.len(),
            encrypted = doc.is_encrypted(),
            reconstructed = doc.is_reconstructed(),
            "document opened"
        );
        Ok(doc)
    }

    /// Derive the decryption key before anything else is decoded.
    fn setup_security(&mut self, password: &str) -> Result<()> {
        let Some(encrypt) = self.xref.trailer().encrypt.clone() else {
            return Ok(());
        };
        let (encrypt_ref, dict) = match encrypt {
            PDFObject::Ref(objref) => {
                let obj = self.fetch(objref.objid, objref.genno);
                (Some(objref), obj.dict().cloned())
            }
            PDFObject::Dict(dict) => (None, Some(dict)),
            _ => (None, None),
        };
        let Some(dict) = dict else {
            return Err(PdfError::UnsupportedEncryption(
                "/Encrypt is not a dictionary".into(),
            ));
        };

        let handler = StandardSecurityHandler::new(&dict, &self.xref.trailer().id, password)?;
        self.security = Some(Box::new(handler));
        self.encrypt_ref = encrypt_ref;
        // Anything fetched so far was read without the key.
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
        Ok(())
    }

    /// Returns the raw PDF bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub const fn xref(&self) -> &XRefTable {
        &self.xref
    }

    pub const fn trailer_info(&self) -> &Trailer {
        self.xref.trailer()
    }

    pub const fn is_reconstructed(&self) -> bool {
        self.xref.is_reconstructed()
    }

    pub fn is_encrypted(&self) -> bool {
        self.security.is_some()
    }

    /// Anomalies met while opening the document.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .lock()
            .map(|cache| cache.stats())
            .unwrap_or_default()
    }

    /// Resolved root dictionary, or null if the trailer names none.
    pub fn catalog(&self) -> Arc<PDFObject> {
        match self.xref.trailer().root {
            Some(root) => self.resolve(&PDFObject::Ref(root)),
            None => Arc::new(PDFObject::Null),
        }
    }

    /// Resolved `/Info` dictionary, or null.
    pub fn info(&self) -> Arc<PDFObject> {
        match self.xref.trailer().info {
            Some(info) => self.resolve(&PDFObject::Ref(info)),
            None => Arc::new(PDFObject::Null),
        }
    }

    /// Get an object by number; null when it cannot be resolved.
    pub fn fetch(&self, objid: u32, genno: u16) -> Arc<PDFObject> {
        self.fetch_with_diagnostics(objid, genno).object
    }

    /// Get an object by number along with any anomalies met resolving it.
    pub fn fetch_with_diagnostics(&self, objid: u32, genno: u16) -> Resolved {
        let objref = PDFObjRef::new(objid, genno);
        if objid == 0 {
            return Resolved::null(Diagnostic::UnresolvableReference(objref));
        }

        if let Ok(mut cache) = self.cache.lock()
            && let Some(hit) = cache.get(objid)
        {
            return Resolved {
                object: hit.object,
                diagnostics: hit.diagnostics,
            };
        }

        let Some(_guard) = ResolvingGuard::enter(self.id, objid) else {
            debug!(%objref, "cyclic reference resolved to null");
            return Resolved::null(Diagnostic::CyclicReference(objref));
        };

        let mut diagnostics = Vec::new();
        let object = match self.load_object(objref, &mut diagnostics) {
            Some(object) => object,
            None => {
                debug!(%objref, "unresolvable reference");
                diagnostics.push(Diagnostic::UnresolvableReference(objref));
                PDFObject::Null
            }
        };

        let entry = CachedObject {
            object: Arc::new(object),
            diagnostics,
        };
        let entry = match self.cache.lock() {
            Ok(mut cache) => cache.insert(objid, entry),
            Err(_) => entry,
        };
        Resolved {
            object: entry.object,
            diagnostics: entry.diagnostics,
        }
    }

    /// Follow references until a direct value is reached.
    pub fn resolve(&self, obj: &PDFObject) -> Arc<PDFObject> {
        self.resolve_with_diagnostics(obj).object
    }

    pub fn resolve_with_diagnostics(&self, obj: &PDFObject) -> Resolved {
        let &PDFObject::Ref(mut objref) = obj else {
            return Resolved {
                object: Arc::new(obj.clone()),
                diagnostics: Vec::new(),
            };
        };
        let mut seen = FxHashSet::default();
        let mut diagnostics = Vec::new();
        loop {
            if !seen.insert(objref.objid) || seen.len() > MAX_REFERENCE_CHAIN {
                diagnostics.push(Diagnostic::CyclicReference(objref));
                return Resolved {
                    object: Arc::new(PDFObject::Null),
                    diagnostics,
                };
            }
            let resolved = self.fetch_with_diagnostics(objref.objid, objref.genno);
            diagnostics.extend(resolved.diagnostics);
            let PDFObject::Ref(next) = *resolved.object else {
                return Resolved {
                    object: resolved.object,
                    diagnostics,
                };
            };
            objref = next;
        }
    }

    /// Decoded payload of `stream`, computed once per stream.
    pub fn decoded_stream_bytes(&self, stream: &PDFStream) -> Bytes {
        self.decode_stream(stream).data
    }

    /// Like [`Self::decoded_stream_bytes`] but keeps the decode diagnostic.
    pub fn decode_stream(&self, stream: &PDFStream) -> DecodedStream {
        stream
            .decoded_or_init(|| {
                let mut dict = self.resolve_filter_entries(&stream.dict);
                if let Some(handler) = &self.security
                    && let Some(name) = stream_crypt_filter(&dict)
                    && handler.crypt_filter(name).is_some()
                {
                    dict = Cow::Owned(without_crypt_filter(&dict));
                }
                let raw = match (&self.security, stream.objref) {
                    (Some(handler), Some(objref))
                        if !stream.raw_is_decrypted() && !self.is_exempt(objref, &stream.dict) =>
                    {
                        Bytes::from(handler.decrypt_stream(objref, stream.raw(), &stream.dict))
                    }
                    _ => stream.raw_bytes(),
                };
                decode_stream_data(raw, &dict, &self.limits)
            })
            .clone()
    }

    fn load_object(&self, objref: PDFObjRef, diags: &mut Vec<Diagnostic>) -> Option<PDFObject> {
        match self.xref.entry(objref.objid).copied() {
            Some(XRefEntry::Free { .. }) => {
                trace!(%objref, "free object");
                Some(PDFObject::Null)
            }
            Some(XRefEntry::InFile { offset, genno }) => {
                if genno != objref.genno {
                    warn!(%objref, stored = genno, "generation mismatch; using stored entry");
                }
                self.load_in_file(objref.objid, offset, diags)
            }
            Some(XRefEntry::InObjectStream { container, index }) => {
                self.load_compressed(objref.objid, container, index, diags)
            }
            None => {
                // Lost or capped older revisions still hold objects on disk.
                let scanned = self.xref.scan_index(&self.data).offset(objref.objid);
                if let Some((offset, _)) = scanned {
                    debug!(%objref, offset, "unlisted object found by header scan");
                    if let Some(obj) = self.load_in_file(objref.objid, offset, diags) {
                        return Some(obj);
                    }
                }
                let &(container, index) = self.objstm_index().get(&objref.objid)?;
                debug!(%objref, container, "object found by object stream scan");
                self.load_compressed(objref.objid, container, index, diags)
            }
        }
    }

    fn load_in_file(
        &self,
        objid: u32,
        offset: usize,
        diags: &mut Vec<Diagnostic>,
    ) -> Option<PDFObject> {
        let parsed = self.parse_at(offset, diags);
        let (found, obj) = match parsed {
            Some((found, obj)) if found.objid == objid => (found, obj),
            other => {
                let fallback = self
                    .xref
                    .scan_index(&self.data)
                    .offset(objid)
                    .filter(|&(at, _)| at != offset)
                    .and_then(|(at, _)| self.parse_at(at, diags))
                    .filter(|(found, _)| found.objid == objid);
                match (fallback, other) {
                    (Some(hit), _) => {
                        debug!(objid, offset, "xref offset wrong; used scanned header");
                        hit
                    }
                    (None, Some((found, obj))) => {
                        warn!(objid, header = found.objid, "object number mismatch; tolerated");
                        (found, obj)
                    }
                    (None, None) => return None,
                }
            }
        };
        Some(self.decrypt_object(PDFObjRef::new(objid, found.genno), obj))
    }

    fn parse_at(
        &self,
        offset: usize,
        diags: &mut Vec<Diagnostic>,
    ) -> Option<(PDFObjRef, PDFObject)> {
        if offset >= self.data.len() {
            return None;
        }
        let mut parser = PDFParser::new(self.data.clone()).with_resolver(self);
        parser.set_pos(offset);
        let result = parser.parse_indirect();
        diags.extend(parser.take_diagnostics());
        match result {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                trace!(offset, error = %e, "no object header");
                None
            }
        }
    }

    /// Objects inside an object stream are never decrypted individually.
    fn load_compressed(
        &self,
        objid: u32,
        container: u32,
        index: usize,
        diags: &mut Vec<Diagnostic>,
    ) -> Option<PDFObject> {
        let holder = self.fetch_with_diagnostics(container, 0);
        diags.extend(holder.diagnostics);
        let stream = holder.object.as_stream().ok()?;
        let decoded = self.decode_stream(stream);
        if let Some(diag) = decoded.diagnostic {
            diags.push(diag);
        }
        let header = ObjStmHeader::parse(&stream.dict, &decoded.data)?;

        let offset = match header.pairs.get(index) {
            Some(&(id, offset)) if id == objid => offset,
            _ => {
                let &(_, offset) = header.pairs.iter().find(|(id, _)| *id == objid)?;
                debug!(objid, container, index, "object stream index wrong; matched by number");
                offset
            }
        };
        let start = header.first.checked_add(offset)?;
        if start > decoded.data.len() {
            return None;
        }
        let mut parser = PDFParser::new(decoded.data.slice(start..)).with_resolver(self);
        let obj = parser.parse_object().ok();
        diags.extend(parser.take_diagnostics());
        obj
    }

    fn objstm_index(&self) -> &FxHashMap<u32, (u32, usize)> {
        self.objstm_index.get_or_init(|| self.build_objstm_index())
    }

    /// Index every object stream found by scanning. Containers are parsed
    /// directly so building the index never re-enters it.
    fn build_objstm_index(&self) -> FxHashMap<u32, (u32, usize)> {
        let scan = self.xref.scan_index(&self.data);
        let mut index = FxHashMap::default();
        for &container in scan.objstms() {
            let Some((offset, _)) = scan.offset(container) else {
                continue;
            };
            let mut parser = PDFParser::new(self.data.clone());
            parser.set_pos(offset);
            let Ok((objref, PDFObject::Stream(stream))) = parser.parse_indirect() else {
                continue;
            };
            if !stream.dict.is_type("ObjStm") {
                continue;
            }
            let raw = match &self.security {
                Some(handler) => {
                    Bytes::from(handler.decrypt_stream(objref, stream.raw(), &stream.dict))
                }
                None => stream.raw_bytes(),
            };
            let decoded = decode_stream_data(raw, &stream.dict, &self.limits);
            let Some(header) = ObjStmHeader::parse(&stream.dict, &decoded.data) else {
                continue;
            };
            for (i, &(objid, _)) in header.pairs.iter().enumerate() {
                index.insert(objid, (container, i));
            }
        }
        debug!(objects = index.len(), "object stream index built");
        index
    }

    fn is_exempt(&self, objref: PDFObjRef, dict: &Dict) -> bool {
        self.encrypt_ref.is_some_and(|r| r.objid == objref.objid) || dict.is_type("XRef")
    }

    /// Decrypt strings and stream payloads of an object read from the file.
    fn decrypt_object(&self, objref: PDFObjRef, obj: PDFObject) -> PDFObject {
        let Some(handler) = self.security.as_deref() else {
            return obj;
        };
        let exempt = match obj.dict() {
            Some(dict) => self.is_exempt(objref, dict),
            None => self.encrypt_ref.is_some_and(|r| r.objid == objref.objid),
        };
        if exempt {
            return obj;
        }
        decrypt_value(handler, objref, obj)
    }

    /// Resolve indirect filter names and parameters so the codec sees direct values.
    fn resolve_filter_entries<'a>(&self, dict: &'a Dict) -> Cow<'a, Dict> {
        const KEYS: [&str; 4] = ["Filter", "F", "DecodeParms", "DP"];
        if !KEYS.iter().any(|k| dict.get(k).is_some_and(holds_reference)) {
            return Cow::Borrowed(dict);
        }
        let mut owned = dict.clone();
        for key in KEYS {
            if let Some(value) = dict.get(key)
                && holds_reference(value)
            {
                let value = match value {
                    PDFObject::Array(items) => PDFObject::Array(
                        items
                            .iter()
                            .map(|item| (*self.resolve(item)).clone())
                            .collect(),
                    ),
                    other => (*self.resolve(other)).clone(),
                };
                owned.insert(Name::new(key), value);
            }
        }
        Cow::Owned(owned)
    }
}

/// Drop the leading `/Crypt` entry the security handler has already applied.
fn without_crypt_filter(dict: &Dict) -> Dict {
    let mut owned = dict.clone();
    match dict.get("Filter") {
        Some(PDFObject::Array(filters)) => {
            let rest = filters.iter().skip(1).cloned().collect();
            owned.insert(Name::new("Filter"), PDFObject::Array(rest));
            if let Some(PDFObject::Array(parms)) = dict.get("DecodeParms") {
                let rest = parms.iter().skip(1).cloned().collect();
                owned.insert(Name::new("DecodeParms"), PDFObject::Array(rest));
            }
        }
        _ => {
            owned.remove("Filter");
            owned.remove("DecodeParms");
        }
    }
    owned
}

impl fmt::Debug for PDFDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PDFDocument")
            .field("len", &self.data.len())
            .field("objects", &self.xref.len())
            .field("encrypted", &self.is_encrypted())
            .field("reconstructed", &self.is_reconstructed())
            .finish_non_exhaustive()
    }
}

impl ResolveLength for PDFDocument {
    fn resolve_length(&self, objref: PDFObjRef) -> Option<i64> {
        self.resolve(&PDFObject::Ref(objref)).as_int().ok()
    }
}

fn holds_reference(obj: &PDFObject) -> bool {
    match obj {
        PDFObject::Ref(_) => true,
        PDFObject::Array(items) => items.iter().any(|o| matches!(o, PDFObject::Ref(_))),
        _ => false,
    }
}

fn decrypt_value(handler: &dyn SecurityHandler, objref: PDFObjRef, obj: PDFObject) -> PDFObject {
    match obj {
        PDFObject::String(data) => PDFObject::String(handler.decrypt_string(objref, &data)),
        PDFObject::Array(items) => PDFObject::Array(
            items
                .into_iter()
                .map(|item| decrypt_value(handler, objref, item))
                .collect(),
        ),
        PDFObject::Dict(dict) => PDFObject::Dict(decrypt_dict(handler, objref, dict)),
        PDFObject::Stream(mut stream) => {
            stream.dict = decrypt_dict(handler, objref, std::mem::take(&mut stream.dict));
            let plain = handler.decrypt_stream(objref, stream.raw(), &stream.dict);
            stream.set_raw_decrypted(plain);
            PDFObject::Stream(stream)
        }
        other => other,
    }
}

fn decrypt_dict(handler: &dyn SecurityHandler, objref: PDFObjRef, dict: Dict) -> Dict {
    dict.into_map()
        .into_iter()
        .map(|(k, v)| (k, decrypt_value(handler, objref, v)))
        .collect()
}

/// The `objnum offset` pairs at the head of an object stream.
struct ObjStmHeader {
    first: usize,
    pairs: Vec<(u32, usize)>,
}

impl ObjStmHeader {
    fn parse(dict: &Dict, data: &Bytes) -> Option<Self> {
        let n = usize::try_from(dict.get_int("N")?).ok()?;
        let first = usize::try_from(dict.get_int("First")?).ok()?;
        if first > data.len() {
            return None;
        }
        let mut parser = PDFParser::new(data.slice(..first));
        let mut pairs = Vec::with_capacity(n.min(4096));
        for _ in 0..n {
            let (Token::Int(objid), Token::Int(offset)) =
                (parser.next_lexeme().token, parser.next_lexeme().token)
            else {
                break;
            };
            let (Ok(objid), Ok(offset)) = (u32::try_from(objid), usize::try_from(offset)) else {
                break;
            };
            pairs.push((objid, offset));
        }
        Some(Self { first, pairs })
    }
}
