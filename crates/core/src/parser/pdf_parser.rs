//! PDF parser - builds objects from lexer tokens.
//!
//! Handles compound values, `N G R` references (two tokens of lookahead),
//! dictionaries followed by `stream`, and `N G obj ... endobj` envelopes.

use super::lexer::{Keyword, Lexeme, Lexer, Token, find_bytes};
use crate::error::{Diagnostic, PdfError, Result};
use crate::model::{Dict, PDFObjRef, PDFObject, PDFStream};
use bytes::Bytes;
use tracing::{debug, trace};

/// Nesting depth beyond which arrays and dictionaries collapse to null.
const MAX_DEPTH: usize = 256;

/// Answers indirect `/Length` values while a stream is being parsed.
pub trait ResolveLength {
    fn resolve_length(&self, objref: PDFObjRef) -> Option<i64>;
}

/// PDF Parser - parses PDF object syntax
pub struct PDFParser<'r> {
    lexer: Lexer,
    /// Pushed-back tokens, last in first out
    lookahead: Vec<Lexeme>,
    resolver: Option<&'r dyn ResolveLength>,
    diagnostics: Vec<Diagnostic>,
}

impl<'r> PDFParser<'r> {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            lexer: Lexer::new(data),
            lookahead: Vec::new(),
            resolver: None,
            diagnostics: Vec::new(),
        }
    }

    /// Use `resolver` for `/Length N G R` entries.
    pub fn with_resolver(mut self, resolver: &'r dyn ResolveLength) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Offset of the next unread token.
    pub fn tell(&self) -> usize {
        self.lookahead
            .last()
            .map_or_else(|| self.lexer.tell(), |lx| lx.pos)
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.lookahead.clear();
        self.lexer.set_pos(pos);
    }

    /// Anomalies absorbed so far; the list is emptied.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Get next token (from lookahead or lexer)
    pub fn next_lexeme(&mut self) -> Lexeme {
        if let Some(lx) = self.lookahead.pop() {
            return lx;
        }
        let lx = self.lexer.next_token();
        if lx.malformed {
            trace!(pos = lx.pos, "malformed token");
            self.diagnostics
                .push(Diagnostic::MalformedToken { pos: lx.pos });
        }
        lx
    }

    /// Push token back to lookahead
    pub fn push_back(&mut self, lx: Lexeme) {
        self.lookahead.push(lx);
    }

    /// Parse next PDF object. `Err` only when the input is exhausted.
    pub fn parse_object(&mut self) -> Result<PDFObject> {
        let lx = self.next_lexeme();
        if lx.token == Token::Eof {
            return Err(PdfError::UnexpectedEof);
        }
        Ok(self.lexeme_to_object(lx, 0))
    }

    /// Parse an `N G obj <object> endobj` envelope at the current position.
    ///
    /// A missing `endobj` is tolerated.
    pub fn parse_indirect(&mut self) -> Result<(PDFObjRef, PDFObject)> {
        let start = self.tell();
        let a = self.next_lexeme();
        let b = self.next_lexeme();
        let c = self.next_lexeme();
        let objref = match (&a.token, &b.token, &c.token) {
            (Token::Int(n), Token::Int(g), Token::Keyword(Keyword::Obj)) => {
                match (u32::try_from(*n), u16::try_from(*g)) {
                    (Ok(n), Ok(g)) => PDFObjRef::new(n, g),
                    _ => {
                        return Err(PdfError::SyntaxError(format!(
                            "object header out of range at {}",
                            start
                        )));
                    }
                }
            }
            _ => {
                return Err(PdfError::SyntaxError(format!(
                    "expected 'N G obj' at {}",
                    start
                )));
            }
        };

        let lx = self.next_lexeme();
        let mut obj = match lx.token {
            Token::Keyword(Keyword::EndObj) => return Ok((objref, PDFObject::Null)),
            Token::Eof => PDFObject::Null,
            _ => self.lexeme_to_object(lx, 0),
        };

        let lx = self.next_lexeme();
        if lx.token != Token::Keyword(Keyword::EndObj) {
            debug!(%objref, "missing endobj");
            self.push_back(lx);
        }

        if let PDFObject::Stream(stream) = &mut obj {
            stream.set_objref(objref);
        }
        Ok((objref, obj))
    }

    fn lexeme_to_object(&mut self, lx: Lexeme, depth: usize) -> PDFObject {
        match lx.token {
            Token::Int(n) => self.maybe_reference(n),
            Token::Real(v) => PDFObject::Real(v),
            Token::Name(n) => PDFObject::Name(n),
            Token::String(s) => PDFObject::String(s),
            Token::ArrayOpen => self.parse_array(depth + 1, lx.pos),
            Token::DictOpen => {
                if depth + 1 > MAX_DEPTH {
                    return self.too_deep(lx.pos);
                }
                let dict = self.parse_dict(depth + 1);
                self.maybe_stream(dict)
            }
            Token::Keyword(Keyword::True) => PDFObject::Bool(true),
            Token::Keyword(Keyword::False) => PDFObject::Bool(false),
            Token::Keyword(Keyword::Null) | Token::Eof => PDFObject::Null,
            _ => {
                self.diagnostics
                    .push(Diagnostic::MalformedToken { pos: lx.pos });
                PDFObject::Null
            }
        }
    }

    fn too_deep(&mut self, pos: usize) -> PDFObject {
        debug!(pos, "nesting too deep");
        self.diagnostics.push(Diagnostic::MalformedToken { pos });
        PDFObject::Null
    }

    /// `N` has been read; fold `N G R` into a reference, else push back.
    fn maybe_reference(&mut self, n: i64) -> PDFObject {
        let second = self.next_lexeme();
        if let Token::Int(g) = second.token {
            let third = self.next_lexeme();
            if third.token == Token::Keyword(Keyword::R) {
                return match (u32::try_from(n), u16::try_from(g)) {
                    (Ok(n), Ok(g)) => PDFObject::Ref(PDFObjRef::new(n, g)),
                    _ => {
                        self.diagnostics
                            .push(Diagnostic::MalformedToken { pos: second.pos });
                        PDFObject::Null
                    }
                };
            }
            self.push_back(third);
        }
        self.push_back(second);
        PDFObject::Int(n)
    }

    /// Tokens that end any open container when the closing delimiter is missing.
    fn is_terminator(token: &Token) -> bool {
        matches!(
            token,
            Token::StreamStart
                | Token::Keyword(
                    Keyword::Obj
                        | Keyword::EndObj
                        | Keyword::EndStream
                        | Keyword::Xref
                        | Keyword::Trailer
                        | Keyword::StartXref
                )
        )
    }

    fn parse_array(&mut self, depth: usize, pos: usize) -> PDFObject {
        if depth > MAX_DEPTH {
            return self.too_deep(pos);
        }
        let mut items = Vec::new();
        loop {
            let lx = self.next_lexeme();
            match lx.token {
                Token::ArrayClose => break,
                Token::Eof => {
                    self.diagnostics
                        .push(Diagnostic::MalformedToken { pos: lx.pos });
                    break;
                }
                Token::DictClose => {
                    self.diagnostics
                        .push(Diagnostic::MalformedToken { pos: lx.pos });
                }
                ref t if Self::is_terminator(t) => {
                    self.diagnostics
                        .push(Diagnostic::MalformedToken { pos: lx.pos });
                    self.push_back(lx);
                    break;
                }
                _ => items.push(self.lexeme_to_object(lx, depth)),
            }
        }
        PDFObject::Array(items)
    }

    /// Entries until `>>`. Null values are dropped, non-name keys skipped.
    fn parse_dict(&mut self, depth: usize) -> Dict {
        let mut dict = Dict::new();
        loop {
            let lx = self.next_lexeme();
            let key = match lx.token {
                Token::DictClose => break,
                Token::Name(key) => key,
                Token::Eof => {
                    self.diagnostics
                        .push(Diagnostic::MalformedToken { pos: lx.pos });
                    break;
                }
                ref t if Self::is_terminator(t) => {
                    self.diagnostics
                        .push(Diagnostic::MalformedToken { pos: lx.pos });
                    self.push_back(lx);
                    break;
                }
                _ => {
                    self.diagnostics
                        .push(Diagnostic::MalformedToken { pos: lx.pos });
                    let _ = self.lexeme_to_object(lx, depth);
                    continue;
                }
            };

            let value_lx = self.next_lexeme();
            match value_lx.token {
                Token::DictClose => break,
                Token::Eof => {
                    self.diagnostics
                        .push(Diagnostic::MalformedToken { pos: value_lx.pos });
                    break;
                }
                ref t if Self::is_terminator(t) => {
                    self.diagnostics
                        .push(Diagnostic::MalformedToken { pos: value_lx.pos });
                    self.push_back(value_lx);
                    break;
                }
                _ => {
                    let value = self.lexeme_to_object(value_lx, depth);
                    if !value.is_null() {
                        dict.insert(key, value);
                    }
                }
            }
        }
        dict
    }

    /// A dictionary followed by `stream` becomes a stream object.
    fn maybe_stream(&mut self, dict: Dict) -> PDFObject {
        let lx = self.next_lexeme();
        if lx.token != Token::StreamStart {
            self.push_back(lx);
            return PDFObject::Dict(dict);
        }

        // Re-lex the keyword so the body offset is right even if it was looked ahead.
        self.lookahead.clear();
        self.lexer.set_pos(lx.pos);
        let _ = self.lexer.next_token();
        let start = self.lexer.tell();
        let data = self.lexer.data().clone();

        let declared = self.declared_length(&dict);
        let (end, resume) = match declared {
            Some(len) if length_is_sane(&data, start, len) => (start + len, start + len),
            _ => {
                let (end, resume) = scan_for_endstream(&data, start);
                debug!(
                    pos = start,
                    declared = ?declared,
                    actual = end - start,
                    "stream length recovered by scanning"
                );
                self.diagnostics.push(Diagnostic::MalformedStreamLength {
                    declared,
                    actual: end - start,
                });
                (end, resume)
            }
        };

        self.lexer.set_pos(resume);
        let lx = self.next_lexeme();
        if lx.token != Token::Keyword(Keyword::EndStream) {
            self.push_back(lx);
        }

        let stream = PDFStream::new(dict, data.slice(start..end)).with_length_hint(declared);
        PDFObject::Stream(Box::new(stream))
    }

    fn declared_length(&self, dict: &Dict) -> Option<usize> {
        let len = match dict.get("Length")? {
            PDFObject::Int(n) => *n,
            PDFObject::Ref(r) => self.resolver?.resolve_length(*r)?,
            _ => return None,
        };
        usize::try_from(len).ok()
    }
}

/// True if `len` bytes from `start` fit and are followed by `endstream`.
fn length_is_sane(data: &[u8], start: usize, len: usize) -> bool {
    let Some(end) = start.checked_add(len) else {
        return false;
    };
    if end > data.len() {
        return false;
    }
    let mut p = end;
    while p < data.len() && Lexer::is_whitespace(data[p]) {
        p += 1;
    }
    data[p..].starts_with(b"endstream")
}

/// Find the body end by searching for `endstream` (then `endobj`).
///
/// Returns `(body_end, resume)`: the body loses exactly one EOL before the
/// keyword, and parsing resumes at the keyword.
fn scan_for_endstream(data: &[u8], start: usize) -> (usize, usize) {
    let tail = &data[start..];
    let Some(hit) = find_bytes(tail, b"endstream").or_else(|| find_bytes(tail, b"endobj")) else {
        return (data.len(), data.len());
    };
    let keyword = start + hit;
    let mut end = keyword;
    if end > start && data[end - 1] == b'\n' {
        end -= 1;
        if end > start && data[end - 1] == b'\r' {
            end -= 1;
        }
    } else if end > start && data[end - 1] == b'\r' {
        end -= 1;
    }
    (end, keyword)
}
