//! PDF tokenizer.
//!
//! Splits a byte buffer into lexical tokens. The lexer never fails: damaged
//! numbers, names and strings come back as a best-effort value with
//! [`Lexeme::malformed`] set, and running out of input yields [`Token::Eof`].

use crate::model::Name;
use bytes::Bytes;

/// Keywords that carry meaning for object structure. Anything else is `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Keyword {
    Obj,
    EndObj,
    EndStream,
    R,
    True,
    False,
    Null,
    Xref,
    Trailer,
    StartXref,
    Other(Vec<u8>),
}

impl Keyword {
    pub fn from_bytes(b: &[u8]) -> Self {
        match b {
            b"obj" => Self::Obj,
            b"endobj" => Self::EndObj,
            b"endstream" => Self::EndStream,
            b"R" => Self::R,
            b"true" => Self::True,
            b"false" => Self::False,
            b"null" => Self::Null,
            b"xref" => Self::Xref,
            b"trailer" => Self::Trailer,
            b"startxref" => Self::StartXref,
            _ => Self::Other(b.to_vec()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Obj => b"obj",
            Self::EndObj => b"endobj",
            Self::EndStream => b"endstream",
            Self::R => b"R",
            Self::True => b"true",
            Self::False => b"false",
            Self::Null => b"null",
            Self::Xref => b"xref",
            Self::Trailer => b"trailer",
            Self::StartXref => b"startxref",
            Self::Other(b) => b,
        }
    }
}

/// A classified lexeme payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Real(f64),
    Name(Name),
    /// Literal `(...)` or hex `<...>` string, already decoded.
    String(Vec<u8>),
    ArrayOpen,
    ArrayClose,
    DictOpen,
    DictClose,
    Keyword(Keyword),
    /// The `stream` keyword plus its end-of-line marker; the body starts at `tell()`.
    StreamStart,
    Eof,
}

/// A token with its start offset and recovery flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub pos: usize,
    pub malformed: bool,
}

/// Byte-cursor tokenizer over a shared buffer.
pub struct Lexer {
    data: Bytes,
    pos: usize,
}

impl Lexer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    /// Current position in buffer
    pub const fn tell(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    /// The whole underlying buffer.
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    pub const fn is_whitespace(b: u8) -> bool {
        matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x00' | b'\x0c')
    }

    pub const fn is_delimiter(b: u8) -> bool {
        matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
        )
    }

    const fn is_regular(b: u8) -> bool {
        !Self::is_whitespace(b) && !Self::is_delimiter(b)
    }

    /// Skip whitespace and `%` comments.
    pub fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if Self::is_whitespace(b) {
                self.pos += 1;
            } else if b == b'%' {
                while let Some(c) = self.advance() {
                    if c == b'\r' || c == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Produce the next token. Always returns; `Token::Eof` at the end.
    pub fn next_token(&mut self) -> Lexeme {
        self.skip_whitespace();
        let pos = self.pos;
        let Some(b) = self.peek() else {
            return Lexeme {
                token: Token::Eof,
                pos,
                malformed: false,
            };
        };

        let (token, malformed) = match b {
            b'/' => self.lex_name(),
            b'(' => self.lex_literal_string(),
            b'<' if self.peek_at(1) == Some(b'<') => {
                self.pos += 2;
                (Token::DictOpen, false)
            }
            b'<' => self.lex_hex_string(),
            b'>' if self.peek_at(1) == Some(b'>') => {
                self.pos += 2;
                (Token::DictClose, false)
            }
            b'[' => {
                self.pos += 1;
                (Token::ArrayOpen, false)
            }
            b']' => {
                self.pos += 1;
                (Token::ArrayClose, false)
            }
            b')' | b'>' | b'{' | b'}' => {
                self.pos += 1;
                (Token::Keyword(Keyword::Other(vec![b])), false)
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => self.lex_number(),
            _ => self.lex_keyword(),
        };

        Lexeme {
            token,
            pos,
            malformed,
        }
    }

    /// Integers and reals, tolerating stray signs and extra dots.
    fn lex_number(&mut self) -> (Token, bool) {
        let mut malformed = false;
        let mut negative = false;
        let mut signs = 0;
        while let Some(s @ (b'+' | b'-')) = self.peek() {
            if signs == 0 {
                negative = s == b'-';
            }
            signs += 1;
            self.pos += 1;
        }
        if signs > 1 {
            malformed = true;
        }

        let mut text = String::new();
        let mut seen_dot = false;
        let mut ignoring = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => {
                    if !ignoring {
                        text.push(c as char);
                    }
                }
                b'.' if !seen_dot => {
                    seen_dot = true;
                    text.push('.');
                }
                b'.' => {
                    malformed = true;
                    ignoring = true;
                }
                _ => break,
            }
            self.pos += 1;
        }

        // A sign or dot followed by a regular character ("-abc") is swallowed here.
        if !text.bytes().any(|c| c.is_ascii_digit()) {
            while self.peek().is_some_and(Self::is_regular) {
                self.pos += 1;
            }
            return (Token::Int(0), true);
        }

        let token = if seen_dot {
            let v: f64 = text.parse().unwrap_or(0.0);
            Token::Real(if negative { -v } else { v })
        } else {
            match text.parse::<i64>() {
                Ok(v) => Token::Int(if negative { -v } else { v }),
                Err(_) => {
                    let v: f64 = text.parse().unwrap_or(0.0);
                    Token::Real(if negative { -v } else { v })
                }
            }
        };
        (token, malformed)
    }

    /// `/Name` with `#xx` escapes. A `#` not followed by two hex digits is kept.
    fn lex_name(&mut self) -> (Token, bool) {
        self.pos += 1;
        let mut name = Vec::new();
        let mut malformed = false;
        while let Some(b) = self.peek() {
            if !Self::is_regular(b) {
                break;
            }
            if b == b'#' {
                let hi = self.peek_at(1).and_then(hex_value);
                let lo = self.peek_at(2).and_then(hex_value);
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    name.push((hi << 4) | lo);
                    self.pos += 3;
                    continue;
                }
                malformed = true;
            }
            name.push(b);
            self.pos += 1;
        }
        (Token::Name(Name::from_bytes(&name)), malformed)
    }

    /// `(...)` with nesting, escapes, octal codes and line continuations.
    fn lex_literal_string(&mut self) -> (Token, bool) {
        self.pos += 1;
        let mut out = Vec::new();
        let mut depth = 1usize;
        loop {
            let Some(c) = self.advance() else {
                return (Token::String(out), true);
            };
            match c {
                b'(' => {
                    depth += 1;
                    out.push(c);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    out.push(c);
                }
                b'\r' => {
                    // Unescaped EOL of any flavor reads as a single \n.
                    if self.peek() == Some(b'\n') {
                        self.pos += 1;
                    }
                    out.push(b'\n');
                }
                b'\\' => {
                    let Some(e) = self.advance() else {
                        return (Token::String(out), true);
                    };
                    match e {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'(' | b')' | b'\\' => out.push(e),
                        b'\r' => {
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        b'0'..=b'7' => {
                            let mut code = u32::from(e - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        code = code * 8 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((code & 0xff) as u8);
                        }
                        // Unknown escape: the backslash is dropped.
                        other => out.push(other),
                    }
                }
                _ => out.push(c),
            }
        }
        (Token::String(out), false)
    }

    /// `<...>`; whitespace is ignored and an odd digit count gets a trailing 0 nibble.
    fn lex_hex_string(&mut self) -> (Token, bool) {
        self.pos += 1;
        let mut out = Vec::new();
        let mut pending: Option<u8> = None;
        let mut malformed = false;
        loop {
            let Some(c) = self.advance() else {
                malformed = true;
                break;
            };
            if c == b'>' {
                break;
            }
            if Self::is_whitespace(c) {
                continue;
            }
            match hex_value(c) {
                Some(v) => match pending.take() {
                    Some(hi) => out.push((hi << 4) | v),
                    None => pending = Some(v),
                },
                None => malformed = true,
            }
        }
        if let Some(hi) = pending {
            out.push(hi << 4);
        }
        (Token::String(out), malformed)
    }

    fn lex_keyword(&mut self) -> (Token, bool) {
        let start = self.pos;
        while self.peek().is_some_and(Self::is_regular) {
            self.pos += 1;
        }
        let word = &self.data[start..self.pos];
        if word == b"stream" {
            match self.peek() {
                Some(b'\r') => {
                    self.pos += 1;
                    if self.peek() == Some(b'\n') {
                        self.pos += 1;
                    }
                }
                Some(b'\n') => self.pos += 1,
                _ => {}
            }
            return (Token::StreamStart, false);
        }
        (Token::Keyword(Keyword::from_bytes(word)), false)
    }
}

const fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Position of the first occurrence of `needle` in `hay`.
pub(crate) fn find_bytes(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    hay.windows(needle.len()).position(|w| w == needle)
}

/// Position of the last occurrence of `needle` in `hay`.
pub(crate) fn rfind_bytes(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    hay.windows(needle.len()).rposition(|w| w == needle)
}
