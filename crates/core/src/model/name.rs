//! Interned PDF names.
//!
//! Every `/Name` token is interned once in a process-wide [`ThreadedRodeo`], so
//! dictionary keys are a `Copy` key compared by integer instead of by string.

use lasso::{Spur, ThreadedRodeo};
use once_cell::sync::Lazy;
use std::fmt;

static NAMES: Lazy<ThreadedRodeo> = Lazy::new(ThreadedRodeo::new);

/// An interned PDF name object (without the leading slash).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Name(Spur);

impl Name {
    /// Intern `s` and return its symbol.
    pub fn new(s: &str) -> Self {
        Self(NAMES.get_or_intern(s))
    }

    /// Intern raw name bytes (after `#xx` unescaping).
    ///
    /// Bytes that are not UTF-8 are mapped one-to-one onto U+0000..U+00FF.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(s) => Self::new(s),
            Err(_) => {
                let latin1: String = bytes.iter().map(|&b| b as char).collect();
                Self::new(&latin1)
            }
        }
    }

    /// Look up an already interned name without interning it.
    pub fn lookup(s: &str) -> Option<Self> {
        NAMES.get(s).map(Self)
    }

    pub fn as_str(&self) -> &'static str {
        NAMES.resolve(&self.0)
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Writes the name in PDF syntax, escaping delimiters and non-printables as `#xx`.
impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("/")?;
        for ch in self.as_str().chars() {
            let c = ch as u32;
            let needs_escape = c < 0x21
                || c > 0x7e
                || matches!(
                    ch,
                    '#' | '/' | '%' | '(' | ')' | '<' | '>' | '[' | ']' | '{' | '}'
                );
            if needs_escape && c <= 0xff {
                write!(f, "#{:02X}", c)?;
            } else {
                write!(f, "{}", ch)?;
            }
        }
        Ok(())
    }
}
