//! Error types for folio.
//!
//! Two tiers: [`PdfError`] for failures that abort an operation (only I/O and
//! authentication abort `open`), and [`Diagnostic`] for anomalies the engine
//! absorbs while still producing a best-effort value.

use crate::model::objects::PDFObjRef;
use thiserror::Error;

/// Primary error type for PDF operations.
#[derive(Error, Debug)]
pub enum PdfError {
    #[error("invalid token at position {pos}: {msg}")]
    TokenError { pos: usize, msg: String },

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("type error: expected {expected}, got {got}")]
    TypeError {
        expected: &'static str,
        got: &'static str,
    },

    #[error("key not found: {0}")]
    KeyError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF object not found: {0}")]
    ObjectNotFound(u32),

    #[error("no valid xref table found")]
    NoValidXRef,

    #[error("PDF syntax error: {0}")]
    SyntaxError(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("password rejected by the security handler")]
    DecryptionAuthFailure,

    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    #[error("encryption error: {0}")]
    EncryptionError(String),
}

/// Convenience Result type alias for PdfError.
pub type Result<T> = std::result::Result<T, PdfError>;

/// A recoverable anomaly encountered while reading a document.
///
/// Returned next to the best-effort value it qualifies, so callers can tell
/// "legitimately null" from "present but damaged".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A number, name or string token was damaged; a substitute value was used.
    MalformedToken { pos: usize },
    /// The declared `/Length` did not land on `endstream`; the body was rescanned.
    MalformedStreamLength {
        declared: Option<usize>,
        actual: usize,
    },
    /// A reference pointed at nothing usable and resolved to null.
    UnresolvableReference(PDFObjRef),
    /// The cross-reference data was unusable and was rebuilt by scanning.
    XRefCorrupt(String),
    /// A reference was reached while already being resolved and resolved to null.
    CyclicReference(PDFObjRef),
    /// The stream names a filter this engine does not decode; data is left encoded.
    UnsupportedFilter(String),
    /// A filter failed part way; the decoded prefix was kept.
    DecodeFailed { filter: &'static str, reason: String },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedToken { pos } => write!(f, "malformed token at {}", pos),
            Self::MalformedStreamLength { declared, actual } => match declared {
                Some(n) => write!(f, "stream /Length {} is wrong, recovered {}", n, actual),
                None => write!(f, "stream /Length missing, recovered {}", actual),
            },
            Self::UnresolvableReference(r) => write!(f, "unresolvable reference {}", r),
            Self::XRefCorrupt(reason) => write!(f, "xref corrupt: {}", reason),
            Self::CyclicReference(r) => write!(f, "cyclic reference {}", r),
            Self::UnsupportedFilter(name) => write!(f, "unsupported filter /{}", name),
            Self::DecodeFailed { filter, reason } => write!(f, "{} failed: {}", filter, reason),
        }
    }
}
