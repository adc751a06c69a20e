//! folio - lazily resolved PDF object graph.
//!
//! Tokenizer, object parser, cross-reference engine, standard security
//! handler and stream filter chain. [`PDFDocument`] is the entry point.

pub mod api;
pub mod codec;
pub mod document;
pub mod error;
pub mod model;
pub mod parser;

pub use api::OpenOptions;
pub use codec::{DecodeLimits, DecodedStream, Filter};
pub use document::{PDFDocument, Resolved, Trailer, XRefEntry};
pub use error::{Diagnostic, PdfError, Result};
pub use model::{Dict, Name, PDFObjRef, PDFObject, PDFStream, StreamContent};
