//! PDF tokenizing and parsing.
//!
//! - `lexer`: byte-level tokenizer
//! - `pdf_parser`: object parser (arrays, dicts, references, streams, envelopes)

pub mod lexer;
pub mod pdf_parser;

// Re-export main types for convenience
pub use lexer::{Keyword, Lexeme, Lexer, Token};
pub use pdf_parser::{PDFParser, ResolveLength};
