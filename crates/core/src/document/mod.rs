//! PDF Document module - cross-reference tables, security and object access.
//!
//! This module contains:
//! - `catalog` - the document façade and object resolution (PDFDocument)
//! - `xref` - cross-reference loading, merging and reconstruction
//! - `cache` - LRU cache of resolved objects
//! - `security` - standard security handler
//! - `saslprep` - RFC 4013 SASLprep for password normalization

pub mod cache;
pub mod catalog;
pub mod saslprep;
pub mod security;
pub mod xref;

// Re-export main types for convenience
pub use cache::CacheStats;
pub use catalog::{PDFDocument, Resolved};
pub use saslprep::saslprep;
pub use security::{
    CryptAlgorithm, DecryptKey, PASSWORD_PADDING, SecurityHandler, StandardSecurityHandler,
    decrypt_bytes, derive_document_key, object_key,
};
pub use xref::{SectionKind, Trailer, XRefEntry, XRefSection, XRefTable};
