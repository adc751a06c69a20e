//! Builder pattern for opening documents.
//!
//! Provides a fluent API for the knobs that bound work on hostile input.
//!
//! # Example
//! ```ignore
//! use folio_core::api::OpenOptions;
//!
//! let doc = OpenOptions::new()
//!     .password("secret")
//!     .cache_capacity(4096)
//!     .max_decoded_size(64 << 20)
//!     .open_path("document.pdf")?;
//! ```

use std::fs::File;
use std::path::Path;

use bytes::Bytes;
use memmap2::Mmap;
use tracing::debug;

use crate::codec::DecodeLimits;
use crate::document::cache::DEFAULT_CACHE_CAPACITY;
use crate::document::catalog::PDFDocument;
use crate::error::Result;

/// Sections followed along `Prev` / `XRefStm` before giving up.
pub const DEFAULT_MAX_XREF_SECTIONS: usize = 1024;
/// Bytes scanned backward from end of file for `startxref`.
pub const DEFAULT_STARTXREF_WINDOW: usize = 1024;
/// Largest output of a single filter.
pub const DEFAULT_MAX_DECODED_SIZE: usize = 256 * 1024 * 1024;

/// A builder for configuring how a document is opened.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub(crate) password: Option<String>,
    pub(crate) cache_capacity: usize,
    pub(crate) max_xref_sections: usize,
    pub(crate) max_decoded_size: usize,
    pub(crate) startxref_window: usize,
    pub(crate) reconstruct_on_failure: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self {
            password: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_xref_sections: DEFAULT_MAX_XREF_SECTIONS,
            max_decoded_size: DEFAULT_MAX_DECODED_SIZE,
            startxref_window: DEFAULT_STARTXREF_WINDOW,
            reconstruct_on_failure: true,
        }
    }

    /// Sets the password for encrypted PDFs.
    ///
    /// It is tried as the user password first, then as the owner password.
    /// Without one, the empty password is tried.
    pub fn password(mut self, pwd: &str) -> Self {
        self.password = Some(pwd.to_string());
        self
    }

    /// Number of resolved objects kept in the LRU cache (0 disables caching).
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn max_xref_sections(mut self, max: usize) -> Self {
        self.max_xref_sections = max.max(1);
        self
    }

    /// Cap on what any one filter may output; larger results are truncated
    /// and reported.
    pub fn max_decoded_size(mut self, bytes: usize) -> Self {
        self.max_decoded_size = bytes;
        self
    }

    pub fn startxref_window(mut self, bytes: usize) -> Self {
        self.startxref_window = bytes;
        self
    }

    /// Whether to rebuild the xref by scanning when the tables are unusable.
    pub fn reconstruct_on_failure(mut self, enabled: bool) -> Self {
        self.reconstruct_on_failure = enabled;
        self
    }

    pub(crate) const fn limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_output: self.max_decoded_size,
        }
    }

    /// Opens a document held in memory.
    pub fn open_bytes(&self, data: impl Into<Bytes>) -> Result<PDFDocument> {
        PDFDocument::open_with(data.into(), self)
    }

    /// Memory-maps the file at `path` and opens it.
    pub fn open_path(&self, path: impl AsRef<Path>) -> Result<PDFDocument> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: read-only mapping; the file must not be truncated while mapped.
        let mmap = unsafe { Mmap::map(&file) }?;
        debug!(path = %path.display(), len = mmap.len(), "mapped document");
        self.open_bytes(Bytes::from_owner(mmap))
    }
}
