//! Public entry points for opening documents.
//!
//! # Example
//!
//! ```ignore
//! use folio_core::api::OpenOptions;
//!
//! let doc = OpenOptions::new().password("secret").open_path("document.pdf")?;
//! let catalog = doc.catalog();
//! ```

pub mod builder;

pub use builder::OpenOptions;
