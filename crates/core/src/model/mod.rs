//! PDF object model.
//!
//! - `name` - interned name symbols
//! - `objects` - PDF object types (PDFObject, Dict, PDFStream, PDFObjRef)

pub mod name;
pub mod objects;

// Re-export main types for convenience
pub use name::Name;
pub use objects::{Dict, PDFObjRef, PDFObject, PDFStream, StreamContent};
