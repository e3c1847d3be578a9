//! # pdf-suite
//!
//! A template-driven PDF generation and manipulation engine. The crate
//! turns a declarative document template (title, tables, cells, form
//! fields, images, bookmarks, footer) into a finished PDF byte stream,
//! and offers companion operations on existing PDFs:
//! - merging documents with object-number remapping
//! - form-field filling from XFDF or plain name/value maps
//! - text-position extraction
//! - rectangular and text-search redaction (visual or secure)
//!
//! # Example
//!
//! ```
//! use pdf_suite::template::{Template, Title};
//! use pdf_suite::pdf::generate_pdf;
//!
//! let template = Template {
//!     title: Some(Title {
//!         text: Some("Hello".to_string()),
//!         props: "Helvetica:18:100:center".to_string(),
//!         ..Default::default()
//!     }),
//!     ..Default::default()
//! };
//!
//! let bytes = generate_pdf(&template).expect("generation failed");
//! assert!(bytes.starts_with(b"%PDF-"));
//! ```

pub mod error;
pub mod layout;
pub mod pdf;
pub mod scan;
pub mod template;

// Re-export commonly used items
pub use error::{Error, Result};
pub use pdf::{generate_pdf, generate_pdf_with, GenerateOptions};
pub use scan::fill::{fill_form, fill_with_xfdf, parse_xfdf};
pub use scan::merge::{merge_documents, merge_files, MergeOptions};
pub use scan::redact::{
    apply_redactions, extract_text_positions, find_text_rects, RedactRect, RedactionMode,
    RedactionReport, TextSearch,
};
pub use template::Template;
