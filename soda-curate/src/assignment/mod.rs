//! Source-data assignment
//!
//! `router` splits a manuscript's source files across figures, `assigner`
//! maps one figure's files onto its panels.

pub mod assigner;
pub mod router;
pub mod tokenizer;

pub use assigner::{normalize_label, Assignment, SourceDataAssigner};
pub use router::{referenced_figure, route_source_files, SourceRouting};
pub use tokenizer::{tokenize, PathTokens};
