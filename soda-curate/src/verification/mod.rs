//! Verbatim verification gate

pub mod verbatim;

pub use verbatim::{
    normalize_text, strip_html, VerbatimVerifier, VerificationDiagnostic, VerificationOutcome,
};
