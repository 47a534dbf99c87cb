//! Source-data path tokenization
//!
//! `Fig1/A/data_raw.csv` → segments `[fig1, a, data_raw]`,
//! tokens `[fig1, a, data, raw]`. Everything is lowercased and the file
//! extension is dropped.

use crate::utils::paths::{normalize_path, ARCHIVE_MEMBER_SEPARATOR};
use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s_\-.,()\[\]+]+").expect("Invalid token separator regex"));

static EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[A-Za-z0-9]{1,5}$").expect("Invalid extension regex"));

/// Tokenized view of one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTokens {
    /// Path segments (directories, archive names, file stem), lowercased
    pub segments: Vec<String>,
    /// Segments split on separators, in order
    pub tokens: Vec<String>,
}

impl PathTokens {
    pub fn is_segment(&self, token: &str) -> bool {
        self.segments.iter().any(|s| s == token)
    }
}

/// Tokenize a source-data path
pub fn tokenize(path: &str) -> PathTokens {
    let normalized = normalize_path(path);
    let raw_segments: Vec<&str> = normalized
        .split(['/', ARCHIVE_MEMBER_SEPARATOR])
        .filter(|s| !s.is_empty())
        .collect();

    let last = raw_segments.len().saturating_sub(1);
    let segments: Vec<String> = raw_segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            let stem = if i == last || segment.to_ascii_lowercase().ends_with(".zip") {
                EXTENSION.replace(segment, "").into_owned()
            } else {
                segment.to_string()
            };
            stem.to_lowercase()
        })
        .collect();

    let tokens = segments
        .iter()
        .flat_map(|segment| {
            TOKEN_SEPARATOR
                .split(segment)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();

    PathTokens { segments, tokens }
}
