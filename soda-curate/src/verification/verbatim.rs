//! Verbatim extraction check
//!
//! A candidate span is verbatim when it occurs in the reference after both are
//! normalized:
//! 1. HTML tags stripped and entities decoded
//! 2. Lowercased
//! 3. Unicode NFKC (superscripts, ligatures and the micro sign fold to plain
//!    forms; accented letters stay composed)
//! 4. Everything except letters, digits, `_` and whitespace removed
//! 5. Whitespace collapsed
//!
//! Spans longer than 200 normalized characters also pass when their first and
//! last 100 characters are both found. Nothing here retries; callers decide.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

static BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(p|div|br|li|ul|ol|tr|td|th|h[1-6]|table|section)\b[^>]*>")
        .expect("Invalid block tag regex")
});

/// Spans longer than this use the head/tail comparison as a fallback
const LONG_SPAN_CHARS: usize = 200;
const HEAD_TAIL_CHARS: usize = 100;
/// Similarity at or above which a span is not considered hallucinated
const NEAR_VERBATIM_SIMILARITY: f64 = 0.98;

/// Why a span failed verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationDiagnostic {
    /// Closest reference window (normalized text)
    pub nearest_match: String,
    /// Similarity of that window to the candidate (0.0-1.0)
    pub similarity: f64,
    /// Character offset in the normalized candidate where matching stops
    pub divergence_offset: usize,
    pub detail: String,
}

/// Result of one verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub is_verbatim: bool,
    pub diagnostic: Option<VerificationDiagnostic>,
}

/// Verbatim verifier (pure, no state)
#[derive(Debug, Clone, Copy, Default)]
pub struct VerbatimVerifier;

impl VerbatimVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Check whether `candidate` occurs in `reference`
    pub fn verify(&self, candidate: &str, reference: &str) -> VerificationOutcome {
        let normalized_candidate = normalize_text(candidate);
        let normalized_reference = normalize_text(reference);

        if normalized_candidate.is_empty() || normalized_reference.is_empty() {
            return VerificationOutcome {
                is_verbatim: false,
                diagnostic: Some(VerificationDiagnostic {
                    nearest_match: String::new(),
                    similarity: 0.0,
                    divergence_offset: 0,
                    detail: "One or both texts are empty".to_string(),
                }),
            };
        }

        if contains_normalized(&normalized_candidate, &normalized_reference) {
            return VerificationOutcome {
                is_verbatim: true,
                diagnostic: None,
            };
        }

        let (nearest_match, similarity) =
            nearest_window(&normalized_candidate, &normalized_reference);
        let divergence_offset = divergence_offset(&normalized_candidate, &normalized_reference);
        VerificationOutcome {
            is_verbatim: false,
            diagnostic: Some(VerificationDiagnostic {
                detail: format!(
                    "Text diverges from the source after {} characters (best similarity {:.2})",
                    divergence_offset, similarity
                ),
                nearest_match,
                similarity,
                divergence_offset,
            }),
        }
    }

    /// 0.0 when the candidate is verbatim or near-verbatim, else `1 - similarity`
    pub fn hallucination_score(&self, candidate: &str, reference: &str) -> f64 {
        let normalized_candidate = normalize_text(candidate);
        let normalized_reference = normalize_text(reference);
        if normalized_candidate.is_empty() {
            return 0.0;
        }
        if normalized_reference.is_empty() {
            return 1.0;
        }
        if contains_normalized(&normalized_candidate, &normalized_reference) {
            return 0.0;
        }
        let (_, similarity) = nearest_window(&normalized_candidate, &normalized_reference);
        if similarity >= NEAR_VERBATIM_SIMILARITY {
            0.0
        } else {
            (1.0 - similarity).clamp(0.0, 1.0)
        }
    }
}

/// Normalize text for verbatim comparison
pub fn normalize_text(text: &str) -> String {
    let plain = strip_html(text);
    let folded: String = plain.to_lowercase().nfkc().collect();
    let kept: String = folded
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tag-free text of an HTML fragment; block boundaries become spaces
pub fn strip_html(text: &str) -> String {
    if !text.contains('<') && !text.contains('&') {
        return text.to_string();
    }
    let spaced = BLOCK_TAG.replace_all(text, " ");
    let fragment = Html::parse_fragment(&spaced);
    fragment.root_element().text().collect::<String>()
}

fn contains_normalized(candidate: &str, reference: &str) -> bool {
    if reference.contains(candidate) {
        return true;
    }
    let chars: Vec<char> = candidate.chars().collect();
    if chars.len() > LONG_SPAN_CHARS {
        let head: String = chars[..HEAD_TAIL_CHARS].iter().collect();
        let tail: String = chars[chars.len() - HEAD_TAIL_CHARS..].iter().collect();
        return reference.contains(&head) && reference.contains(&tail);
    }
    false
}

/// Reference window with the same word count as the candidate that is most similar
fn nearest_window(candidate: &str, reference: &str) -> (String, f64) {
    let reference_words: Vec<&str> = reference.split(' ').collect();
    let window = candidate.split(' ').count().max(1);

    if reference_words.len() <= window {
        return (
            reference.to_string(),
            strsim::sorensen_dice(candidate, reference),
        );
    }

    let mut best = (String::new(), 0.0f64);
    for start in 0..=(reference_words.len() - window) {
        let slice = reference_words[start..start + window].join(" ");
        let similarity = strsim::sorensen_dice(candidate, &slice);
        if similarity > best.1 {
            best = (slice, similarity);
        }
    }
    best
}

/// Length in chars of the longest candidate prefix found in the reference
fn divergence_offset(candidate: &str, reference: &str) -> usize {
    let boundaries: Vec<usize> = candidate
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(candidate.len()))
        .collect();

    // Containment of prefixes is monotone, so binary search on char count
    let (mut lo, mut hi) = (0usize, boundaries.len() - 1);
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if reference.contains(&candidate[..boundaries[mid]]) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_and_whitespace_ignored() {
        let verifier = VerbatimVerifier::new();
        let reference = "<p><b>Figure 1.</b> Cells   were <i>stained</i> with DAPI.</p>";
        assert!(verifier.verify("cells were stained with DAPI", reference).is_verbatim);
    }

    #[test]
    fn test_entities_and_superscripts() {
        let verifier = VerbatimVerifier::new();
        let reference = "Scale bar, 10&nbsp;&micro;m; area in mm&sup2;";
        assert!(verifier.verify("scale bar 10 μm area in mm2", reference).is_verbatim);
    }

    #[test]
    fn test_compatibility_forms_fold() {
        assert_eq!(normalize_text("ﬁbroblasts at 37 °C"), "fibroblasts at 37 c");
        assert_eq!(normalize_text("Caf\u{0065}\u{0301}"), "café");
        assert_ne!(normalize_text("café"), normalize_text("cafe"));
    }

    #[test]
    fn test_block_tags_separate_words() {
        assert_eq!(normalize_text("<p>end.</p><p>Next</p>"), "end next");
    }

    #[test]
    fn test_mismatch_has_diagnostic() {
        let verifier = VerbatimVerifier::new();
        let outcome = verifier.verify(
            "cells were stained with Hoechst",
            "Cells were stained with DAPI and imaged.",
        );
        assert!(!outcome.is_verbatim);
        let diagnostic = outcome.diagnostic.unwrap();
        assert_eq!(diagnostic.divergence_offset, "cells were stained with ".len());
        assert!(diagnostic.similarity > 0.5);
        assert!(diagnostic.nearest_match.starts_with("cells were stained"));
    }

    #[test]
    fn test_empty_inputs_fail() {
        let verifier = VerbatimVerifier::new();
        assert!(!verifier.verify("", "something").is_verbatim);
        assert!(!verifier.verify("something", "").is_verbatim);
    }

    #[test]
    fn test_long_span_head_tail_fallback() {
        let head = "a".repeat(10) + " " + &"word ".repeat(30);
        let tail = "final ".repeat(25);
        let reference = format!("{} middle {}", head.trim(), tail.trim());
        let candidate = format!("{} altered middle {}", head.trim(), tail.trim());
        assert!(normalize_text(&candidate).chars().count() > 200);
        assert!(VerbatimVerifier::new().verify(&candidate, &reference).is_verbatim);
    }

    #[test]
    fn test_hallucination_score() {
        let verifier = VerbatimVerifier::new();
        let source = "Western blot of lysates from treated cells.";
        assert_eq!(verifier.hallucination_score("western blot of lysates", source), 0.0);
        let unrelated = verifier.hallucination_score("zebrafish embryos at 48 hpf", source);
        assert!(unrelated > 0.5, "score {}", unrelated);
    }

    #[test]
    fn test_inputs_not_mutated() {
        let candidate = String::from("<b>A</b> text");
        let reference = String::from("<b>A</b> text and more");
        let _ = VerbatimVerifier::new().verify(&candidate, &reference);
        assert_eq!(candidate, "<b>A</b> text");
        assert_eq!(reference, "<b>A</b> text and more");
    }
}
