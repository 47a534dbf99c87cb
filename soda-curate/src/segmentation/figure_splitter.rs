//! Figure legends → per-figure caption blocks
//!
//! A figure block starts where a figure label (`Figure 1`, `Fig. 2`,
//! `Figure EV3`) opens a line or paragraph, optionally wrapped in inline
//! formatting tags, and runs until the next such label.

use crate::models::Figure;
use crate::verification::strip_html;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Caption emitted for an expected figure the legends do not contain
pub const CAPTION_NOT_FOUND: &str = "Figure caption not found.";

static FIGURE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:^|\n|<p\b[^>]*>|<br\s*/?>)[ \t]*(?:<(?:b|strong|i|em|span)\b[^>]*>[ \t]*)*(?P<label>fig(?:ure)?\.?[ \t]*(?P<ev>ev[ \t]*)?(?P<num>\d+))",
    )
    .expect("Invalid figure label regex")
});

static LABEL_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:fig(?:ure)?\.?\s*)?(?P<ev>ev\s*)?(?P<num>\d+)\s*[.:]?\s*$")
        .expect("Invalid label text regex")
});

static LEADING_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:\s*(?:</(?:b|strong|i|em|span)>|[.:]))+").expect("Invalid leading noise regex")
});

static TRAILING_BLOCK_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\s*(?:</p>|<p\b[^>]*>|<br\s*/?>))+\s*$").expect("Invalid trailing tag regex")
});

/// One figure's slice of the legends text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FigureBlock {
    /// Canonical label (`Figure 3`, `Figure EV1`)
    pub figure_label: String,
    pub caption_title: String,
    /// Caption body after the label, formatting preserved
    pub figure_caption: String,
}

/// Canonical form of a figure label: `Figure N` or `Figure EVN`
///
/// Returns None for text that is not a figure label.
pub fn canonical_figure_label(raw: &str) -> Option<String> {
    let caps = LABEL_TEXT.captures(raw)?;
    let num: u32 = caps.name("num")?.as_str().parse().ok()?;
    Some(if caps.name("ev").is_some() {
        format!("Figure EV{}", num)
    } else {
        format!("Figure {}", num)
    })
}

/// Split legends into figure blocks in document order
///
/// Repeated labels produce repeated blocks; callers decide which wins.
pub fn split_figure_blocks(legends: &str) -> Vec<FigureBlock> {
    let starts: Vec<(usize, usize, String)> = FIGURE_LABEL
        .captures_iter(legends)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.name("label")?;
            let num: u32 = caps.name("num")?.as_str().parse().ok()?;
            let canonical = if caps.name("ev").is_some() {
                format!("Figure EV{}", num)
            } else {
                format!("Figure {}", num)
            };
            Some((whole.start(), label.end(), canonical))
        })
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(i, (_, body_start, label))| {
            let end = starts.get(i + 1).map_or(legends.len(), |next| next.0);
            let raw = &legends[*body_start..end];
            let body = LEADING_NOISE.replace(raw, "");
            let body = TRAILING_BLOCK_TAGS.replace(&body, "");
            let figure_caption = body.trim().to_string();
            FigureBlock {
                figure_label: label.clone(),
                caption_title: first_sentence(&figure_caption),
                figure_caption,
            }
        })
        .collect()
}

/// First sentence (or first line) of a caption, as plain text
pub fn first_sentence(caption: &str) -> String {
    let plain = strip_html(caption);
    let line = plain.trim().lines().next().unwrap_or("").trim();
    let mut search_from = 0;
    while let Some(offset) = line[search_from..].find(". ") {
        let end = search_from + offset;
        let before = &line[..end];
        // "Fig. 2" and "e.g. " do not end a sentence
        let last_word = before.rsplit(' ').next().unwrap_or("");
        let abbreviation = matches!(
            last_word.to_ascii_lowercase().as_str(),
            "fig" | "figs" | "e.g" | "i.e" | "vs" | "et al" | "al" | "ref" | "approx"
        );
        if !abbreviation {
            return line[..=end].trim().to_string();
        }
        search_from = end + 2;
    }
    line.to_string()
}

/// Expected figure labels for a manuscript
///
/// Explicit labels win; when fewer labels than `expected_figure_count` are
/// given, the list is padded with the lowest unused `Figure N` labels.
pub fn expected_figure_labels(expected_figure_count: usize, expected_labels: &[String]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::with_capacity(expected_figure_count.max(expected_labels.len()));
    for raw in expected_labels {
        let label = canonical_figure_label(raw).unwrap_or_else(|| raw.trim().to_string());
        if !label.is_empty() && !labels.contains(&label) {
            labels.push(label);
        }
    }

    let mut n = 1u32;
    while labels.len() < expected_figure_count {
        let candidate = format!("Figure {}", n);
        if !labels.contains(&candidate) {
            labels.push(candidate);
        }
        n += 1;
    }
    labels
}

/// Split legends into one figure stub per expected label
///
/// Expected figures missing from the text are emitted with
/// [`CAPTION_NOT_FOUND`] and a warning; figures the text contains but nobody
/// expected are dropped with a log message. When a label occurs twice, the
/// first block wins.
pub fn segment(legends: &str, expected_figure_count: usize, expected_labels: &[String]) -> Vec<Figure> {
    let expected = expected_figure_labels(expected_figure_count, expected_labels);
    let blocks = split_figure_blocks(legends);

    let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();
    let unexpected: Vec<&str> = blocks
        .iter()
        .map(|b| b.figure_label.as_str())
        .filter(|l| !expected_set.contains(l))
        .collect();
    if !unexpected.is_empty() {
        warn!(labels = ?unexpected, "Legends contain figures that were not expected");
    }

    let figures: Vec<Figure> = expected
        .iter()
        .map(|label| {
            let mut matching = blocks.iter().filter(|b| &b.figure_label == label);
            let mut figure = Figure::new(label.clone());
            match matching.next() {
                Some(block) => {
                    figure.caption_title = block.caption_title.clone();
                    figure.figure_caption = block.figure_caption.clone();
                    if matching.next().is_some() {
                        figure.add_warning(format!(
                            "{} appears more than once in the legends; first occurrence used",
                            label
                        ));
                    }
                }
                None => {
                    figure.figure_caption = CAPTION_NOT_FOUND.to_string();
                    figure.is_verbatim = false;
                    figure.add_warning(format!("{} caption not found in the legends", label));
                }
            }
            figure
        })
        .collect();

    debug!(
        expected = expected.len(),
        found = blocks.len(),
        "Segmented figure legends"
    );
    figures
}

/// Whether a figure stub stands in for a caption that was not found
pub fn is_caption_missing(figure: &Figure) -> bool {
    figure.figure_caption == CAPTION_NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGENDS: &str = "<p><b>Figure 1.</b> Loss of X impairs growth. (A) Western blot. (B) Quantification.</p>\
<p><b>Figure 2.</b> X binds Y.</p>\
<p>Figure EV1: Controls for Figure 1.</p>";

    #[test]
    fn test_blocks_split_at_labels() {
        let blocks = split_figure_blocks(LEGENDS);
        let labels: Vec<&str> = blocks.iter().map(|b| b.figure_label.as_str()).collect();
        assert_eq!(labels, vec!["Figure 1", "Figure 2", "Figure EV1"]);
        assert_eq!(
            blocks[0].figure_caption,
            "Loss of X impairs growth. (A) Western blot. (B) Quantification."
        );
        assert_eq!(blocks[0].caption_title, "Loss of X impairs growth.");
        assert_eq!(blocks[2].figure_caption, "Controls for Figure 1.");
    }

    #[test]
    fn test_inline_figure_reference_not_a_block() {
        let blocks = split_figure_blocks("Figure 1. Cells as in Figure 2 were imaged.");
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].figure_caption.contains("Figure 2 were imaged"));
    }

    #[test]
    fn test_plain_text_lines() {
        let blocks = split_figure_blocks("Fig. 1 First.\nFig. 2 Second.");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].figure_label, "Figure 2");
        assert_eq!(blocks[1].figure_caption, "Second.");
    }

    #[test]
    fn test_missing_figure_marked() {
        let figures = segment("Figure 1. Only one.", 2, &[]);
        assert_eq!(figures.len(), 2);
        assert_eq!(figures[1].figure_label, "Figure 2");
        assert!(is_caption_missing(&figures[1]));
        assert!(!figures[1].errors.is_empty());
        assert!(!is_caption_missing(&figures[0]));
    }

    #[test]
    fn test_unexpected_figure_dropped() {
        let figures = segment(LEGENDS, 1, &[]);
        assert_eq!(figures.len(), 1);
        assert_eq!(figures[0].figure_label, "Figure 1");
    }

    #[test]
    fn test_duplicate_block_first_wins() {
        let figures = segment("Figure 1. First.\nFigure 1. Second.", 1, &[]);
        assert_eq!(figures[0].figure_caption, "First.");
        assert_eq!(figures[0].errors.len(), 1);
    }

    #[test]
    fn test_expected_labels_canonicalized_and_padded() {
        let labels = expected_figure_labels(3, &["Fig. 2".to_string(), "EV1".to_string()]);
        assert_eq!(labels, vec!["Figure 2", "Figure EV1", "Figure 1"]);
    }

    #[test]
    fn test_first_sentence_skips_abbreviations() {
        assert_eq!(
            first_sentence("Binding (see Fig. 2) is lost. More text."),
            "Binding (see Fig. 2) is lost."
        );
        assert_eq!(first_sentence("No period here"), "No period here");
    }
}
