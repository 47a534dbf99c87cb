//! Source-data assignment
//!
//! Maps source-data file paths to panel labels by filename tokens.
//!
//! **Matching rules** (case-insensitive, on tokens from `tokenize`):
//! - a lone token equal to a letter or Roman label (`Fig1/A/data.csv`)
//! - `panel` followed by a label (`panel B`, `panelB`, `panel_3`)
//! - figure-plus-panel tokens (`Fig1A`, `figure2bc`); the figure number must
//!   match the figure being assigned when a figure context is set
//! - numeric labels only as a whole path segment or after `panel`
//!
//! A path naming a different figure matches nothing. A path matching more
//! than one label is never split: it goes to `unassigned` and is flagged in
//! `ambiguous`. Junk files (`__MACOSX`, `.DS_Store`, …) are ignored.
//! The partition depends only on the inputs.

use crate::assignment::tokenizer::{tokenize, PathTokens};
use crate::labels::clean_label;
use crate::models::Figure;
use crate::utils::paths::{is_junk_path, normalize_path};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// `fig1`, `figure2b`, `figev3`
static FIGURE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:fig|figure)(?P<ev>ev)?(?P<num>\d+)(?P<panels>[a-z]*)$").expect("Invalid figure token regex")
});

/// Token following a bare `fig`/`figure`: `1`, `1a`, `ev2`
static FIGURE_REST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<ev>ev)?(?P<num>\d+)(?P<panels>[a-z]*)$").expect("Invalid figure rest regex"));

/// Longest run of panel letters accepted after a figure number
const MAX_GLUED_PANELS: usize = 4;

/// Trailing digits on a letter label (`A1` → `A`)
static LETTER_WITH_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<letters>[A-Z]+)\d+$").expect("Invalid label digits regex"));

/// Partition of source-data paths over panel labels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Label → normalized paths, only labels that received files
    pub assigned: BTreeMap<String, Vec<String>>,
    /// Paths matching zero or several labels
    pub unassigned: Vec<String>,
    /// Subset of `unassigned` that matched several labels
    pub ambiguous: Vec<String>,
    /// OS clutter that was skipped
    pub ignored: Vec<String>,
}

impl Assignment {
    pub fn files_for(&self, label: &str) -> &[String] {
        self.assigned.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every path that was considered, in input order of the partitions
    pub fn considered(&self) -> Vec<String> {
        let mut all: Vec<String> = self.assigned.values().flatten().cloned().collect();
        all.extend(self.unassigned.iter().cloned());
        all
    }
}

/// Figure reference found in a path
#[derive(Debug, Clone, PartialEq, Eq)]
struct FigureRef {
    ev: bool,
    number: u32,
}

/// Source-data assigner
#[derive(Debug, Clone, Default)]
pub struct SourceDataAssigner {
    figure: Option<FigureRef>,
}

impl SourceDataAssigner {
    /// Assigner without figure context: any figure number is accepted
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept `FigNX` tokens naming this figure (`Figure 2`, `Figure EV1`)
    pub fn with_figure_context(figure_label: &str) -> Self {
        Self {
            figure: parse_figure_label(figure_label),
        }
    }

    /// Partition file paths over panel labels
    pub fn assign<S: AsRef<str>>(&self, panel_labels: &[S], file_paths: &[S]) -> Assignment {
        let labels = normalize_labels(panel_labels);
        let mut result = Assignment::default();
        let mut seen = HashSet::new();

        for raw in file_paths {
            let path = normalize_path(raw.as_ref());
            if path.is_empty() || !seen.insert(path.clone()) {
                continue;
            }
            if is_junk_path(&path) {
                result.ignored.push(path);
                continue;
            }

            let matched = self.referenced_labels(&tokenize(&path), &labels);
            match matched.len() {
                1 => {
                    if let Some(label) = matched.into_iter().next() {
                        result.assigned.entry(label).or_default().push(path);
                    }
                }
                0 => result.unassigned.push(path),
                _ => {
                    debug!(path = %path, labels = ?matched, "Path matches several panels, left unassigned");
                    result.ambiguous.push(path.clone());
                    result.unassigned.push(path);
                }
            }
        }

        debug!(
            assigned = result.assigned.values().map(Vec::len).sum::<usize>(),
            unassigned = result.unassigned.len(),
            ambiguous = result.ambiguous.len(),
            ignored = result.ignored.len(),
            "Assigned source data to panels"
        );
        result
    }

    /// Assign a figure's source-data files to its panels
    ///
    /// Figure-level `sd_files` become the normalized, non-junk input paths;
    /// panels receive their files and the rest goes to `unassigned_sd_files`.
    pub fn assign_figure<S: AsRef<str>>(&self, figure: &mut Figure, file_paths: &[S]) -> Assignment {
        let labels = figure.panel_labels();
        let path_strings: Vec<String> = file_paths.iter().map(|p| p.as_ref().to_string()).collect();
        let assignment = self.assign(&labels, &path_strings);

        for panel in figure.panels.iter_mut() {
            let key = normalize_label(&panel.panel_label);
            for path in assignment.files_for(&key) {
                if !panel.sd_files.contains(path) {
                    panel.sd_files.push(path.clone());
                }
            }
        }
        for path in assignment.considered() {
            if !figure.sd_files.contains(&path) {
                figure.sd_files.push(path);
            }
        }
        for path in &assignment.unassigned {
            if !figure.unassigned_sd_files.contains(path) {
                figure.unassigned_sd_files.push(path.clone());
            }
        }
        assignment
    }

    /// Labels a tokenized path refers to; empty if it names another figure
    fn referenced_labels(&self, path: &PathTokens, labels: &[String]) -> BTreeSet<String> {
        let tokens = &path.tokens;
        let mut figures: Vec<FigureRef> = Vec::new();
        let mut candidates: Vec<String> = Vec::new();

        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i].as_str();

            if let Some(caps) = FIGURE_TOKEN.captures(token) {
                if let Some(figure) = figure_ref(caps.name("ev").is_some(), caps.name("num").map(|m| m.as_str())) {
                    figures.push(figure);
                }
                let panels = caps.name("panels").map_or("", |m| m.as_str());
                candidates.extend(glued_panels(panels, labels));
                i += 1;
                continue;
            }

            if matches!(token, "fig" | "figure") {
                if let Some(caps) = tokens.get(i + 1).and_then(|next| FIGURE_REST.captures(next)) {
                    if let Some(figure) = figure_ref(caps.name("ev").is_some(), caps.name("num").map(|m| m.as_str())) {
                        figures.push(figure);
                    }
                    let panels = caps.name("panels").map_or("", |m| m.as_str());
                    candidates.extend(glued_panels(panels, labels));
                    i += 2;
                    continue;
                }
            }

            if token == "panel" {
                if let Some(next) = tokens.get(i + 1) {
                    candidates.push(next.to_ascii_uppercase());
                    i += 2;
                    continue;
                }
            } else if let Some(rest) = token.strip_prefix("panel") {
                if !rest.is_empty() {
                    candidates.push(rest.to_ascii_uppercase());
                }
            } else if token.chars().all(|c| c.is_ascii_alphabetic()) {
                candidates.push(token.to_ascii_uppercase());
            } else if token.chars().all(|c| c.is_ascii_digit()) && path.is_segment(token) {
                candidates.push(token.to_string());
            }
            i += 1;
        }

        if let Some(context) = &self.figure {
            if !figures.is_empty() && !figures.contains(context) {
                return BTreeSet::new();
            }
        }

        candidates
            .into_iter()
            .filter(|c| labels.contains(c))
            .collect()
    }
}

/// Label key used for matching: cleaned, trailing digits on letters removed
pub fn normalize_label(label: &str) -> String {
    let cleaned = clean_label(label);
    match LETTER_WITH_DIGITS.captures(&cleaned) {
        Some(caps) => caps.name("letters").map_or(cleaned.clone(), |m| m.as_str().to_string()),
        None => cleaned,
    }
}

/// Letters glued to a figure number (`fig1bc`, `fig2ii`)
///
/// The run is one label, or a short run of single-letter labels. Anything
/// else (`fig2blot`) is a word, not panels, and yields nothing.
fn glued_panels(run: &str, labels: &[String]) -> Vec<String> {
    if run.is_empty() {
        return Vec::new();
    }
    let whole = run.to_ascii_uppercase();
    if labels.contains(&whole) {
        return vec![whole];
    }
    if run.len() > MAX_GLUED_PANELS {
        return Vec::new();
    }
    let letters: Vec<String> = whole.chars().map(|c| c.to_string()).collect();
    if letters.iter().all(|l| labels.contains(l)) {
        letters
    } else {
        Vec::new()
    }
}

fn normalize_labels<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let key = normalize_label(label.as_ref());
        if !key.is_empty() && !out.contains(&key) {
            out.push(key);
        }
    }
    out
}

fn figure_ref(ev: bool, number: Option<&str>) -> Option<FigureRef> {
    Some(FigureRef {
        ev,
        number: number?.parse().ok()?,
    })
}

fn parse_figure_label(label: &str) -> Option<FigureRef> {
    let canonical = crate::segmentation::canonical_figure_label(label)?;
    let rest = canonical.strip_prefix("Figure ")?;
    match rest.strip_prefix("EV") {
        Some(n) => figure_ref(true, Some(n)),
        None => figure_ref(false, Some(rest)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Panel;

    fn paths(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_directory_per_panel() {
        let assignment = SourceDataAssigner::new().assign(
            &paths(&["A", "B"]),
            &paths(&["Fig1/A/data.csv", "Fig1/B/data.csv", "Fig1/readme.txt"]),
        );
        assert_eq!(assignment.files_for("A"), ["Fig1/A/data.csv"]);
        assert_eq!(assignment.files_for("B"), ["Fig1/B/data.csv"]);
        assert_eq!(assignment.unassigned, vec!["Fig1/readme.txt"]);
    }

    #[test]
    fn test_two_labels_go_unassigned() {
        let assignment = SourceDataAssigner::new().assign(
            &paths(&["A", "B"]),
            &paths(&["Fig1/A_and_B_quantification.xlsx", "Fig1AB.csv"]),
        );
        assert!(assignment.assigned.is_empty());
        assert_eq!(assignment.unassigned.len(), 2);
        assert_eq!(assignment.ambiguous.len(), 2);
    }

    #[test]
    fn test_figure_panel_tokens_respect_context() {
        let assigner = SourceDataAssigner::with_figure_context("Figure 2");
        let assignment = assigner.assign(
            &paths(&["A", "B"]),
            &paths(&["Fig2A.xlsx", "Figure 2 B.tif", "Fig3A.xlsx", "Fig3/A/raw.csv"]),
        );
        assert_eq!(assignment.files_for("A"), ["Fig2A.xlsx"]);
        assert_eq!(assignment.files_for("B"), ["Figure 2 B.tif"]);
        assert_eq!(assignment.unassigned, vec!["Fig3A.xlsx", "Fig3/A/raw.csv"]);
    }

    #[test]
    fn test_word_after_figure_number_is_not_panels() {
        let assigner = SourceDataAssigner::with_figure_context("Figure 2");
        let assignment = assigner.assign(
            &paths(&["A", "B", "C"]),
            &paths(&["Fig2blot.tif", "Figure2cells.xlsx", "Fig2bc.csv", "Fig2c.csv"]),
        );
        assert_eq!(assignment.files_for("C"), ["Fig2c.csv"]);
        assert!(assignment.files_for("B").is_empty());
        assert_eq!(assignment.ambiguous, vec!["Fig2bc.csv"]);
        assert_eq!(
            assignment.unassigned,
            vec!["Fig2blot.tif", "Figure2cells.xlsx", "Fig2bc.csv"]
        );
    }

    #[test]
    fn test_glued_roman_label() {
        let assignment = SourceDataAssigner::with_figure_context("Figure 1")
            .assign(&paths(&["I", "II", "III"]), &paths(&["Fig1ii_counts.csv"]));
        assert_eq!(assignment.files_for("II"), ["Fig1ii_counts.csv"]);
    }

    #[test]
    fn test_panel_keyword() {
        let assignment = SourceDataAssigner::new().assign(
            &paths(&["1", "2"]),
            &paths(&["source/panel_2.csv", "source/data_1.csv", "source/1/blot.tif"]),
        );
        assert_eq!(assignment.files_for("2"), ["source/panel_2.csv"]);
        assert_eq!(assignment.files_for("1"), ["source/1/blot.tif"]);
        assert_eq!(assignment.unassigned, vec!["source/data_1.csv"]);
    }

    #[test]
    fn test_junk_ignored_and_duplicates_collapsed() {
        let assignment = SourceDataAssigner::new().assign(
            &paths(&["A"]),
            &paths(&["__MACOSX/A/._x.csv", "A/x.csv", "A\\x.csv", ".DS_Store"]),
        );
        assert_eq!(assignment.files_for("A"), ["A/x.csv"]);
        assert_eq!(assignment.ignored.len(), 2);
    }

    #[test]
    fn test_idempotent() {
        let labels = paths(&["A", "B", "C"]);
        let files = paths(&["Fig1/A/x.csv", "Fig1/BC.csv", "panelC/y.csv", "misc.txt"]);
        let assigner = SourceDataAssigner::with_figure_context("Figure 1");
        assert_eq!(assigner.assign(&labels, &files), assigner.assign(&labels, &files));
    }

    #[test]
    fn test_label_digits_stripped() {
        assert_eq!(normalize_label("(a1)"), "A");
        assert_eq!(normalize_label("12"), "12");
        let assignment = SourceDataAssigner::new().assign(&paths(&["A1", "A2"]), &paths(&["A/x.csv"]));
        assert_eq!(assignment.files_for("A"), ["A/x.csv"]);
    }

    #[test]
    fn test_assign_figure_populates_panels() {
        let mut figure = Figure::new("Figure 1");
        figure.panels = vec![Panel::stub("A", ""), Panel::stub("B", "")];
        let assignment = SourceDataAssigner::with_figure_context("Figure 1")
            .assign_figure(&mut figure, &["Fig1/A/data.csv", "Fig1/notes.txt"]);

        assert_eq!(figure.panels[0].sd_files, vec!["Fig1/A/data.csv"]);
        assert!(figure.panels[1].sd_files.is_empty());
        assert_eq!(figure.unassigned_sd_files, vec!["Fig1/notes.txt"]);
        assert_eq!(figure.sd_files.len(), 2);
        assert_eq!(assignment.unassigned.len(), 1);
    }
}
