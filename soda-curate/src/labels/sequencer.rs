//! Panel label sequence validation and gap filling
//!
//! **Algorithm:**
//! 1. Clean every label (brackets, dots, whitespace stripped; uppercased)
//! 2. Pick the alphabet from the labels (see `detect_alphabet`)
//! 3. Build the complete sequence from the alphabet's first symbol up to the
//!    highest observed label
//! 4. Report every label of that sequence that was not observed, with its
//!    1-based position in the completed sequence
//!
//! Labels are never removed. Zero- and one-label figures are trivially
//! complete: a lone panel is not a subdivided figure.

use crate::labels::alphabet::{clean_label, is_roman, LabelAlphabet};
use crate::models::Panel;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A label absent from the observed sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingLabel {
    pub label: String,
    /// 1-based position in the completed sequence
    pub position: usize,
}

/// Result of analyzing one figure's labels
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SequenceReport {
    pub alphabet: Option<LabelAlphabet>,
    /// Cleaned labels in the order given
    pub observed: Vec<String>,
    /// Complete sequence from the first symbol to the maximum observed
    pub expected: Vec<String>,
    pub missing: Vec<MissingLabel>,
    /// Labels outside the detected alphabet
    pub unrecognized: Vec<String>,
    /// Labels observed more than once
    pub duplicates: Vec<String>,
    /// Observed labels did not strictly increase
    pub out_of_order: bool,
}

impl SequenceReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn missing_labels(&self) -> Vec<String> {
        self.missing.iter().map(|m| m.label.clone()).collect()
    }
}

/// Positions a label sequence may skip beyond the number of observed labels
pub const GAP_SLACK: usize = 8;

/// Highest panel ordinal a figure may reach
pub const MAX_PANEL_ORDINAL: usize = 104;

/// Panel label sequencer
#[derive(Debug, Clone, Copy, Default)]
pub struct PanelLabelSequencer;

impl PanelLabelSequencer {
    pub fn new() -> Self {
        Self
    }

    /// Decide the alphabet of a cleaned label list
    ///
    /// Deterministic tie-break for labels valid in more than one alphabet
    /// (`I`, `V`, `X`, `C`, `D`, `L`, `M`):
    /// - Roman, if every label is a well-formed numeral and at least one has
    ///   more than one character (`II`, `IV`, `XI`)
    /// - otherwise letters
    ///
    /// So `[I]`, `[C, D]` and `[I, J]` are letters; `[I, II]` and `[IV]` are Roman.
    pub fn detect_alphabet(labels: &[String]) -> Option<LabelAlphabet> {
        let first = labels.first()?;

        if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
            return Some(LabelAlphabet::Numeric);
        }

        if is_roman(first) {
            let all_roman = labels.iter().all(|l| is_roman(l));
            let multi_char = labels.iter().any(|l| l.chars().count() > 1 && is_roman(l));
            if all_roman && multi_char {
                return Some(LabelAlphabet::Roman);
            }
        }

        if LabelAlphabet::Letters.contains(first) {
            Some(LabelAlphabet::Letters)
        } else {
            None
        }
    }

    /// Analyze an ordered list of raw labels
    pub fn analyze<S: AsRef<str>>(&self, labels: &[S]) -> SequenceReport {
        let observed: Vec<String> = labels
            .iter()
            .map(|l| clean_label(l.as_ref()))
            .filter(|l| !l.is_empty())
            .collect();

        let alphabet = Self::detect_alphabet(&observed);
        let mut report = SequenceReport {
            alphabet,
            observed: observed.clone(),
            ..Default::default()
        };

        let mut seen = HashSet::new();
        for label in &observed {
            if !seen.insert(label.clone()) && !report.duplicates.contains(label) {
                report.duplicates.push(label.clone());
            }
        }

        let Some(alphabet) = alphabet else {
            report.unrecognized = observed.clone();
            report.expected = observed;
            return report;
        };

        // Labels far past the observed count are not a sequence to complete
        let limit = if observed.len() <= 1 {
            usize::MAX
        } else {
            (observed.len() + GAP_SLACK).min(MAX_PANEL_ORDINAL)
        };
        let mut ordinals = Vec::with_capacity(observed.len());
        for label in &observed {
            match alphabet.ordinal(label) {
                Some(n) if n <= limit => ordinals.push(n),
                _ => report.unrecognized.push(label.clone()),
            }
        }
        report.out_of_order = ordinals.windows(2).any(|w| w[1] < w[0]);

        // Trivially complete
        if observed.len() <= 1 {
            report.expected = observed;
            return report;
        }

        let max = ordinals.iter().copied().max().unwrap_or(0);
        let present: HashSet<usize> = ordinals.iter().copied().collect();
        report.expected = alphabet.sequence(max);
        report.missing = report
            .expected
            .iter()
            .enumerate()
            .filter(|(i, _)| !present.contains(&(i + 1)))
            .map(|(i, label)| MissingLabel {
                label: label.clone(),
                position: i + 1,
            })
            .collect();

        if !report.missing.is_empty() {
            tracing::debug!(
                alphabet = %alphabet,
                missing = ?report.missing_labels(),
                "Panel label sequence has gaps"
            );
        }
        report
    }

    /// Canonicalize labels, merge repeats and insert empty panels for gaps
    ///
    /// Returns panels sorted by the alphabet's order (unrecognized labels
    /// last, in their original order) together with the analysis.
    pub fn fill_gaps(&self, panels: Vec<Panel>) -> (Vec<Panel>, SequenceReport) {
        let report = self.analyze(
            &panels.iter().map(|p| p.panel_label.as_str()).collect::<Vec<_>>(),
        );

        let mut merged: Vec<Panel> = Vec::with_capacity(panels.len());
        for mut panel in panels {
            panel.panel_label = clean_label(&panel.panel_label);
            if panel.panel_label.is_empty() {
                continue;
            }
            match merged.iter_mut().find(|p| p.panel_label == panel.panel_label) {
                Some(existing) => {
                    let extra = panel.panel_caption.trim();
                    if !extra.is_empty() && !existing.panel_caption.contains(extra) {
                        if !existing.panel_caption.is_empty() {
                            existing.panel_caption.push(' ');
                        }
                        existing.panel_caption.push_str(extra);
                    }
                    existing.is_verbatim &= panel.is_verbatim;
                }
                None => merged.push(panel),
            }
        }

        for missing in &report.missing {
            merged.push(Panel::gap_fill(missing.label.clone()));
        }

        if let Some(alphabet) = report.alphabet {
            sort_by_alphabet(&mut merged, alphabet);
        }
        (merged, report)
    }
}

/// Stable sort by alphabet ordinal; labels outside the alphabet go last
pub fn sort_by_alphabet(panels: &mut [Panel], alphabet: LabelAlphabet) {
    panels.sort_by_key(|p| alphabet.ordinal(&p.panel_label).unwrap_or(usize::MAX));
}
