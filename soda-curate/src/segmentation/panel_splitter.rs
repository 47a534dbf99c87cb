//! Figure caption → panel caption fragments
//!
//! **Marker grammar:**
//! - Parenthesized: `(A)`, `(a)`, `(ii)`, `(3)`
//! - Bold: `<b>A</b>`, `<strong>B.</strong>`, `<b>(C)</b>`
//! - Grouped: `(A, B)`, `(C and D)`, `(E–G)`; ranges expand to every label
//!
//! Captions also mention panels in passing ("as in (A)"). Only markers that
//! advance the label sequence are kept: per alphabet, the longest chain of
//! markers with strictly increasing ordinals wins, weighted by how many labels
//! each marker introduces.
//!
//! Each kept marker opens a fragment that runs to the next kept marker. The
//! text before the first marker is the preamble (title and shared methods).

use crate::labels::{clean_label, LabelAlphabet, PanelLabelSequencer, SequenceReport};
use crate::models::Panel;
use once_cell::sync::Lazy;
use regex::Regex;

static PAREN_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\((?P<body>[A-Za-z0-9][A-Za-z0-9 ,&\-–—]{0,24})\)").expect("Invalid parenthesized marker regex")
});

static BOLD_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(?:b|strong)\b[^>]*>\s*(?P<body>[^<]{1,24}?)\s*</(?:b|strong)>")
        .expect("Invalid bold marker regex")
});

static GROUP_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*(?:,|&|\band\b)\s*").expect("Invalid group separator regex")
});

static RANGE_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\S+?)\s*(?:-|–|—|\bto\b)\s*(\S+)\s*$").expect("Invalid range regex"));

/// Alphabets tried when choosing markers, in tie-break order
const ALPHABETS: [LabelAlphabet; 3] = [LabelAlphabet::Letters, LabelAlphabet::Roman, LabelAlphabet::Numeric];

/// Upper bound on labels one range marker may expand to
const MAX_RANGE: usize = 26;

/// A panel marker found in caption text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelMarker {
    /// Byte offset of the marker in the caption
    pub start: usize,
    pub end: usize,
    /// Cleaned labels the marker introduces, in order
    pub labels: Vec<String>,
}

/// Result of splitting one figure caption
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelSplit {
    /// Caption text before the first panel marker
    pub preamble: String,
    /// Panels in label order, gaps filled
    pub panels: Vec<Panel>,
    /// Caption fragments in document order, one per kept marker
    pub fragments: Vec<String>,
    pub alphabet: Option<LabelAlphabet>,
    pub report: SequenceReport,
}

impl PanelSplit {
    /// Preamble followed by every fragment
    pub fn reassemble(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(self.fragments.len() + 1);
        if !self.preamble.is_empty() {
            parts.push(&self.preamble);
        }
        parts.extend(self.fragments.iter().map(String::as_str));
        parts.join(" ")
    }

    pub fn labels(&self) -> Vec<String> {
        self.panels.iter().map(|p| p.panel_label.clone()).collect()
    }
}

/// Extract per-panel caption fragments from a figure caption
///
/// Gaps in the label sequence are closed with empty panels. A caption with no
/// markers yields no panels: the figure is not subdivided.
pub fn extract_panels(figure_caption: &str) -> PanelSplit {
    let candidates = find_markers(figure_caption);
    let Some((alphabet, chain)) = choose_chain(&candidates) else {
        return PanelSplit {
            preamble: figure_caption.trim().to_string(),
            ..Default::default()
        };
    };

    let markers: Vec<&PanelMarker> = chain.iter().map(|&i| &candidates[i]).collect();
    let preamble = figure_caption[..markers[0].start].trim().to_string();

    let mut fragments = Vec::with_capacity(markers.len());
    let mut stubs = Vec::new();
    for (k, marker) in markers.iter().enumerate() {
        let end = markers.get(k + 1).map_or(figure_caption.len(), |next| next.start);
        let fragment = figure_caption[marker.start..end].trim().to_string();
        for label in &marker.labels {
            stubs.push(Panel::stub(label.clone(), fragment.clone()));
        }
        fragments.push(fragment);
    }

    let (panels, report) = PanelLabelSequencer::new().fill_gaps(stubs);
    tracing::debug!(
        alphabet = %alphabet,
        markers = markers.len(),
        panels = panels.len(),
        missing = report.missing.len(),
        "Split figure caption into panels"
    );

    PanelSplit {
        preamble,
        panels,
        fragments,
        alphabet: Some(alphabet),
        report,
    }
}

/// Every parenthesized or bold marker, in document order, overlaps removed
pub fn find_markers(caption: &str) -> Vec<PanelMarker> {
    let mut markers: Vec<PanelMarker> = Vec::new();

    for caps in BOLD_MARKER.captures_iter(caption) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.name("body")) else {
            continue;
        };
        let body = body.as_str().trim_end_matches(['.', ':', ')']).trim_start_matches('(');
        if let Some(labels) = parse_marker_body(body) {
            markers.push(PanelMarker {
                start: whole.start(),
                end: whole.end(),
                labels,
            });
        }
    }

    for caps in PAREN_MARKER.captures_iter(caption) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.name("body")) else {
            continue;
        };
        if let Some(labels) = parse_marker_body(body.as_str()) {
            markers.push(PanelMarker {
                start: whole.start(),
                end: whole.end(),
                labels,
            });
        }
    }

    // Earliest start wins; a bold tag wrapping a parenthesized marker covers it
    markers.sort_by_key(|m| (m.start, std::cmp::Reverse(m.end)));
    let mut kept: Vec<PanelMarker> = Vec::with_capacity(markers.len());
    for marker in markers {
        if kept.last().map_or(true, |last| marker.start >= last.end) {
            kept.push(marker);
        }
    }
    kept
}

/// Labels named by a marker body (`A`, `A, B`, `A-C`, `ii and iii`)
fn parse_marker_body(body: &str) -> Option<Vec<String>> {
    let mut labels = Vec::new();
    for part in GROUP_SEPARATOR.split(body.trim()) {
        if part.is_empty() {
            return None;
        }
        match RANGE_SEPARATOR.captures(part) {
            Some(caps) => {
                let from = label_token(caps.get(1)?.as_str())?;
                let to = label_token(caps.get(2)?.as_str())?;
                labels.extend(expand_range(&from, &to)?);
            }
            None => labels.push(label_token(part)?),
        }
    }
    if labels.is_empty() {
        None
    } else {
        Some(labels)
    }
}

/// A single label token: one letter, a Roman numeral or a 1-2 digit number
pub(crate) fn label_token(raw: &str) -> Option<String> {
    let token = raw.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    let cleaned = clean_label(token);
    let single_letter = cleaned.len() == 1 && cleaned.chars().all(|c| c.is_ascii_alphabetic());
    let numeric = cleaned.len() <= 2 && cleaned.chars().all(|c| c.is_ascii_digit()) && cleaned != "0";
    let roman = cleaned.len() <= 6 && LabelAlphabet::Roman.contains(&cleaned);
    if single_letter || numeric || roman {
        Some(cleaned)
    } else {
        None
    }
}

fn expand_range(from: &str, to: &str) -> Option<Vec<String>> {
    let alphabet = PanelLabelSequencer::detect_alphabet(&[from.to_string(), to.to_string()])?;
    let start = alphabet.ordinal(from)?;
    let end = alphabet.ordinal(to)?;
    if end <= start || end - start >= MAX_RANGE {
        return None;
    }
    (start..=end).map(|n| alphabet.symbol(n)).collect()
}

/// Ordinal span of a marker within an alphabet
fn marker_span(marker: &PanelMarker, alphabet: LabelAlphabet) -> Option<(usize, usize)> {
    if alphabet == LabelAlphabet::Letters && marker.labels.iter().any(|l| l.len() != 1) {
        return None;
    }
    let ordinals: Option<Vec<usize>> = marker.labels.iter().map(|l| alphabet.ordinal(l)).collect();
    let ordinals = ordinals?;
    let first = *ordinals.first()?;
    let last = *ordinals.last()?;
    if ordinals.windows(2).all(|w| w[1] > w[0]) {
        Some((first, last))
    } else {
        None
    }
}

/// Longest increasing marker chain across alphabets
///
/// Chain weight is the number of labels covered. Ties keep the earlier
/// alphabet in [`ALPHABETS`] and, within an alphabet, the earlier markers.
fn choose_chain(markers: &[PanelMarker]) -> Option<(LabelAlphabet, Vec<usize>)> {
    let mut best: Option<(LabelAlphabet, Vec<usize>, usize)> = None;

    for alphabet in ALPHABETS {
        let spans: Vec<Option<(usize, usize)>> = markers.iter().map(|m| marker_span(m, alphabet)).collect();

        // weight[i]: best chain weight ending at marker i; prev[i]: predecessor
        let mut weight = vec![0usize; markers.len()];
        let mut prev: Vec<Option<usize>> = vec![None; markers.len()];
        for i in 0..markers.len() {
            let Some((first_i, _)) = spans[i] else { continue };
            weight[i] = markers[i].labels.len();
            for j in 0..i {
                let Some((_, last_j)) = spans[j] else { continue };
                let candidate = weight[j] + markers[i].labels.len();
                if last_j < first_i && candidate > weight[i] {
                    weight[i] = candidate;
                    prev[i] = Some(j);
                }
            }
        }

        let mut end: Option<usize> = None;
        for i in 0..markers.len() {
            if weight[i] > end.map_or(0, |e| weight[e]) {
                end = Some(i);
            }
        }
        let Some(end) = end else { continue };

        let total = weight[end];
        if best.as_ref().map_or(true, |(_, _, w)| total > *w) {
            let mut chain = vec![end];
            let mut cursor = end;
            while let Some(p) = prev[cursor] {
                chain.push(p);
                cursor = p;
            }
            chain.reverse();
            best = Some((alphabet, chain, total));
        }
    }

    best.map(|(alphabet, chain, _)| (alphabet, chain))
}
