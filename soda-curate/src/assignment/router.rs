//! Manuscript-level routing of source-data files to figures
//!
//! A path naming `Figure EV2` goes to figure `Figure EV2`, a path naming
//! `Fig3`/`Figure_3` goes to `Figure 3`. `Table EVn`, `Dataset EVn` and files
//! naming no known figure are non-associated.

use crate::utils::paths::{is_junk_path, normalize_path};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

static EV_MATERIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?P<kind>figure|fig|table|dataset)\s*[_\-.]?\s*ev\s*[_\-.]?\s*(?P<num>\d+)")
        .expect("Invalid EV material regex")
});

static FIGURE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z])fig(?:ure)?s?\s*[_\-.]?\s*(?P<num>\d+)").expect("Invalid figure reference regex")
});

/// Source-data paths grouped per figure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRouting {
    pub by_figure: BTreeMap<String, Vec<String>>,
    pub non_associated: Vec<String>,
}

impl SourceRouting {
    pub fn files_for(&self, figure_label: &str) -> &[String] {
        self.by_figure.get(figure_label).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Figure a path refers to, if any
///
/// EV references take precedence; `Table EV1` and `Dataset EV1` never
/// resolve to a figure.
pub fn referenced_figure(path: &str) -> Option<String> {
    if let Some(caps) = EV_MATERIAL.captures(path) {
        let kind = caps.name("kind").map_or("", |m| m.as_str()).to_ascii_lowercase();
        let num: u32 = caps.name("num")?.as_str().parse().ok()?;
        return match kind.as_str() {
            "figure" | "fig" => Some(format!("Figure EV{}", num)),
            _ => None,
        };
    }
    let caps = FIGURE_REF.captures(path)?;
    let num: u32 = caps.name("num")?.as_str().parse().ok()?;
    Some(format!("Figure {}", num))
}

/// Route every path to its figure or to the non-associated bucket
///
/// Paths are normalized and deduplicated; junk files are dropped. A path
/// naming a figure that is not in `figure_labels` is non-associated.
pub fn route_source_files<S: AsRef<str>>(figure_labels: &[S], paths: &[S]) -> SourceRouting {
    let known: HashSet<&str> = figure_labels.iter().map(|l| l.as_ref()).collect();
    let mut routing = SourceRouting::default();
    let mut seen = HashSet::new();

    for raw in paths {
        let path = normalize_path(raw.as_ref());
        if path.is_empty() || is_junk_path(&path) || !seen.insert(path.clone()) {
            continue;
        }
        match referenced_figure(&path) {
            Some(figure) if known.contains(figure.as_str()) => {
                debug!(path = %path, figure_label = %figure, "Routed source file");
                routing.by_figure.entry(figure).or_default().push(path);
            }
            _ => routing.non_associated.push(path),
        }
    }

    info!(
        figures = routing.by_figure.len(),
        routed = routing.by_figure.values().map(Vec::len).sum::<usize>(),
        non_associated = routing.non_associated.len(),
        "Routed source data"
    );
    routing
}
