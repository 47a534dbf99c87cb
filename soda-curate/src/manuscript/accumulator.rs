//! Manuscript structure accumulator
//!
//! Collects processed figures, data sources, raw AI responses and token
//! usage, then produces the final `ManuscriptStructure`.
//!
//! **Finalization per figure:**
//! - drop panels with no caption, region or files unless the label sequence
//!   requires them (gap fills stay) or they stand for the whole figure
//! - normalize and deduplicate every path
//! - figure-level files held by no panel move to `unassigned_sd_files`
//! - failed figures lose their regions
//! - `duplicated_panels` is recomputed as a report; panels are untouched

use crate::config::ReconcileConfig;
use crate::models::{
    DataSource, DuplicateReason, DuplicatedPanel, Figure, FigureStatus, ManuscriptStructure, Panel,
    PanelOrigin, ProcessingCost, ProcessingStep, TokenUsage,
};
use crate::utils::paths::normalize_path;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Builder for one manuscript's structured record
#[derive(Debug, Clone)]
pub struct ManuscriptAccumulator {
    record: ManuscriptStructure,
    config: ReconcileConfig,
}

impl ManuscriptAccumulator {
    pub fn new(manuscript_id: impl Into<String>, config: ReconcileConfig) -> Self {
        Self {
            record: ManuscriptStructure {
                manuscript_id: manuscript_id.into(),
                ..Default::default()
            },
            config,
        }
    }

    pub fn manuscript_id(&self) -> &str {
        &self.record.manuscript_id
    }

    pub fn figures(&self) -> &[Figure] {
        &self.record.figures
    }

    /// Add a processed figure; a figure with the same label is replaced
    pub fn add_figure(&mut self, figure: Figure) {
        match self
            .record
            .figures
            .iter_mut()
            .find(|f| f.figure_label == figure.figure_label)
        {
            Some(existing) => {
                warn!(figure_label = %figure.figure_label, "Figure added twice, keeping the latest");
                *existing = figure;
            }
            None => self.record.figures.push(figure),
        }
    }

    pub fn add_data_sources(&mut self, sources: impl IntoIterator<Item = DataSource>) {
        self.record.data_availability.extend(sources);
    }

    pub fn add_non_associated<S: AsRef<str>>(&mut self, paths: &[S]) {
        self.record
            .non_associated_sd_files
            .extend(paths.iter().map(|p| p.as_ref().to_string()));
    }

    pub fn set_document_paths(&mut self, xml: &str, docx: &str, pdf: &str) {
        self.record.xml = normalize_path(xml);
        self.record.docx = normalize_path(docx);
        self.record.pdf = normalize_path(pdf);
    }

    /// Keep a raw AI response for audit; repeated keys are appended
    pub fn record_response(&mut self, key: impl Into<String>, response: impl AsRef<str>) {
        let entry = self.record.ai_responses.entry(key.into()).or_default();
        if !entry.is_empty() {
            entry.push_str("\n\n");
        }
        entry.push_str(response.as_ref());
    }

    pub fn record_usage(&mut self, step: ProcessingStep, usage: &TokenUsage) {
        if !usage.is_empty() {
            self.record.cost.record(step, usage);
        }
    }

    /// Fold a figure's cost sheet into the manuscript's
    pub fn merge_cost(&mut self, cost: &ProcessingCost) {
        self.record.cost.merge(cost);
    }

    /// Manuscript-level error not tied to a figure
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.record.errors.push(message.into());
    }

    /// Produce the final record
    pub fn finalize(mut self) -> ManuscriptStructure {
        let mut figure_errors = Vec::new();
        for figure in self.record.figures.iter_mut() {
            finalize_figure(figure, self.config.duplicate_iou_threshold);
            figure_errors.extend(
                figure
                    .errors
                    .iter()
                    .map(|e| {
                        if e.starts_with(&figure.figure_label) {
                            e.clone()
                        } else {
                            format!("{}: {}", figure.figure_label, e)
                        }
                    }),
            );
        }
        self.record.errors.extend(figure_errors);
        self.record.non_associated_sd_files = normalize_all(&self.record.non_associated_sd_files);
        self.record.appendix = normalize_all(&self.record.appendix);
        self.record.cost.update_total();

        info!(
            manuscript_id = %self.record.manuscript_id,
            figures = self.record.figures.len(),
            failed = self.record.failed_figures().count(),
            errors = self.record.errors.len(),
            total_tokens = self.record.cost.total.total_tokens,
            "Manuscript record finalized"
        );
        self.record
    }
}

fn finalize_figure(figure: &mut Figure, duplicate_iou_threshold: f64) {
    let required: HashSet<&str> = figure.required_labels.iter().map(String::as_str).collect();
    let before = figure.panels.len();
    figure.panels.retain(|panel| {
        !panel.is_empty()
            || required.contains(panel.panel_label.as_str())
            || panel.origin == PanelOrigin::WholeFigure
    });
    if figure.panels.len() < before {
        debug!(
            figure_label = %figure.figure_label,
            dropped = before - figure.panels.len(),
            "Dropped empty panels"
        );
    }

    if figure.status == FigureStatus::Failed {
        for panel in figure.panels.iter_mut() {
            panel.panel_bbox = None;
            panel.confidence = None;
        }
    }

    let mut held = HashSet::new();
    for panel in figure.panels.iter_mut() {
        panel.sd_files = normalize_all(&panel.sd_files);
        held.extend(panel.sd_files.iter().cloned());
    }
    figure.img_files = normalize_all(&figure.img_files);
    figure.sd_files = normalize_all(&figure.sd_files);

    let mut unassigned = figure.unassigned_sd_files.clone();
    unassigned.extend(figure.sd_files.iter().filter(|p| !held.contains(*p)).cloned());
    figure.unassigned_sd_files = normalize_all(&unassigned)
        .into_iter()
        .filter(|p| !held.contains(p))
        .collect();

    figure.duplicated_panels = find_duplicated_panels(&figure.panels, duplicate_iou_threshold);
}

/// Normalize paths, dropping empties and repeats; first occurrence wins
fn normalize_all(paths: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    paths
        .iter()
        .map(|p| normalize_path(p))
        .filter(|p| !p.is_empty() && seen.insert(p.clone()))
        .collect()
}

/// Panels duplicating an earlier one by label or by region
///
/// A panel is reported at most once, against the first panel it duplicates.
pub fn find_duplicated_panels(panels: &[Panel], iou_threshold: f64) -> Vec<DuplicatedPanel> {
    let mut duplicates = Vec::new();
    for (i, panel) in panels.iter().enumerate() {
        for earlier in &panels[..i] {
            if earlier.panel_label == panel.panel_label {
                duplicates.push(DuplicatedPanel {
                    panel_label: panel.panel_label.clone(),
                    duplicate_of: earlier.panel_label.clone(),
                    reason: DuplicateReason::RepeatedLabel,
                });
                break;
            }
            if let (Some(a), Some(b)) = (&earlier.panel_bbox, &panel.panel_bbox) {
                let iou = a.iou(b);
                if iou >= iou_threshold {
                    duplicates.push(DuplicatedPanel {
                        panel_label: panel.panel_label.clone(),
                        duplicate_of: earlier.panel_label.clone(),
                        reason: DuplicateReason::OverlappingRegion { iou },
                    });
                    break;
                }
            }
        }
    }
    duplicates
}
