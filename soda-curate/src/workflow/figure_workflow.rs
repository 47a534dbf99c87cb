//! Per-figure pipeline
//!
//! Stages run strictly in order, each consuming the previous one's output:
//! Segmentation → Detection → Reconciliation → Assignment.
//!
//! Failure handling:
//! - detector errors (model failure, corrupt image) keep label-only panels
//! - non-finite detector geometry fails the figure; no regions are emitted
//! - everything else degrades the record with a warning and continues

use crate::assignment::SourceDataAssigner;
use crate::config::DetectionConfig;
use crate::detection::{postprocess_detections, PanelDetectorAdapter};
use crate::error::CurationError;
use crate::events::{emit_with, EventSink};
use crate::labels::{LabelAlphabet, MAX_PANEL_ORDINAL};
use crate::models::{Detection, Figure, FigureStatus, Panel, ProcessingCost, ProcessingStep};
use crate::reconcile::PanelReconciler;
use crate::segmentation::{first_sentence, is_caption_missing, split_figure_blocks, CaptionSegmenter};
use crate::types::MatchContext;
use image::DynamicImage;
use soda_common::events::CurationStage;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Label used when a caption does not name its figure
pub const DEFAULT_FIGURE_LABEL: &str = "Figure 1";

/// Everything needed to process one figure
#[derive(Debug, Clone)]
pub struct FigureInput {
    /// Stub from legend segmentation (label, title, caption)
    pub figure: Figure,
    pub image: Option<DynamicImage>,
    /// Detections computed ahead of time; used instead of the detector
    pub detections: Option<Vec<Detection>>,
    /// Panels the caller expects; 0 when unknown
    pub expected_label_count: usize,
    /// Source-data paths routed to this figure
    pub sd_files: Vec<String>,
}

impl FigureInput {
    pub fn new(figure: Figure) -> Self {
        Self {
            figure,
            image: None,
            detections: None,
            expected_label_count: 0,
            sd_files: Vec::new(),
        }
    }

    /// Figure stub from a single caption
    ///
    /// A leading `Figure N` label names the figure and is cut from the
    /// caption, as legend segmentation does.
    pub fn from_caption(caption_text: &str) -> Self {
        let figure = match split_figure_blocks(caption_text).into_iter().next() {
            Some(block) => {
                let mut figure = Figure::new(block.figure_label);
                figure.caption_title = block.caption_title;
                figure.figure_caption = block.figure_caption;
                figure
            }
            None => {
                let mut figure = Figure::new(DEFAULT_FIGURE_LABEL);
                figure.caption_title = first_sentence(caption_text);
                figure.figure_caption = caption_text.trim().to_string();
                figure
            }
        };
        Self::new(figure)
    }

    pub fn with_image(mut self, image: DynamicImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = Some(detections);
        self
    }

    pub fn with_expected_label_count(mut self, count: usize) -> Self {
        self.expected_label_count = count;
        self
    }

    pub fn with_sd_files(mut self, sd_files: Vec<String>) -> Self {
        self.sd_files = sd_files;
        self
    }
}

/// Processed figure plus bookkeeping for the manuscript record
#[derive(Debug, Clone)]
pub struct FigureOutcome {
    pub figure: Figure,
    pub cost: ProcessingCost,
    /// Raw AI responses keyed `<step>/<figure label>`
    pub ai_responses: BTreeMap<String, String>,
}

/// Runs one figure through all stages
#[derive(Clone)]
pub struct FigureWorkflow {
    segmenter: CaptionSegmenter,
    detector: Option<PanelDetectorAdapter>,
    detection: DetectionConfig,
    reconciler: PanelReconciler,
    events: Option<EventSink>,
}

impl FigureWorkflow {
    pub fn new(segmenter: CaptionSegmenter, reconciler: PanelReconciler) -> Self {
        Self {
            segmenter,
            detector: None,
            detection: DetectionConfig::default(),
            reconciler,
            events: None,
        }
    }

    pub fn with_detector(mut self, detector: PanelDetectorAdapter) -> Self {
        self.detection = detector.params().clone();
        self.detector = Some(detector);
        self
    }

    /// Thresholds for precomputed detections when no detector is set
    pub fn with_detection_params(mut self, params: DetectionConfig) -> Self {
        self.detection = params;
        self
    }

    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.segmenter = self.segmenter.with_events(sink.clone());
        self.events = Some(sink);
        self
    }

    pub fn segmenter(&self) -> &CaptionSegmenter {
        &self.segmenter
    }

    /// Reconcile one figure image with its caption
    pub async fn process_figure(
        &self,
        image: &DynamicImage,
        caption_text: &str,
        expected_label_count: usize,
    ) -> Figure {
        let input = FigureInput::from_caption(caption_text)
            .with_image(image.clone())
            .with_expected_label_count(expected_label_count);
        self.process(input).await.figure
    }

    /// Run every stage on a figure
    pub async fn process(&self, input: FigureInput) -> FigureOutcome {
        let FigureInput {
            mut figure,
            image,
            detections,
            expected_label_count,
            sd_files,
        } = input;
        let label = figure.figure_label.clone();
        let mut cost = ProcessingCost::default();
        let mut ai_responses = BTreeMap::new();

        // Segmentation
        if is_caption_missing(&figure) {
            debug!(figure_label = %label, "No caption to split");
        }
        let extraction = self.segmenter.extract_panels(&label, &figure.figure_caption).await;
        cost.record(ProcessingStep::ExtractIndividualCaptions, &extraction.usage);
        let alphabet = extraction.report.alphabet.unwrap_or(LabelAlphabet::Letters);
        if let Some(raw) = &extraction.ai_response {
            ai_responses.insert(format!("{}/{}", ProcessingStep::ExtractIndividualCaptions.as_str(), label), raw.clone());
        }
        extraction.apply_to(&mut figure);
        pad_to_expected(&mut figure, alphabet, expected_label_count);
        self.stage_done(&figure, CurationStage::Segmentation);

        // Detection
        let detections = match detections {
            Some(precomputed) => self.postprocess(&mut figure, precomputed),
            None => self.detect(&mut figure, image.as_ref()).await,
        };
        self.stage_done(&figure, CurationStage::Detection);

        // Reconciliation
        if figure.status != FigureStatus::Failed {
            self.reconcile(&mut figure, detections.unwrap_or_default(), image.as_ref(), &mut cost, &mut ai_responses)
                .await;
        }
        self.stage_done(&figure, CurationStage::Reconciliation);

        // Assignment
        if !sd_files.is_empty() {
            let assignment = SourceDataAssigner::with_figure_context(&label).assign_figure(&mut figure, &sd_files);
            if !assignment.ambiguous.is_empty() {
                figure.add_warning(format!(
                    "{} source file(s) match several panels and were left unassigned",
                    assignment.ambiguous.len()
                ));
            }
        }
        self.stage_done(&figure, CurationStage::Assignment);

        info!(
            figure_label = %label,
            panels = figure.panels.len(),
            status = ?figure.status,
            warnings = figure.errors.len(),
            "Figure processed"
        );
        cost.update_total();
        FigureOutcome {
            figure,
            cost,
            ai_responses,
        }
    }

    /// `None` when there is nothing to detect or detection failed
    async fn detect(&self, figure: &mut Figure, image: Option<&DynamicImage>) -> Option<Vec<Detection>> {
        let (Some(detector), Some(image)) = (&self.detector, image) else {
            debug!(figure_label = %figure.figure_label, "Detection skipped: no detector or no image");
            return None;
        };
        match detector.detect(image).await {
            Ok(detections) => Some(detections),
            Err(e) => {
                self.detection_failed(figure, e);
                None
            }
        }
    }

    fn postprocess(&self, figure: &mut Figure, precomputed: Vec<Detection>) -> Option<Vec<Detection>> {
        match postprocess_detections(precomputed, &self.detection) {
            Ok(detections) => Some(detections),
            Err(e) => {
                self.detection_failed(figure, e);
                None
            }
        }
    }

    fn detection_failed(&self, figure: &mut Figure, e: CurationError) {
        if e.is_fatal_to_figure() {
            warn!(figure_label = %figure.figure_label, error = %e, "Detector geometry invalid, figure failed");
            figure.mark_failed(format!("panel detection returned invalid geometry: {}", e));
        } else {
            warn!(figure_label = %figure.figure_label, error = %e, "Panel detection failed, keeping label-only panels");
            figure.add_warning(format!("panel detection failed: {}; panels have no regions", e));
        }
    }

    async fn reconcile(
        &self,
        figure: &mut Figure,
        detections: Vec<Detection>,
        image: Option<&DynamicImage>,
        cost: &mut ProcessingCost,
        ai_responses: &mut BTreeMap<String, String>,
    ) {
        let expected_labels = figure.panel_labels();
        let context = MatchContext {
            figure_label: &figure.figure_label,
            figure_caption: &figure.figure_caption,
            expected_labels: &expected_labels,
            image,
        };

        let result = self.reconciler.reconcile(&figure.panels, &detections, &context).await;
        match result {
            Ok(reconciliation) => {
                cost.record(ProcessingStep::MatchCaptionPanel, &reconciliation.usage);
                let report = reconciliation.report;
                let responses: Vec<String> = reconciliation
                    .panels
                    .iter()
                    .filter_map(|p| p.ai_response.as_ref().map(|r| format!("{}: {}", p.panel_label, r)))
                    .collect();
                if !responses.is_empty() {
                    ai_responses.insert(
                        format!("{}/{}", ProcessingStep::MatchCaptionPanel.as_str(), figure.figure_label),
                        responses.join("\n"),
                    );
                }
                figure.panels = reconciliation.panels;

                if let Some(reason) = report.fallback_reason {
                    figure.add_warning(format!("panel matching fell back to reading order: {}", reason));
                }
                if !report.minted.is_empty() {
                    figure.add_warning(format!(
                        "detected panel(s) {} not described in caption",
                        report.minted.join(", ")
                    ));
                }
                debug!(
                    figure_label = %figure.figure_label,
                    matched = report.matched.len(),
                    minted = report.minted.len(),
                    deficit = report.deficit.len(),
                    demoted = report.demoted,
                    "Reconciled panels"
                );
            }
            Err(CurationError::InvalidGeometry(msg)) => {
                warn!(figure_label = %figure.figure_label, error = %msg, "Invalid detection geometry, figure failed");
                figure.mark_failed(format!("invalid detection geometry: {}", msg));
            }
            Err(e) => {
                warn!(figure_label = %figure.figure_label, error = %e, "Reconciliation failed, keeping caption panels");
                figure.add_warning(format!("panel reconciliation failed: {}", e));
            }
        }
    }

    fn stage_done(&self, figure: &Figure, stage: CurationStage) {
        emit_with(self.events.as_ref(), |sink| {
            sink.stage_completed(&figure.figure_label, stage, figure.errors.len())
        });
    }
}

/// Append placeholders when the caption names fewer panels than expected
fn pad_to_expected(figure: &mut Figure, alphabet: LabelAlphabet, expected_label_count: usize) {
    if expected_label_count > MAX_PANEL_ORDINAL {
        warn!(
            figure_label = %figure.figure_label,
            expected = expected_label_count,
            limit = MAX_PANEL_ORDINAL,
            "Expected panel count capped"
        );
        figure.add_warning(format!(
            "expected panel count {} exceeds the limit of {}; capped",
            expected_label_count, MAX_PANEL_ORDINAL
        ));
    }
    let expected_label_count = expected_label_count.min(MAX_PANEL_ORDINAL);
    let found = figure.panels.len();
    if expected_label_count <= 1 || found >= expected_label_count {
        return;
    }
    for ordinal in found + 1..=expected_label_count {
        if let Some(label) = alphabet.symbol(ordinal) {
            figure.required_labels.push(label.clone());
            figure.panels.push(Panel::gap_fill(label));
        }
    }
    figure.add_warning(format!(
        "caption describes {} of {} expected panels; placeholders inserted",
        found, expected_label_count
    ));
}
