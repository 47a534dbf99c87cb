//! Manuscript orchestrator
//!
//! Splits the legends into figures, routes source data, then runs every
//! figure through [`FigureWorkflow`] with bounded concurrency.
//!
//! **Isolation:** each figure runs in its own task. A figure that errors or
//! panics is recorded as failed; its siblings are unaffected. Every expected
//! figure appears in the final record.

use crate::assignment::route_source_files;
use crate::config::CurationConfig;
use crate::events::EventSink;
use crate::manuscript::ManuscriptAccumulator;
use crate::models::{
    DataSource, Detection, Figure, FigureStatus, ManuscriptStructure, Panel, ProcessingStep,
};
use crate::reconcile::whole_figure_panel;
use crate::segmentation::{extract_panels, CAPTION_NOT_FOUND};
use crate::workflow::figure_workflow::{FigureInput, FigureOutcome, FigureWorkflow};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use soda_common::events::EventBus;
use std::collections::HashMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// One manuscript to curate
#[derive(Debug, Clone, Default)]
pub struct ManuscriptInput {
    pub manuscript_id: String,
    /// Figure legends section, HTML allowed
    pub legends: String,
    pub expected_figure_count: usize,
    pub expected_figure_labels: Vec<String>,
    /// Decoded figure images by figure label
    pub images: HashMap<String, DynamicImage>,
    /// Precomputed detections by figure label
    pub detections: HashMap<String, Vec<Detection>>,
    /// Image file paths by figure label
    pub image_paths: HashMap<String, String>,
    /// Expected panel counts by figure label
    pub expected_panel_counts: HashMap<String, usize>,
    /// Every source-data path in the archive
    pub source_files: Vec<String>,
    pub data_sources: Vec<DataSource>,
}

/// Per-figure result with error isolation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureWorkflowResult {
    pub figure_label: String,
    pub success: bool,
    pub panel_count: usize,
    pub warnings: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Outcome counts for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: Uuid,
    pub total_figures: usize,
    /// Figures not failed (complete or degraded)
    pub successes: usize,
    /// Degraded figures
    pub warnings: usize,
    pub failures: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub results: Vec<FigureWorkflowResult>,
}

/// Final record plus run summary
#[derive(Debug, Clone)]
pub struct ManuscriptRun {
    pub manuscript: ManuscriptStructure,
    pub summary: RunSummary,
}

/// Runs a whole manuscript
pub struct ManuscriptOrchestrator {
    workflow: FigureWorkflow,
    config: CurationConfig,
    event_bus: EventBus,
}

impl ManuscriptOrchestrator {
    pub fn new(workflow: FigureWorkflow, config: CurationConfig) -> Self {
        let event_bus = EventBus::new(config.workflow.event_capacity);
        Self {
            workflow,
            config,
            event_bus,
        }
    }

    /// Share an existing bus (e.g. one the caller already subscribed to)
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Curate one manuscript
    ///
    /// Figures not yet started when `cancel` fires are recorded as failed.
    pub async fn run(&self, input: ManuscriptInput, cancel: CancellationToken) -> ManuscriptRun {
        let start = Instant::now();
        let session_id = Uuid::new_v4();
        let sink = EventSink::new(self.event_bus.clone(), session_id);
        let workflow = self.workflow.clone().with_events(sink.clone());

        let ManuscriptInput {
            manuscript_id,
            legends,
            expected_figure_count,
            expected_figure_labels,
            mut images,
            mut detections,
            image_paths,
            expected_panel_counts,
            source_files,
            data_sources,
        } = input;

        info!(
            session_id = %session_id,
            manuscript_id = %manuscript_id,
            expected_figures = expected_figure_count.max(expected_figure_labels.len()),
            ai_assisted = workflow.segmenter().is_ai_assisted(),
            "Starting manuscript curation"
        );

        let mut accumulator = ManuscriptAccumulator::new(manuscript_id.clone(), self.config.reconcile.clone());
        accumulator.add_data_sources(data_sources);

        // Legends → figure stubs
        let legend_segmentation = workflow
            .segmenter()
            .segment(&legends, expected_figure_count, &expected_figure_labels)
            .await;
        accumulator.record_usage(ProcessingStep::ExtractIndividualCaptions, &legend_segmentation.usage);
        if let Some(raw) = &legend_segmentation.ai_response {
            accumulator.record_response(ProcessingStep::ExtractIndividualCaptions.as_str(), raw);
        }

        // Source data → figures
        let figure_labels: Vec<String> = legend_segmentation
            .figures
            .iter()
            .map(|f| f.figure_label.clone())
            .collect();
        let routing = route_source_files(&figure_labels, &source_files);
        accumulator.add_non_associated(&routing.non_associated);

        let inputs: Vec<FigureInput> = legend_segmentation
            .figures
            .into_iter()
            .map(|mut figure| {
                let label = figure.figure_label.clone();
                if let Some(path) = image_paths.get(&label) {
                    figure.img_files.push(path.clone());
                }
                let mut input = FigureInput::new(figure)
                    .with_expected_label_count(expected_panel_counts.get(&label).copied().unwrap_or(0))
                    .with_sd_files(routing.files_for(&label).to_vec());
                input.image = images.remove(&label);
                input.detections = detections.remove(&label);
                input
            })
            .collect();
        let total_figures = inputs.len();

        // Figures, bounded concurrency
        let max_workers = self.config.workflow.max_concurrent_figures.max(1);
        let mut outcomes: Vec<(usize, FigureWorkflowResult, FigureOutcome)> = stream::iter(inputs.into_iter().enumerate())
            .map(|(index, input)| {
                let workflow = workflow.clone();
                let sink = sink.clone();
                let cancel = cancel.clone();
                async move {
                    let (result, outcome) = run_isolated(workflow, sink, input, cancel).await;
                    (index, result, outcome)
                }
            })
            .buffer_unordered(max_workers)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut summary = RunSummary {
            session_id,
            total_figures,
            cancelled: cancel.is_cancelled(),
            ..Default::default()
        };
        for (_, result, outcome) in outcomes {
            if !result.success {
                summary.failures += 1;
            } else if outcome.figure.status == FigureStatus::Degraded {
                summary.successes += 1;
                summary.warnings += 1;
            } else {
                summary.successes += 1;
            }
            accumulator.merge_cost(&outcome.cost);
            for (key, response) in &outcome.ai_responses {
                accumulator.record_response(key.clone(), response);
            }
            accumulator.add_figure(outcome.figure);
            summary.results.push(result);
        }

        let manuscript = accumulator.finalize();
        summary.duration_ms = start.elapsed().as_millis() as u64;
        sink.manuscript_completed(&manuscript_id, summary.total_figures, summary.failures, summary.duration_ms);

        info!(
            session_id = %session_id,
            manuscript_id = %manuscript_id,
            total = summary.total_figures,
            successes = summary.successes,
            warnings = summary.warnings,
            failures = summary.failures,
            elapsed_ms = summary.duration_ms,
            "Manuscript curation completed"
        );

        ManuscriptRun { manuscript, summary }
    }
}

/// Process one figure in its own task; failures and panics stay local
async fn run_isolated(
    workflow: FigureWorkflow,
    sink: EventSink,
    input: FigureInput,
    cancel: CancellationToken,
) -> (FigureWorkflowResult, FigureOutcome) {
    let start = Instant::now();
    let label = input.figure.figure_label.clone();
    let stub = input.figure.clone();

    if cancel.is_cancelled() {
        warn!(figure_label = %label, "Figure skipped, run cancelled");
        return failed(stub, "processing cancelled", &sink, start);
    }

    sink.figure_started(&label);
    let handle = tokio::spawn(async move { workflow.process(input).await });

    match handle.await {
        Ok(outcome) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let figure = &outcome.figure;
            if figure.status == FigureStatus::Failed {
                let error = figure.errors.last().cloned().unwrap_or_else(|| "figure failed".to_string());
                sink.figure_failed(&label, &error);
                let result = FigureWorkflowResult {
                    figure_label: label,
                    success: false,
                    panel_count: figure.panels.len(),
                    warnings: figure.errors.len(),
                    error: Some(error),
                    duration_ms,
                };
                return (result, outcome);
            }
            sink.figure_completed(&label, figure.panels.len(), figure.errors.len(), duration_ms);
            let result = FigureWorkflowResult {
                figure_label: label,
                success: true,
                panel_count: figure.panels.len(),
                warnings: figure.errors.len(),
                error: None,
                duration_ms,
            };
            (result, outcome)
        }
        Err(join_error) => {
            let reason = if join_error.is_panic() {
                "figure processing panicked"
            } else {
                "figure processing was aborted"
            };
            error!(figure_label = %label, error = %join_error, "{}", reason);
            failed(stub, reason, &sink, start)
        }
    }
}

fn failed(mut figure: Figure, reason: &str, sink: &EventSink, start: Instant) -> (FigureWorkflowResult, FigureOutcome) {
    if figure.panels.is_empty() {
        figure.panels = caption_panels(&figure.figure_caption);
        figure.required_labels = figure.panels.iter().map(|p| p.panel_label.clone()).collect();
    }
    figure.mark_failed(reason);
    sink.figure_failed(&figure.figure_label, reason);
    let result = FigureWorkflowResult {
        figure_label: figure.figure_label.clone(),
        success: false,
        panel_count: figure.panels.len(),
        warnings: figure.errors.len(),
        error: Some(reason.to_string()),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    let outcome = FigureOutcome {
        figure,
        cost: Default::default(),
        ai_responses: Default::default(),
    };
    (result, outcome)
}

/// Label-only panels from the caption markers, or one whole-figure panel
fn caption_panels(figure_caption: &str) -> Vec<Panel> {
    let split = if figure_caption.trim().is_empty() || figure_caption == CAPTION_NOT_FOUND {
        Vec::new()
    } else {
        extract_panels(figure_caption).panels
    };
    if split.len() <= 1 {
        return vec![whole_figure_panel(split.first())];
    }
    split
        .into_iter()
        .map(|panel| Panel {
            panel_bbox: None,
            confidence: None,
            ..panel
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReconcileConfig, RetryConfig};
    use crate::reconcile::{PanelReconciler, WHOLE_FIGURE_LABEL};
    use crate::segmentation::CaptionSegmenter;
    use soda_common::events::CurationEvent;

    fn orchestrator() -> ManuscriptOrchestrator {
        let workflow = FigureWorkflow::new(
            CaptionSegmenter::new(RetryConfig::default()),
            PanelReconciler::new(ReconcileConfig::default()),
        );
        ManuscriptOrchestrator::new(workflow, CurationConfig::default())
    }

    fn input() -> ManuscriptInput {
        ManuscriptInput {
            manuscript_id: "EMBOJ-2024-001".to_string(),
            legends: "Figure 1. Cells. (A) Blot. (B) Graph.\nFigure 2. Mice. (A) Weight. (C) Survival.".to_string(),
            expected_figure_count: 3,
            source_files: vec![
                "Fig1/A/blot.tif".to_string(),
                "Fig2/C/survival.csv".to_string(),
                "Table EV1.xlsx".to_string(),
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_keeps_every_expected_figure() {
        let run = orchestrator().run(input(), CancellationToken::new()).await;
        let manuscript = run.manuscript;

        assert_eq!(manuscript.figures.len(), 3);
        assert_eq!(run.summary.total_figures, 3);
        assert_eq!(manuscript.figures[1].panel_labels(), vec!["A", "B", "C"]);
        assert!(manuscript.figures[2].errors.iter().any(|e| e.contains("not found")));
        assert_eq!(manuscript.figure("Figure 1").unwrap().panels[0].sd_files, vec!["Fig1/A/blot.tif"]);
        assert_eq!(manuscript.non_associated_sd_files, vec!["Table EV1.xlsx"]);
    }

    #[tokio::test]
    async fn test_events_emitted_per_figure() {
        let orchestrator = orchestrator();
        let mut rx = orchestrator.event_bus().subscribe();
        let run = orchestrator.run(input(), CancellationToken::new()).await;

        let mut started = 0;
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.session_id(), run.summary.session_id);
            match event {
                CurationEvent::FigureStarted { .. } => started += 1,
                CurationEvent::ManuscriptCompleted { total_figures, .. } => {
                    assert_eq!(total_figures, 3);
                    completed = true;
                }
                _ => {}
            }
        }
        assert_eq!(started, 3);
        assert!(completed);
    }

    #[tokio::test]
    async fn test_cancelled_run_records_failures() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = orchestrator().run(input(), cancel).await;
        assert!(run.summary.cancelled);
        assert_eq!(run.summary.failures, 3);
        assert!(run.manuscript.figures.iter().all(|f| f.status == FigureStatus::Failed));

        // Skipped figures still list the panels their captions name
        let figure_2 = run.manuscript.figure("Figure 2").unwrap();
        assert_eq!(figure_2.panel_labels(), vec!["A", "B", "C"]);
        assert!(figure_2.panels.iter().all(|p| p.panel_bbox.is_none()));
        let figure_3 = run.manuscript.figure("Figure 3").unwrap();
        assert_eq!(figure_3.panels.len(), 1);
        assert_eq!(figure_3.panels[0].origin, crate::models::PanelOrigin::WholeFigure);
    }

    #[test]
    fn test_caption_panels_for_undivided_caption() {
        let panels = caption_panels("Electron micrograph of mitochondria.");
        assert_eq!(panels.len(), 1);
        assert_eq!(panels[0].panel_label, WHOLE_FIGURE_LABEL);
        assert!(caption_panels(CAPTION_NOT_FOUND)[0].panel_caption.is_empty());
    }
}
