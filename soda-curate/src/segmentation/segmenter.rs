//! Caption segmenter
//!
//! Per-figure state machine:
//! PENDING → LABEL_EXTRACTED → SEQUENCE_VALIDATED → VERIFIED → DONE,
//! with FAILED_FINAL reachable from any non-terminal stage.
//!
//! With a completion service configured, caption location and panel splitting
//! are AI-assisted and gated by the verbatim verifier: each step gets up to
//! `retry.max_attempts` attempts, and on exhaustion the best candidate is kept
//! with `is_verbatim = false`. When every attempt errors the AI path ends in
//! FAILED_FINAL and the marker-based split supplies the panels. Without a
//! service the marker-based split is used directly.

use crate::config::{CompletionConfig, RetryConfig};
use crate::error::{CurationError, CurationResult};
use crate::events::{emit_with, EventSink};
use crate::labels::{clean_label, PanelLabelSequencer, SequenceReport};
use crate::models::{Figure, Panel, TokenUsage};
use crate::prompts::{
    locate_captions_prompt, split_panels_prompt, LOCATE_CAPTIONS_SYSTEM, SPLIT_PANELS_SYSTEM,
};
use crate::segmentation::figure_splitter::{
    canonical_figure_label, expected_figure_labels, first_sentence, split_figure_blocks,
    CAPTION_NOT_FOUND,
};
use crate::segmentation::panel_splitter;
use crate::segmentation::response::{
    parse_json_response, CaptionLocationResponse, LocatedCaption, PanelSplitResponse,
};
use crate::types::{CompletionRequest, CompletionResponse, CompletionService};
use crate::utils::retry::{bounded_retry_ranked, retry_transient, with_timeout};
use crate::verification::VerbatimVerifier;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Scope used in retry events for the legends-wide caption location step
const LEGENDS_SCOPE: &str = "legends";

// ============================================================================
// State machine
// ============================================================================

/// Segmentation stage of one figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentationStage {
    Pending,
    /// Panel labels and caption fragments extracted
    LabelExtracted,
    /// Label sequence checked and gaps filled
    SequenceValidated,
    /// Panel captions checked against the figure caption
    Verified,
    Done,
    /// AI-assisted extraction exhausted its attempts without a candidate
    FailedFinal,
}

impl SegmentationStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SegmentationStage::Done | SegmentationStage::FailedFinal)
    }

    pub fn can_transition_to(&self, next: SegmentationStage) -> bool {
        use SegmentationStage::*;
        match (self, next) {
            (_, FailedFinal) => !self.is_terminal(),
            (Pending, LabelExtracted)
            | (LabelExtracted, SequenceValidated)
            | (SequenceValidated, Verified)
            | (Verified, Done) => true,
            _ => false,
        }
    }
}

/// Stage change record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub old_stage: SegmentationStage,
    pub new_stage: SegmentationStage,
}

/// Segmentation progress of one figure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationState {
    pub figure_label: String,
    stage: SegmentationStage,
    history: Vec<StageTransition>,
}

impl SegmentationState {
    pub fn new(figure_label: impl Into<String>) -> Self {
        Self {
            figure_label: figure_label.into(),
            stage: SegmentationStage::Pending,
            history: Vec::new(),
        }
    }

    pub fn stage(&self) -> SegmentationStage {
        self.stage
    }

    pub fn history(&self) -> &[StageTransition] {
        &self.history
    }

    /// Move to the next stage; out-of-order transitions are rejected
    pub fn transition_to(&mut self, new_stage: SegmentationStage) -> CurationResult<StageTransition> {
        if !self.stage.can_transition_to(new_stage) {
            return Err(CurationError::InvalidInput(format!(
                "{}: invalid segmentation transition {:?} → {:?}",
                self.figure_label, self.stage, new_stage
            )));
        }
        let transition = StageTransition {
            old_stage: self.stage,
            new_stage,
        };
        self.stage = new_stage;
        self.history.push(transition);
        Ok(transition)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Figure stubs produced from the legends text
#[derive(Debug, Clone, Default)]
pub struct LegendSegmentation {
    pub figures: Vec<Figure>,
    pub attempts_used: u32,
    pub usage: TokenUsage,
    pub ai_response: Option<String>,
}

/// Panels produced from one figure caption
#[derive(Debug, Clone)]
pub struct PanelExtraction {
    pub panels: Vec<Panel>,
    pub report: SequenceReport,
    pub state: SegmentationState,
    /// Every panel caption occurs verbatim in the figure caption
    pub is_verbatim: bool,
    pub attempts_used: u32,
    pub usage: TokenUsage,
    pub ai_response: Option<String>,
    pub warnings: Vec<String>,
}

impl PanelExtraction {
    /// Labels the completed sequence requires
    pub fn required_labels(&self) -> Vec<String> {
        self.panels.iter().map(|p| p.panel_label.clone()).collect()
    }

    /// Move panels, flags and warnings into the figure
    pub fn apply_to(self, figure: &mut Figure) {
        figure.required_labels = self.required_labels();
        figure.panels = self.panels;
        figure.is_verbatim &= self.is_verbatim;
        for warning in self.warnings {
            figure.add_warning(warning);
        }
    }
}

struct SplitCandidate {
    panels: Vec<Panel>,
    raw: String,
}

impl SplitCandidate {
    fn verbatim_fraction(&self) -> f64 {
        if self.panels.is_empty() {
            return 1.0;
        }
        let verbatim = self.panels.iter().filter(|p| p.is_verbatim).count();
        verbatim as f64 / self.panels.len() as f64
    }
}

struct LocateCandidate {
    figures: Vec<LocatedCaption>,
    verbatim: Vec<bool>,
    raw: String,
}

impl LocateCandidate {
    fn verbatim_fraction(&self) -> f64 {
        if self.verbatim.is_empty() {
            return 0.0;
        }
        self.verbatim.iter().filter(|v| **v).count() as f64 / self.verbatim.len() as f64
    }
}

// ============================================================================
// Segmenter
// ============================================================================

/// Splits legends into figures and captions into panels
#[derive(Clone)]
pub struct CaptionSegmenter {
    completion: Option<Arc<dyn CompletionService>>,
    completion_config: CompletionConfig,
    retry: RetryConfig,
    verifier: VerbatimVerifier,
    sequencer: PanelLabelSequencer,
    events: Option<EventSink>,
}

impl CaptionSegmenter {
    /// Marker-based segmenter (no completion service)
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            completion: None,
            completion_config: CompletionConfig::default(),
            retry,
            verifier: VerbatimVerifier::new(),
            sequencer: PanelLabelSequencer::new(),
            events: None,
        }
    }

    /// Use a completion service for caption location and panel splitting
    pub fn with_completion(mut self, service: Arc<dyn CompletionService>, config: CompletionConfig) -> Self {
        self.completion = Some(service);
        self.completion_config = config;
        self
    }

    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn is_ai_assisted(&self) -> bool {
        self.completion.is_some()
    }

    // ------------------------------------------------------------------------
    // Legends → figures
    // ------------------------------------------------------------------------

    /// Split legends into exactly one figure stub per expected figure
    ///
    /// Missing figures carry [`CAPTION_NOT_FOUND`] and a warning.
    pub async fn segment(
        &self,
        legends: &str,
        expected_figure_count: usize,
        expected_labels: &[String],
    ) -> LegendSegmentation {
        let expected = expected_figure_labels(expected_figure_count, expected_labels);

        let Some(service) = self.completion.as_deref() else {
            let mut figures =
                crate::segmentation::figure_splitter::segment(legends, expected.len(), &expected);
            self.score_hallucination(&mut figures, legends);
            return LegendSegmentation {
                figures,
                attempts_used: 0,
                ..Default::default()
            };
        };

        let usage = Mutex::new(TokenUsage::default());
        let this = self;
        let expected_ref = &expected;
        let usage_ref = &usage;
        let max_attempts = self.retry.max_attempts;
        let outcome = bounded_retry_ranked(
            "locate_captions",
            max_attempts,
            move |attempt| async move {
                if attempt > 1 {
                    emit_with(this.events.as_ref(), |s| {
                        s.retry_attempted(LEGENDS_SCOPE, "locate_captions", attempt, max_attempts)
                    });
                }
                this.locate_attempt(service, legends, expected_ref, usage_ref).await
            },
            |candidate: &LocateCandidate| candidate.verbatim_fraction() >= 1.0,
            |candidate: &LocateCandidate| candidate.verbatim_fraction(),
        )
        .await;
        let usage = usage.into_inner().unwrap_or_default();

        let blocks = split_figure_blocks(legends);
        let mut figures = Vec::with_capacity(expected.len());
        let ai_response = match &outcome.result {
            Some(candidate) => {
                for label in &expected {
                    let located = candidate
                        .figures
                        .iter()
                        .zip(&candidate.verbatim)
                        .find(|(f, _)| canonical_figure_label(&f.figure_label).as_deref() == Some(label.as_str()));
                    let mut figure = Figure::new(label.clone());
                    match located {
                        Some((found, verbatim)) => {
                            figure.figure_caption = found.figure_caption.trim().to_string();
                            figure.caption_title = if found.caption_title.trim().is_empty() {
                                first_sentence(&figure.figure_caption)
                            } else {
                                found.caption_title.trim().to_string()
                            };
                            figure.is_verbatim = *verbatim;
                            if !*verbatim {
                                figure.add_warning(format!(
                                    "{} caption is not verbatim after {} attempts",
                                    label, outcome.attempts_used
                                ));
                            }
                        }
                        None => fill_from_blocks(&mut figure, &blocks),
                    }
                    figures.push(figure);
                }
                Some(candidate.raw.clone())
            }
            None => {
                let reason = outcome
                    .last_error
                    .as_ref()
                    .map_or_else(|| "no candidate".to_string(), |e| e.to_string());
                warn!(
                    attempts = outcome.attempts_used,
                    error = %reason,
                    "Caption location failed, using label-based split"
                );
                for label in &expected {
                    let mut figure = Figure::new(label.clone());
                    fill_from_blocks(&mut figure, &blocks);
                    figure.add_warning(format!("AI caption location failed: {}", reason));
                    figures.push(figure);
                }
                None
            }
        };

        self.score_hallucination(&mut figures, legends);
        info!(
            figures = figures.len(),
            attempts = outcome.attempts_used,
            verbatim = outcome.succeeded,
            "Located figure captions"
        );
        LegendSegmentation {
            figures,
            attempts_used: outcome.attempts_used,
            usage,
            ai_response,
        }
    }

    async fn locate_attempt(
        &self,
        service: &dyn CompletionService,
        legends: &str,
        expected: &[String],
        usage: &Mutex<TokenUsage>,
    ) -> CurationResult<LocateCandidate> {
        let request = CompletionRequest::new(
            &self.completion_config,
            LOCATE_CAPTIONS_SYSTEM,
            locate_captions_prompt(legends, expected),
        )
        .expecting_json();
        let response = self.call(service, &request, "locate_captions").await?;
        record_usage(usage, &response.usage);

        let parsed: CaptionLocationResponse = parse_json_response(&response.text)?;
        let verbatim = parsed
            .figures
            .iter()
            .map(|f| self.verifier.verify(&f.figure_caption, legends).is_verbatim)
            .collect();
        Ok(LocateCandidate {
            figures: parsed.figures,
            verbatim,
            raw: response.text,
        })
    }

    fn score_hallucination(&self, figures: &mut [Figure], legends: &str) {
        for figure in figures.iter_mut() {
            if figure.figure_caption != CAPTION_NOT_FOUND {
                figure.hallucination_score = self.verifier.hallucination_score(&figure.figure_caption, legends);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Figure caption → panels
    // ------------------------------------------------------------------------

    /// Split one figure caption into panel stubs with a gap-free label sequence
    pub async fn extract_panels(&self, figure_label: &str, figure_caption: &str) -> PanelExtraction {
        let mut state = SegmentationState::new(figure_label);
        let mut warnings = Vec::new();

        if figure_caption.trim().is_empty() || figure_caption == CAPTION_NOT_FOUND {
            // Nothing to split: the figure is treated as undivided
            let report = SequenceReport::default();
            advance(&mut state, &[
                SegmentationStage::LabelExtracted,
                SegmentationStage::SequenceValidated,
                SegmentationStage::Verified,
                SegmentationStage::Done,
            ]);
            return PanelExtraction {
                panels: Vec::new(),
                report,
                state,
                is_verbatim: true,
                attempts_used: 0,
                usage: TokenUsage::default(),
                ai_response: None,
                warnings,
            };
        }

        let mut attempts_used = 0;
        let mut usage = TokenUsage::default();
        let mut ai_response = None;
        let mut is_verbatim = true;

        let (panels, report) = match self.completion.as_deref() {
            Some(service) => {
                let tally = Mutex::new(TokenUsage::default());
                let outcome = self.split_with_retry(service, figure_label, figure_caption, &tally).await;
                usage = tally.into_inner().unwrap_or_default();
                attempts_used = outcome.attempts_used;

                match outcome.result {
                    Some(candidate) => {
                        advance(&mut state, &[SegmentationStage::LabelExtracted]);
                        if !outcome.succeeded {
                            is_verbatim = false;
                            warnings.push(format!(
                                "{}: panel captions are not verbatim after {} attempts",
                                figure_label, outcome.attempts_used
                            ));
                        }
                        ai_response = Some(candidate.raw);
                        let (panels, report) = self.sequencer.fill_gaps(candidate.panels);
                        advance(&mut state, &[SegmentationStage::SequenceValidated]);
                        (panels, report)
                    }
                    None => {
                        let reason = outcome
                            .last_error
                            .as_ref()
                            .map_or_else(|| "no candidate".to_string(), |e| e.to_string());
                        let _ = state.transition_to(SegmentationStage::FailedFinal);
                        warnings.push(format!(
                            "{}: AI panel split failed after {} attempts ({}); used caption markers",
                            figure_label, outcome.attempts_used, reason
                        ));
                        let split = panel_splitter::extract_panels(figure_caption);
                        (split.panels, split.report)
                    }
                }
            }
            None => {
                let split = panel_splitter::extract_panels(figure_caption);
                advance(&mut state, &[
                    SegmentationStage::LabelExtracted,
                    SegmentationStage::SequenceValidated,
                ]);
                (split.panels, split.report)
            }
        };

        for missing in &report.missing {
            warnings.push(format!(
                "{}: panel {} not described in caption; placeholder inserted at position {}",
                figure_label, missing.label, missing.position
            ));
        }

        let mut panels = panels;
        for panel in panels.iter_mut() {
            if panel.panel_caption.trim().is_empty() {
                continue;
            }
            let outcome = self.verifier.verify(&panel.panel_caption, figure_caption);
            if !outcome.is_verbatim {
                panel.is_verbatim = false;
                is_verbatim = false;
                if let Some(diagnostic) = outcome.diagnostic {
                    debug!(
                        figure_label,
                        panel_label = %panel.panel_label,
                        similarity = diagnostic.similarity,
                        "Panel caption not verbatim"
                    );
                }
            }
        }
        advance(&mut state, &[SegmentationStage::Verified, SegmentationStage::Done]);

        debug!(
            figure_label,
            panels = panels.len(),
            stage = ?state.stage(),
            attempts = attempts_used,
            "Extracted panel captions"
        );
        PanelExtraction {
            panels,
            report,
            state,
            is_verbatim,
            attempts_used,
            usage,
            ai_response,
            warnings,
        }
    }

    async fn split_with_retry(
        &self,
        service: &dyn CompletionService,
        figure_label: &str,
        figure_caption: &str,
        usage: &Mutex<TokenUsage>,
    ) -> crate::utils::retry::RetryOutcome<SplitCandidate> {
        let this = self;
        let max_attempts = self.retry.max_attempts;
        bounded_retry_ranked(
            "split_panels",
            max_attempts,
            move |attempt| async move {
                if attempt > 1 {
                    emit_with(this.events.as_ref(), |s| {
                        s.retry_attempted(figure_label, "split_panels", attempt, max_attempts)
                    });
                }
                this.split_attempt(service, figure_label, figure_caption, usage).await
            },
            |candidate: &SplitCandidate| candidate.verbatim_fraction() >= 1.0,
            |candidate: &SplitCandidate| candidate.verbatim_fraction(),
        )
        .await
    }

    async fn split_attempt(
        &self,
        service: &dyn CompletionService,
        figure_label: &str,
        figure_caption: &str,
        usage: &Mutex<TokenUsage>,
    ) -> CurationResult<SplitCandidate> {
        let request = CompletionRequest::new(
            &self.completion_config,
            SPLIT_PANELS_SYSTEM,
            split_panels_prompt(figure_label, figure_caption),
        )
        .expecting_json();
        let response = self.call(service, &request, "split_panels").await?;
        record_usage(usage, &response.usage);

        let parsed: PanelSplitResponse = parse_json_response(&response.text)?;
        let panels = parsed
            .panels
            .into_iter()
            .map(|entry| {
                let mut panel = Panel::stub(clean_label(&entry.panel_label), entry.panel_caption.trim());
                panel.is_verbatim = panel.panel_caption.is_empty()
                    || self.verifier.verify(&panel.panel_caption, figure_caption).is_verbatim;
                panel
            })
            .collect();
        Ok(SplitCandidate {
            panels,
            raw: response.text,
        })
    }

    /// One completion call: transient backoff inside the attempt's time budget
    async fn call(
        &self,
        service: &dyn CompletionService,
        request: &CompletionRequest,
        operation: &str,
    ) -> CurationResult<CompletionResponse> {
        with_timeout(
            self.retry.completion_timeout(),
            retry_transient(operation, self.retry.transient_max_wait_ms, || service.complete(request)),
        )
        .await
    }
}

fn fill_from_blocks(figure: &mut Figure, blocks: &[crate::segmentation::figure_splitter::FigureBlock]) {
    match blocks.iter().find(|b| b.figure_label == figure.figure_label) {
        Some(block) => {
            figure.caption_title = block.caption_title.clone();
            figure.figure_caption = block.figure_caption.clone();
        }
        None => {
            figure.figure_caption = CAPTION_NOT_FOUND.to_string();
            figure.is_verbatim = false;
            let message = format!("{} caption not found in the legends", figure.figure_label);
            figure.add_warning(message);
        }
    }
}

fn record_usage(tally: &Mutex<TokenUsage>, usage: &TokenUsage) {
    if let Ok(mut total) = tally.lock() {
        total.add(usage);
    }
}

/// Walk the state machine through forward stages, ignoring refused moves
fn advance(state: &mut SegmentationState, stages: &[SegmentationStage]) {
    for stage in stages {
        if let Err(e) = state.transition_to(*stage) {
            debug!(error = %e, "Segmentation stage not advanced");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PanelOrigin;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        replies: Vec<CurationResult<String>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(replies: Vec<CurationResult<String>>) -> Self {
            Self {
                replies,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl CompletionService for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> CurationResult<CompletionResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let reply = self.replies.get(n.min(self.replies.len() - 1)).ok_or_else(|| {
                CurationError::Completion("no scripted reply".into())
            })?;
            match reply {
                Ok(text) => Ok(CompletionResponse {
                    text: text.clone(),
                    model: request.model.clone(),
                    usage: TokenUsage::for_call(&request.model, 100, 20),
                }),
                Err(e) => Err(CurationError::Completion(e.to_string())),
            }
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            completion_timeout_ms: 1_000,
            transient_max_wait_ms: 10,
        }
    }

    const CAPTION: &str = "Title. (A) Blot of X. (B) Counts of Y.";

    #[test]
    fn test_stage_order_enforced() {
        let mut state = SegmentationState::new("Figure 1");
        assert!(state.transition_to(SegmentationStage::Verified).is_err());
        state.transition_to(SegmentationStage::LabelExtracted).unwrap();
        state.transition_to(SegmentationStage::FailedFinal).unwrap();
        assert!(state.transition_to(SegmentationStage::SequenceValidated).is_err());
        assert_eq!(state.history().len(), 2);
    }

    #[tokio::test]
    async fn test_marker_split_reaches_done() {
        let segmenter = CaptionSegmenter::new(fast_retry());
        let extraction = segmenter.extract_panels("Figure 1", CAPTION).await;
        assert_eq!(extraction.state.stage(), SegmentationStage::Done);
        assert_eq!(extraction.required_labels(), vec!["A", "B"]);
        assert!(extraction.is_verbatim);
        assert_eq!(extraction.attempts_used, 0);
    }

    #[tokio::test]
    async fn test_ai_split_accepted_first_try() {
        let reply = r#"{"panels": [{"panel_label": "A", "panel_caption": "(A) Blot of X."}, {"panel_label": "B", "panel_caption": "(B) Counts of Y."}]}"#;
        let service = Arc::new(Scripted::new(vec![Ok(reply.to_string())]));
        let segmenter = CaptionSegmenter::new(fast_retry())
            .with_completion(service.clone(), CompletionConfig::default());

        let extraction = segmenter.extract_panels("Figure 1", CAPTION).await;
        assert_eq!(extraction.attempts_used, 1);
        assert!(extraction.is_verbatim);
        assert_eq!(extraction.usage.prompt_tokens, 100);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert!(extraction.ai_response.is_some());
    }

    #[tokio::test]
    async fn test_paraphrase_retried_then_degraded() {
        let paraphrase = r#"{"panels": [{"panel_label": "A", "panel_caption": "A blot showing protein X levels."}]}"#;
        let service = Arc::new(Scripted::new(vec![Ok(paraphrase.to_string())]));
        let segmenter = CaptionSegmenter::new(fast_retry())
            .with_completion(service.clone(), CompletionConfig::default());

        let extraction = segmenter.extract_panels("Figure 1", CAPTION).await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 5);
        assert_eq!(extraction.attempts_used, 5);
        assert!(!extraction.is_verbatim);
        assert!(!extraction.panels[0].is_verbatim);
        assert_eq!(extraction.state.stage(), SegmentationStage::Done);
        assert_eq!(extraction.usage.prompt_tokens, 500);
    }

    #[tokio::test]
    async fn test_malformed_replies_fall_back_to_markers() {
        let service = Arc::new(Scripted::new(vec![Ok("not json".to_string())]));
        let segmenter = CaptionSegmenter::new(fast_retry())
            .with_completion(service, CompletionConfig::default());

        let extraction = segmenter.extract_panels("Figure 1", CAPTION).await;
        assert_eq!(extraction.state.stage(), SegmentationStage::FailedFinal);
        assert_eq!(extraction.required_labels(), vec!["A", "B"]);
        assert!(extraction.warnings.iter().any(|w| w.contains("AI panel split failed")));
    }

    #[tokio::test]
    async fn test_ai_gap_filled() {
        let reply = r#"{"panels": [{"panel_label": "(a)", "panel_caption": "(A) Blot of X."}, {"panel_label": "C", "panel_caption": ""}]}"#;
        let service = Arc::new(Scripted::new(vec![Ok(reply.to_string())]));
        let segmenter = CaptionSegmenter::new(fast_retry())
            .with_completion(service, CompletionConfig::default());

        let extraction = segmenter.extract_panels("Figure 1", CAPTION).await;
        assert_eq!(extraction.required_labels(), vec!["A", "B", "C"]);
        assert_eq!(extraction.panels[1].origin, PanelOrigin::GapFill);
        assert_eq!(extraction.panels[2].panel_caption, "");
        assert!(extraction.warnings.iter().any(|w| w.contains("panel B")));
    }

    #[tokio::test]
    async fn test_empty_caption_has_no_panels() {
        let segmenter = CaptionSegmenter::new(fast_retry());
        let extraction = segmenter.extract_panels("Figure 1", "").await;
        assert!(extraction.panels.is_empty());
        assert!(extraction.warnings.is_empty());
        assert_eq!(extraction.state.stage(), SegmentationStage::Done);
    }

    #[tokio::test]
    async fn test_ai_segment_falls_back_for_missing_figure() {
        let legends = "Figure 1. First figure.\nFigure 2. Second figure.";
        let reply = r#"{"figures": [{"figure_label": "Figure 1", "figure_caption": "First figure."}]}"#;
        let service = Arc::new(Scripted::new(vec![Ok(reply.to_string())]));
        let segmenter = CaptionSegmenter::new(fast_retry())
            .with_completion(service, CompletionConfig::default());

        let result = segmenter.segment(legends, 2, &[]).await;
        assert_eq!(result.figures.len(), 2);
        assert_eq!(result.figures[0].figure_caption, "First figure.");
        assert_eq!(result.figures[0].caption_title, "First figure.");
        assert_eq!(result.figures[1].figure_caption, "Second figure.");
        assert_eq!(result.attempts_used, 1);
    }

    #[tokio::test]
    async fn test_deterministic_segment_scores_hallucination() {
        let segmenter = CaptionSegmenter::new(fast_retry());
        let result = segmenter.segment("Figure 1. Cells.", 1, &[]).await;
        assert_eq!(result.figures[0].hallucination_score, 0.0);
        assert!(result.usage.is_empty());
    }
}
