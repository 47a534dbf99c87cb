//! Vision match scorer
//!
//! The completion service is scripted; cropping, acceptance, degradation and
//! usage accounting run for real.

mod helpers;

use base64::Engine as _;
use helpers::{blank_image, detection, fast_retry, strings, ScriptedCompletionService};
use soda_curate::config::{CompletionConfig, ReconcileConfig};
use soda_curate::error::CurationError;
use soda_curate::models::{Detection, Panel};
use soda_curate::reconcile::{PanelReconciler, VisionMatchScorer};
use soda_curate::types::{MatchContext, PanelMatchScorer};
use std::sync::Arc;

fn scripted(replies: &[&str]) -> Arc<ScriptedCompletionService> {
    Arc::new(ScriptedCompletionService::new(
        replies.iter().map(|r| Ok(r.to_string())).collect(),
    ))
}

fn scorer(service: &Arc<ScriptedCompletionService>) -> VisionMatchScorer {
    VisionMatchScorer::new(service.clone(), CompletionConfig::default(), fast_retry())
}

fn two_halves() -> Vec<Detection> {
    vec![detection(0.0, 0.0, 0.5, 1.0, 0.9), detection(0.5, 0.0, 1.0, 1.0, 0.8)]
}

#[tokio::test]
async fn test_each_detection_is_cropped_and_labeled() {
    // Given: a 200x100 figure split into two halves; the model reads B then A
    let service = scripted(&["PANEL_B: (B) Quantification.", "PANEL_A: (A) Western blot."]);
    let image = blank_image(200, 100);
    let labels = strings(&["A", "B"]);
    let context = MatchContext {
        figure_label: "Figure 1",
        figure_caption: "(A) Western blot. (B) Quantification.",
        expected_labels: &labels,
        image: Some(&image),
    };

    // When
    let scored = scorer(&service).score(&context, &two_halves()).await.unwrap();

    // Then: one accepted match per detection, scored by detector confidence
    assert_eq!(scored.matches.len(), 2);
    let left = scored.matches[0].as_ref().unwrap();
    let right = scored.matches[1].as_ref().unwrap();
    assert_eq!(left.label, "B");
    assert_eq!(left.score, 0.9);
    assert_eq!(left.caption.as_deref(), Some("(B) Quantification."));
    assert_eq!(right.label, "A");
    assert_eq!(right.score, 0.8);
    assert!(right.ai_response.as_deref().unwrap_or("").starts_with("PANEL_A"));
    assert_eq!(scored.usage.prompt_tokens, 200);

    // Each request carries the crop, not the whole figure
    let requests = service.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        let encoded = request.image_png_base64.as_deref().unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let crop = image::load_from_memory(&bytes).unwrap();
        assert_eq!((crop.width(), crop.height()), (100, 100));
    }
}

#[tokio::test]
async fn test_unexpected_label_degrades_to_zero_score() {
    let service = scripted(&["PANEL_Z: something else"]);
    let image = blank_image(200, 100);
    let labels = strings(&["A", "B"]);
    let context = MatchContext {
        figure_label: "Figure 1",
        figure_caption: "(A) Blot. (B) Graph.",
        expected_labels: &labels,
        image: Some(&image),
    };

    let scored = scorer(&service)
        .score(&context, &[detection(0.0, 0.0, 0.5, 1.0, 0.9)])
        .await
        .unwrap();

    // Every attempt was spent and paid for
    assert_eq!(service.calls(), 5);
    assert_eq!(scored.usage.prompt_tokens, 500);
    assert_eq!(scored.usage.completion_tokens, 100);
    let degraded = scored.matches[0].as_ref().unwrap();
    assert_eq!(degraded.label, "Z");
    assert_eq!(degraded.score, 0.0);
}

#[tokio::test]
async fn test_unparsable_replies_leave_detection_unmatched() {
    let service = scripted(&["This panel shows a western blot."]);
    let image = blank_image(200, 100);
    let labels = strings(&["A", "B"]);
    let context = MatchContext {
        figure_label: "Figure 1",
        figure_caption: "(A) Blot. (B) Graph.",
        expected_labels: &labels,
        image: Some(&image),
    };

    let scored = scorer(&service)
        .score(&context, &[detection(0.0, 0.0, 0.5, 1.0, 0.9)])
        .await
        .unwrap();

    assert!(scored.matches[0].is_none());
    assert_eq!(service.calls(), 5);
    assert_eq!(scored.usage.prompt_tokens, 500);
}

#[tokio::test]
async fn test_missing_image_is_invalid_input() {
    let service = scripted(&["PANEL_A: x"]);
    let labels = strings(&["A", "B"]);
    let context = MatchContext {
        figure_label: "Figure 1",
        figure_caption: "",
        expected_labels: &labels,
        image: None,
    };

    let result = scorer(&service).score(&context, &two_halves()).await;

    assert!(matches!(result, Err(CurationError::InvalidInput(_))));
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn test_reconciler_uses_vision_labels_and_usage() {
    // Given: the model says the right half is A
    let service = scripted(&["PANEL_B: (B) Graph.", "PANEL_A: (A) Blot."]);
    let reconciler = PanelReconciler::new(ReconcileConfig::default()).with_scorer(Arc::new(scorer(&service)));
    let expected = vec![Panel::stub("A", "(A) Blot."), Panel::stub("B", "(B) Graph.")];
    let image = blank_image(200, 100);
    let labels = strings(&["A", "B"]);
    let context = MatchContext {
        figure_label: "Figure 1",
        figure_caption: "(A) Blot. (B) Graph.",
        expected_labels: &labels,
        image: Some(&image),
    };

    // When
    let result = reconciler.reconcile(&expected, &two_halves(), &context).await.unwrap();

    // Then: labels follow the model, not reading order
    assert_eq!(result.report.scorer, "vision");
    assert!(result.report.fallback_reason.is_none());
    assert_eq!(result.panels[0].panel_label, "A");
    assert_eq!(result.panels[0].panel_bbox.unwrap().x1, 0.5);
    assert_eq!(result.panels[1].panel_bbox.unwrap().x1, 0.0);
    assert_eq!(result.usage.prompt_tokens, 200);
}

#[tokio::test]
async fn test_reconciler_falls_back_without_image() {
    let service = scripted(&["PANEL_A: x"]);
    let reconciler = PanelReconciler::new(ReconcileConfig::default()).with_scorer(Arc::new(scorer(&service)));
    let expected = vec![Panel::stub("A", "(A) Blot."), Panel::stub("B", "(B) Graph.")];
    let labels = strings(&["A", "B"]);
    let context = MatchContext {
        figure_label: "Figure 1",
        figure_caption: "(A) Blot. (B) Graph.",
        expected_labels: &labels,
        image: None,
    };

    let result = reconciler.reconcile(&expected, &two_halves(), &context).await.unwrap();

    assert_eq!(result.report.scorer, "positional");
    assert!(result.report.fallback_reason.unwrap().contains("image"));
    assert_eq!(result.panels[0].panel_bbox.unwrap().x1, 0.0);
    assert!(result.usage.is_empty());
}
