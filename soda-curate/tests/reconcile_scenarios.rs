//! Panel reconciliation scenarios
//!
//! Count mismatches between caption labels and detected regions:
//! surplus minting, deficit stubs, undivided figures and malformed geometry.

mod helpers;

use helpers::{detection, strings, three_columns};
use soda_curate::config::ReconcileConfig;
use soda_curate::error::CurationError;
use soda_curate::models::{Detection, Panel, PanelOrigin};
use soda_curate::reconcile::{PanelReconciler, Reconciliation};
use soda_curate::types::MatchContext;

fn stubs(labels: &[&str]) -> Vec<Panel> {
    labels
        .iter()
        .map(|l| Panel::stub(*l, format!("({}) caption for {}", l, l)))
        .collect()
}

async fn reconcile(expected: &[Panel], detections: &[Detection]) -> Result<Reconciliation, CurationError> {
    let labels: Vec<String> = expected.iter().map(|p| p.panel_label.clone()).collect();
    let context = MatchContext {
        figure_label: "Figure 1",
        figure_caption: "",
        expected_labels: &labels,
        image: None,
    };
    PanelReconciler::new(ReconcileConfig::default())
        .reconcile(expected, detections, &context)
        .await
}

/// Row of `n` equal-width boxes
fn row(n: usize) -> Vec<Detection> {
    let width = 1.0 / n as f64;
    (0..n)
        .map(|i| detection(i as f64 * width, 0.0, (i as f64 + 0.95) * width, 1.0, 0.9))
        .collect()
}

#[tokio::test]
async fn test_three_boxes_two_labels_mints_c() {
    // Given: caption names A and B, detector finds three columns
    let expected = stubs(&["A", "B"]);

    // When: reconciling
    let result = reconcile(&expected, &three_columns()).await.unwrap();

    // Then: A and B matched left to right, C minted for the surplus box
    let labels: Vec<&str> = result.panels.iter().map(|p| p.panel_label.as_str()).collect();
    assert_eq!(labels, vec!["A", "B", "C"]);
    assert_eq!(result.panels[0].panel_caption, "(A) caption for A");
    assert_eq!(result.panels[2].origin, PanelOrigin::Minted);
    assert_eq!(result.panels[2].panel_caption, "");
    assert!(result.panels.iter().all(|p| p.panel_bbox.is_some()));
    assert_eq!(result.report.minted, strings(&["C"]));
}

#[tokio::test]
async fn test_surplus_always_yields_n_panels() {
    // N detections, M expected labels, N > M
    for m in 2..5usize {
        for n in (m + 1)..8usize {
            let labels: Vec<String> = (0..m).map(|i| ((b'A' + i as u8) as char).to_string()).collect();
            let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
            let expected = stubs(&label_refs);

            let result = reconcile(&expected, &row(n)).await.unwrap();

            assert_eq!(result.panels.len(), n, "m={} n={}", m, n);
            for (i, label) in labels.iter().enumerate() {
                assert_eq!(&result.panels[i].panel_label, label);
                assert_eq!(result.panels[i].origin, PanelOrigin::Caption);
            }
            assert_eq!(result.report.minted.len(), n - m);
        }
    }
}

#[tokio::test]
async fn test_deficit_keeps_labels_without_regions() {
    let expected = stubs(&["A", "B", "C", "D"]);
    let result = reconcile(&expected, &row(2)).await.unwrap();

    assert_eq!(result.panels.len(), 4);
    assert!(result.panels[0].panel_bbox.is_some());
    assert!(result.panels[1].panel_bbox.is_some());
    assert!(result.panels[2].panel_bbox.is_none());
    assert!(result.panels[3].confidence.is_none());
    assert_eq!(result.report.deficit, strings(&["C", "D"]));
}

#[tokio::test]
async fn test_single_or_no_label_is_one_undivided_panel() {
    for expected in [stubs(&[]), stubs(&["A"])] {
        let result = reconcile(&expected, &three_columns()).await.unwrap();
        assert_eq!(result.panels.len(), 1);
        assert!(result.panels[0].panel_bbox.is_none());
        assert_eq!(result.panels[0].origin, PanelOrigin::WholeFigure);
        assert_eq!(result.report.ignored, 3);
    }
}

#[tokio::test]
async fn test_non_finite_detection_is_an_error() {
    let expected = stubs(&["A", "B"]);
    let detections = vec![detection(0.0, 0.0, 0.5, 1.0, 0.9), detection(0.5, f64::INFINITY, 1.0, 1.0, 0.9)];
    let result = reconcile(&expected, &detections).await;
    assert!(matches!(result, Err(CurationError::InvalidGeometry(_))));
}

#[tokio::test]
async fn test_no_detections_is_not_an_error() {
    let expected = stubs(&["A", "B", "C"]);
    let result = reconcile(&expected, &[]).await.unwrap();
    assert_eq!(result.panels.len(), 3);
    assert!(result.panels.iter().all(|p| p.panel_bbox.is_none()));
}
