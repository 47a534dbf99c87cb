//! Label match scorers
//!
//! - `PositionalScorer`: reading order (rows top to bottom, then left to
//!   right) against the caption's label order. Deterministic, no I/O.
//! - `VisionMatchScorer`: asks a vision completion service which panel each
//!   cropped detection shows, replying `PANEL_X: caption`.

use crate::config::{CompletionConfig, RetryConfig};
use crate::error::{CurationError, CurationResult};
use crate::labels::clean_label;
use crate::models::{Detection, TokenUsage};
use crate::prompts::{match_panel_prompt, MATCH_PANEL_SYSTEM};
use crate::types::{
    CompletionRequest, CompletionService, LabelMatch, MatchContext, PanelMatchScorer, ScoredMatches,
};
use crate::utils::retry::{bounded_retry, retry_transient, with_timeout};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

static PANEL_REPLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[\s*#]*PANEL[_ ](?P<label>[A-Za-z0-9]+)[\s*]*:\s*(?P<caption>.*?)\s*$")
        .expect("Invalid panel reply regex")
});

/// Indices of detections in reading order
///
/// Boxes whose vertical centres lie within `row_tolerance` × mean box height
/// of a row's first box share that row; rows are read top to bottom and boxes
/// within a row left to right.
pub fn reading_order(detections: &[Detection], row_tolerance: f64) -> Vec<usize> {
    if detections.is_empty() {
        return Vec::new();
    }
    let mean_height =
        detections.iter().map(|d| d.bbox.height()).sum::<f64>() / detections.len() as f64;
    let tolerance = row_tolerance * mean_height;

    let mut by_y: Vec<usize> = (0..detections.len()).collect();
    by_y.sort_by(|&a, &b| {
        detections[a]
            .bbox
            .center()
            .1
            .partial_cmp(&detections[b].bbox.center().1)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut rows: Vec<Vec<usize>> = Vec::new();
    let mut row_anchor = f64::NEG_INFINITY;
    for idx in by_y {
        let y = detections[idx].bbox.center().1;
        match rows.last_mut() {
            Some(row) if (y - row_anchor).abs() <= tolerance => row.push(idx),
            _ => {
                rows.push(vec![idx]);
                row_anchor = y;
            }
        }
    }

    rows.into_iter()
        .flat_map(|mut row| {
            row.sort_by(|&a, &b| {
                detections[a]
                    .bbox
                    .center()
                    .0
                    .partial_cmp(&detections[b].bbox.center().0)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            row
        })
        .collect()
}

// ============================================================================
// Positional scorer
// ============================================================================

/// Pairs the i-th detection in reading order with the i-th expected label
///
/// The match score is the detection confidence. Detections beyond the last
/// expected label stay unmatched.
#[derive(Debug, Clone, Copy)]
pub struct PositionalScorer {
    row_tolerance: f64,
}

impl PositionalScorer {
    pub fn new(row_tolerance: f64) -> Self {
        Self { row_tolerance }
    }

    pub fn assign(&self, expected_labels: &[String], detections: &[Detection]) -> Vec<Option<LabelMatch>> {
        let mut matches = vec![None; detections.len()];
        for (rank, idx) in reading_order(detections, self.row_tolerance).into_iter().enumerate() {
            if let Some(label) = expected_labels.get(rank) {
                matches[idx] = Some(LabelMatch::new(label.clone(), detections[idx].confidence));
            }
        }
        matches
    }
}

impl Default for PositionalScorer {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[async_trait::async_trait]
impl PanelMatchScorer for PositionalScorer {
    fn name(&self) -> &'static str {
        "positional"
    }

    async fn score(
        &self,
        context: &MatchContext<'_>,
        detections: &[Detection],
    ) -> CurationResult<ScoredMatches> {
        Ok(ScoredMatches {
            matches: self.assign(context.expected_labels, detections),
            usage: TokenUsage::default(),
        })
    }
}

// ============================================================================
// Vision scorer
// ============================================================================

/// Parse a `PANEL_X: caption` reply into `(label, caption)`
pub fn parse_panel_reply(text: &str) -> CurationResult<(String, String)> {
    let caps = PANEL_REPLY.captures(text).ok_or_else(|| {
        CurationError::MalformedResponse(format!(
            "expected 'PANEL_X: caption', got '{}'",
            text.chars().take(80).collect::<String>()
        ))
    })?;
    let label = caps.name("label").map(|m| clean_label(m.as_str())).unwrap_or_default();
    if label.is_empty() {
        return Err(CurationError::MalformedResponse("empty panel label".to_string()));
    }
    let caption = caps.name("caption").map(|m| m.as_str().to_string()).unwrap_or_default();
    Ok((label, caption))
}

/// Vision-model scorer over cropped detections
pub struct VisionMatchScorer {
    service: Arc<dyn CompletionService>,
    completion: CompletionConfig,
    retry: RetryConfig,
}

struct PanelReply {
    label: String,
    caption: String,
    raw: String,
}

impl VisionMatchScorer {
    pub fn new(service: Arc<dyn CompletionService>, completion: CompletionConfig, retry: RetryConfig) -> Self {
        Self {
            service,
            completion,
            retry,
        }
    }

    /// One attempt; usage is tallied even when the reply is rejected
    async fn ask(
        &self,
        crop: &DynamicImage,
        context: &MatchContext<'_>,
        usage: &Mutex<TokenUsage>,
    ) -> CurationResult<PanelReply> {
        let request = CompletionRequest::new(
            &self.completion,
            MATCH_PANEL_SYSTEM,
            match_panel_prompt(context.figure_caption, context.expected_labels),
        )
        .with_image(crop)?;

        let service = self.service.as_ref();
        let response = with_timeout(
            self.retry.completion_timeout(),
            retry_transient("match_caption_panel", self.retry.transient_max_wait_ms, || {
                service.complete(&request)
            }),
        )
        .await?;
        if let Ok(mut total) = usage.lock() {
            total.add(&response.usage);
        }

        let (label, caption) = parse_panel_reply(&response.text)?;
        Ok(PanelReply {
            label,
            caption,
            raw: response.text,
        })
    }
}

#[async_trait::async_trait]
impl PanelMatchScorer for VisionMatchScorer {
    fn name(&self) -> &'static str {
        "vision"
    }

    async fn score(
        &self,
        context: &MatchContext<'_>,
        detections: &[Detection],
    ) -> CurationResult<ScoredMatches> {
        let image = context.image.ok_or_else(|| {
            CurationError::InvalidInput("vision matching needs the figure image".to_string())
        })?;

        let usage = Mutex::new(TokenUsage::default());
        let mut matches = Vec::with_capacity(detections.len());
        for (i, detection) in detections.iter().enumerate() {
            let (x, y, w, h) = detection.bbox.to_pixels(image.width(), image.height());
            let crop = image.crop_imm(x, y, w, h);

            let outcome = bounded_retry(
                "match_caption_panel",
                self.retry.max_attempts,
                |_| self.ask(&crop, context, &usage),
                |reply: &PanelReply| context.expected_labels.contains(&reply.label),
            )
            .await;

            let Some(reply) = outcome.result else {
                warn!(
                    figure_label = context.figure_label,
                    detection = i,
                    error = ?outcome.last_error.map(|e| e.to_string()),
                    "No panel label read for detection"
                );
                matches.push(None);
                continue;
            };
            debug!(
                figure_label = context.figure_label,
                detection = i,
                label = %reply.label,
                accepted = outcome.succeeded,
                "Vision scorer labeled detection"
            );

            let score = if outcome.succeeded { detection.confidence } else { 0.0 };
            let mut label_match = LabelMatch::new(reply.label, score);
            if !reply.caption.is_empty() {
                label_match.caption = Some(reply.caption);
            }
            label_match.ai_response = Some(reply.raw);
            matches.push(Some(label_match));
        }

        Ok(ScoredMatches {
            matches,
            usage: usage.into_inner().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;

    fn det(x1: f64, y1: f64, x2: f64, y2: f64) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), 0.9)
    }

    fn labels(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reading_order_rows_then_columns() {
        // Input order: bottom-left, top-right, top-left, bottom-right
        let detections = vec![
            det(0.0, 0.5, 0.5, 1.0),
            det(0.5, 0.02, 1.0, 0.5),
            det(0.0, 0.0, 0.5, 0.48),
            det(0.5, 0.5, 1.0, 1.0),
        ];
        assert_eq!(reading_order(&detections, 0.5), vec![2, 1, 0, 3]);
    }

    #[test]
    fn test_positional_assign_leaves_extras_unmatched() {
        let detections = vec![det(0.6, 0.0, 0.9, 0.4), det(0.0, 0.0, 0.3, 0.4), det(0.3, 0.0, 0.6, 0.4)];
        let matches = PositionalScorer::default().assign(&labels(&["A", "B"]), &detections);
        assert_eq!(matches[1].as_ref().unwrap().label, "A");
        assert_eq!(matches[2].as_ref().unwrap().label, "B");
        assert!(matches[0].is_none());
    }

    #[test]
    fn test_parse_panel_reply() {
        assert_eq!(
            parse_panel_reply("PANEL_B: (B) Quantification.").unwrap(),
            ("B".to_string(), "(B) Quantification.".to_string())
        );
        assert_eq!(parse_panel_reply("**PANEL_c**: text").unwrap().0, "C");
        assert!(matches!(
            parse_panel_reply("This panel shows a blot."),
            Err(CurationError::MalformedResponse(_))
        ));
    }
}
