//! Collaborator traits and their request/response types
//!
//! The curation core talks to three black boxes:
//! - **PanelDetector:** object-detection model returning boxes and scores
//! - **CompletionService:** text/vision completion endpoint
//! - **PanelMatchScorer:** assigns detected regions to caption labels
//!
//! Tests stub these with fixed outputs; production wires real clients.

use crate::config::{CompletionConfig, DetectionConfig};
use crate::error::{CurationError, CurationResult};
use crate::models::{Detection, TokenUsage};
use base64::Engine as _;
use image::DynamicImage;
use std::io::Cursor;

// ============================================================================
// Detection model
// ============================================================================

/// Object-detection model predicting panel regions
///
/// Implementations return relative `xyxy` boxes. Thresholding and suppression
/// are re-applied by the adapter, so a model may return raw candidates.
#[async_trait::async_trait]
pub trait PanelDetector: Send + Sync {
    /// Model name for logging
    fn name(&self) -> &'static str;

    async fn predict(
        &self,
        image: &DynamicImage,
        params: &DetectionConfig,
    ) -> CurationResult<Vec<Detection>>;
}

// ============================================================================
// Completion service
// ============================================================================

/// One completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// PNG image, base64-encoded, for vision requests
    pub image_png_base64: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the service for a JSON object
    pub json_response: bool,
}

impl CompletionRequest {
    pub fn new(
        config: &CompletionConfig,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            image_png_base64: None,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            json_response: false,
        }
    }

    pub fn expecting_json(mut self) -> Self {
        self.json_response = true;
        self
    }

    /// Attach an image as base64 PNG
    pub fn with_image(mut self, image: &DynamicImage) -> CurationResult<Self> {
        self.image_png_base64 = Some(encode_png_base64(image)?);
        Ok(self)
    }
}

/// Completion result with usage accounting
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Text/vision completion endpoint
///
/// Transient failures are reported as `RateLimited`/`Transport` so callers can
/// back off; anything else counts as a failed attempt.
#[async_trait::async_trait]
pub trait CompletionService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: &CompletionRequest) -> CurationResult<CompletionResponse>;
}

/// Encode an image as base64 PNG
pub fn encode_png_base64(image: &DynamicImage) -> CurationResult<String> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buffer.into_inner()))
}

// ============================================================================
// Label matching
// ============================================================================

/// What a scorer may look at when labeling detections
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub figure_label: &'a str,
    pub figure_caption: &'a str,
    /// Caption labels in sequence order
    pub expected_labels: &'a [String],
    pub image: Option<&'a DynamicImage>,
}

/// A scorer's belief that a detection shows a given label
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatch {
    pub label: String,
    /// 0.0-1.0
    pub score: f64,
    /// Panel caption proposed alongside the label, if any
    pub caption: Option<String>,
    pub ai_response: Option<String>,
}

impl LabelMatch {
    /// Create a match with clamped score
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score: if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 },
            caption: None,
            ai_response: None,
        }
    }
}

/// Scorer output: one optional match per input detection, same order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoredMatches {
    pub matches: Vec<Option<LabelMatch>>,
    pub usage: TokenUsage,
}

/// Assigns detections to expected caption labels
///
/// The reconciler arbitrates around these scores; it never computes them.
#[async_trait::async_trait]
pub trait PanelMatchScorer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn score(
        &self,
        context: &MatchContext<'_>,
        detections: &[Detection],
    ) -> CurationResult<ScoredMatches>;
}

impl ScoredMatches {
    /// Check that the scorer returned one entry per detection
    pub fn check_len(&self, detections: usize) -> CurationResult<()> {
        if self.matches.len() == detections {
            Ok(())
        } else {
            Err(CurationError::MalformedResponse(format!(
                "scorer returned {} matches for {} detections",
                self.matches.len(),
                detections
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_match_score_clamped() {
        assert_eq!(LabelMatch::new("A", 1.7).score, 1.0);
        assert_eq!(LabelMatch::new("A", -0.2).score, 0.0);
        assert_eq!(LabelMatch::new("A", f64::NAN).score, 0.0);
    }

    #[test]
    fn test_request_carries_config() {
        let config = CompletionConfig::default();
        let req = CompletionRequest::new(&config, "sys", "user").expecting_json();
        assert_eq!(req.model, "gpt-4o");
        assert!(req.json_response);
        assert!(req.image_png_base64.is_none());
    }

    #[test]
    fn test_image_is_encoded() {
        let image = DynamicImage::new_rgb8(4, 4);
        let req = CompletionRequest::new(&CompletionConfig::default(), "s", "u")
            .with_image(&image)
            .unwrap();
        let encoded = req.image_png_base64.unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn test_scored_matches_length_check() {
        let scored = ScoredMatches {
            matches: vec![None, None],
            usage: TokenUsage::default(),
        };
        assert!(scored.check_len(2).is_ok());
        assert!(scored.check_len(3).is_err());
    }
}
