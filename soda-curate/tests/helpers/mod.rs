//! Shared test doubles for integration tests
//!
//! - `FixedDetector`: returns the same detections for every image
//! - `FailingDetector`: always reports a model failure
//! - `PanickingDetector`: panics on images of one width, detects nothing otherwise
//! - `ScriptedCompletionService`: replays queued replies in order and records requests

#![allow(dead_code)]

use image::DynamicImage;
use soda_curate::config::{DetectionConfig, RetryConfig};
use soda_curate::error::{CurationError, CurationResult};
use soda_curate::models::{BoundingBox, Detection, TokenUsage};
use soda_curate::types::{CompletionRequest, CompletionResponse, CompletionService, PanelDetector};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

pub struct FixedDetector(pub Vec<Detection>);

#[async_trait::async_trait]
impl PanelDetector for FixedDetector {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn predict(&self, _image: &DynamicImage, _params: &DetectionConfig) -> CurationResult<Vec<Detection>> {
        Ok(self.0.clone())
    }
}

pub struct FailingDetector;

#[async_trait::async_trait]
impl PanelDetector for FailingDetector {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn predict(&self, _image: &DynamicImage, _params: &DetectionConfig) -> CurationResult<Vec<Detection>> {
        Err(CurationError::Detector("model weights not loaded".to_string()))
    }
}

pub struct PanickingDetector {
    pub panic_on_width: u32,
}

#[async_trait::async_trait]
impl PanelDetector for PanickingDetector {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn predict(&self, image: &DynamicImage, _params: &DetectionConfig) -> CurationResult<Vec<Detection>> {
        if image.width() == self.panic_on_width {
            panic!("detector crashed on {}px image", image.width());
        }
        Ok(Vec::new())
    }
}

/// Replies are consumed in order; the last one repeats once the queue is empty
pub struct ScriptedCompletionService {
    replies: Mutex<VecDeque<CurationResult<String>>>,
    last: Mutex<Option<String>>,
    calls: AtomicU32,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionService {
    pub fn new(replies: Vec<CurationResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CompletionService for ScriptedCompletionService {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> CurationResult<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        let text = match next {
            Some(Ok(text)) => {
                *self.last.lock().unwrap() = Some(text.clone());
                text
            }
            Some(Err(e)) => return Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| CurationError::Completion("no scripted reply".to_string()))?,
        };
        Ok(CompletionResponse {
            text,
            model: request.model.clone(),
            usage: TokenUsage::for_call(&request.model, 100, 20),
        })
    }
}

/// Retry settings that keep tests fast
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        completion_timeout_ms: 1_000,
        transient_max_wait_ms: 10,
    }
}

pub fn detection(x1: f64, y1: f64, x2: f64, y2: f64, confidence: f64) -> Detection {
    Detection::new(BoundingBox::new(x1, y1, x2, y2), confidence)
}

/// Three side-by-side columns
pub fn three_columns() -> Vec<Detection> {
    vec![
        detection(0.0, 0.0, 0.33, 1.0, 0.95),
        detection(0.34, 0.0, 0.66, 1.0, 0.90),
        detection(0.67, 0.0, 1.0, 1.0, 0.85),
    ]
}

pub fn blank_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::new_rgb8(width, height)
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
