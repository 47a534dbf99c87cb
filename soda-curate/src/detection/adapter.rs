//! Panel detector adapter
//!
//! Wraps a black-box `PanelDetector` and enforces the output contract:
//! 1. Reject empty/undecodable images (`Detector` error)
//! 2. Validate every box (NaN/inf/inverted → `InvalidGeometry`, fatal)
//! 3. Drop detections below the confidence threshold
//! 4. Suppress overlaps above the IoU threshold, highest confidence first
//! 5. Cap at `max_detections`
//!
//! Output is ordered by descending confidence.

use crate::config::DetectionConfig;
use crate::error::{CurationError, CurationResult};
use crate::models::Detection;
use crate::types::PanelDetector;
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, info};

/// Adapter enforcing thresholds and geometry on detector output
#[derive(Clone)]
pub struct PanelDetectorAdapter {
    detector: Arc<dyn PanelDetector>,
    params: DetectionConfig,
}

impl PanelDetectorAdapter {
    pub fn new(detector: Arc<dyn PanelDetector>, params: DetectionConfig) -> Self {
        Self { detector, params }
    }

    pub fn params(&self) -> &DetectionConfig {
        &self.params
    }

    /// Detect panels in a decoded figure image
    pub async fn detect(&self, image: &DynamicImage) -> CurationResult<Vec<Detection>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(CurationError::Detector("empty image".to_string()));
        }

        let raw = self
            .detector
            .predict(image, &self.params)
            .await
            .map_err(|e| match e {
                CurationError::InvalidGeometry(_) | CurationError::Detector(_) => e,
                other => CurationError::Detector(format!("{}: {}", self.detector.name(), other)),
            })?;

        let detections = self.postprocess(raw)?;
        info!(
            detector = self.detector.name(),
            detections = detections.len(),
            "Detected panels in image"
        );
        Ok(detections)
    }

    /// Decode image bytes, then detect
    pub async fn detect_bytes(&self, bytes: &[u8]) -> CurationResult<Vec<Detection>> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| CurationError::Detector(format!("corrupt image: {}", e)))?;
        self.detect(&image).await
    }

    /// Validate, threshold, suppress and cap raw detections
    pub fn postprocess(&self, raw: Vec<Detection>) -> CurationResult<Vec<Detection>> {
        postprocess_detections(raw, &self.params)
    }
}

/// Validate, threshold, suppress and cap detections
///
/// Also applied to detections computed ahead of time, outside the adapter.
pub fn postprocess_detections(raw: Vec<Detection>, params: &DetectionConfig) -> CurationResult<Vec<Detection>> {
    let total = raw.len();
    let mut valid = Vec::with_capacity(total);
    for detection in raw {
        valid.push(detection.validated()?);
    }

    valid.retain(|d| d.confidence >= params.confidence_threshold);
    let above_threshold = valid.len();

    let mut kept = apply_nms(valid, params.iou_threshold);
    kept.truncate(params.max_detections);

    debug!(
        raw = total,
        above_threshold,
        kept = kept.len(),
        "Detector output post-processed"
    );
    Ok(kept)
}

/// Non-maximum suppression
///
/// Keeps the highest-confidence detection, removes everything overlapping it
/// by more than `iou_threshold`, and repeats. Ties keep input order.
pub fn apply_nms(mut detections: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep
            .iter()
            .all(|kept| kept.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;

    struct FixedDetector(Vec<Detection>);

    #[async_trait::async_trait]
    impl PanelDetector for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn predict(
            &self,
            _image: &DynamicImage,
            _params: &DetectionConfig,
        ) -> CurationResult<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    #[async_trait::async_trait]
    impl PanelDetector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn predict(
            &self,
            _image: &DynamicImage,
            _params: &DetectionConfig,
        ) -> CurationResult<Vec<Detection>> {
            Err(CurationError::Completion("model crashed".into()))
        }
    }

    fn det(x1: f64, y1: f64, x2: f64, y2: f64, conf: f64) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), conf)
    }

    fn adapter(detections: Vec<Detection>) -> PanelDetectorAdapter {
        PanelDetectorAdapter::new(Arc::new(FixedDetector(detections)), DetectionConfig::default())
    }

    #[tokio::test]
    async fn test_low_confidence_discarded() {
        let adapter = adapter(vec![
            det(0.0, 0.0, 0.5, 0.5, 0.9),
            det(0.5, 0.0, 1.0, 0.5, 0.1),
        ]);
        let out = adapter.detect(&DynamicImage::new_rgb8(32, 32)).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.9);
    }

    #[tokio::test]
    async fn test_overlaps_suppressed() {
        let adapter = adapter(vec![
            det(0.0, 0.0, 0.5, 0.5, 0.7),
            det(0.02, 0.0, 0.52, 0.5, 0.9),
            det(0.5, 0.5, 1.0, 1.0, 0.8),
        ]);
        let out = adapter.detect(&DynamicImage::new_rgb8(32, 32)).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.9, "higher-confidence duplicate survives");
        assert_eq!(out[1].confidence, 0.8);
    }

    #[tokio::test]
    async fn test_nan_is_fatal() {
        let adapter = adapter(vec![det(f64::NAN, 0.0, 0.5, 0.5, 0.9)]);
        let result = adapter.detect(&DynamicImage::new_rgb8(32, 32)).await;
        assert!(matches!(result, Err(CurationError::InvalidGeometry(_))));
    }

    #[tokio::test]
    async fn test_max_detections_cap() {
        let mut params = DetectionConfig::default();
        params.max_detections = 2;
        let detections = (0..5)
            .map(|i| {
                let x = i as f64 * 0.2;
                det(x, 0.0, x + 0.15, 0.2, 0.5 + i as f64 * 0.05)
            })
            .collect();
        let adapter = PanelDetectorAdapter::new(Arc::new(FixedDetector(detections)), params);
        let out = adapter.detect(&DynamicImage::new_rgb8(32, 32)).await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[0].confidence > out[1].confidence);
    }

    #[tokio::test]
    async fn test_corrupt_bytes_rejected() {
        let adapter = adapter(vec![]);
        let result = adapter.detect_bytes(b"definitely not a png").await;
        assert!(matches!(result, Err(CurationError::Detector(_))));
    }

    #[tokio::test]
    async fn test_empty_image_rejected() {
        let adapter = adapter(vec![]);
        let result = adapter.detect(&DynamicImage::new_rgb8(0, 0)).await;
        assert!(matches!(result, Err(CurationError::Detector(_))));
    }

    #[tokio::test]
    async fn test_model_failure_wrapped() {
        let adapter =
            PanelDetectorAdapter::new(Arc::new(FailingDetector), DetectionConfig::default());
        let result = adapter.detect(&DynamicImage::new_rgb8(8, 8)).await;
        match result {
            Err(CurationError::Detector(msg)) => assert!(msg.contains("failing")),
            other => panic!("expected detector error, got {:?}", other),
        }
    }

    #[test]
    fn test_nms_keeps_disjoint() {
        let kept = apply_nms(
            vec![det(0.0, 0.0, 0.4, 0.4, 0.5), det(0.6, 0.6, 1.0, 1.0, 0.6)],
            0.1,
        );
        assert_eq!(kept.len(), 2);
    }
}
