//! Figure, panel and detection records
//!
//! Geometry is always relative to the figure image: every coordinate lies in
//! [0, 1] and boxes are stored as `x1, y1, x2, y2` with `x1 < x2`, `y1 < y2`.

use crate::error::{CurationError, CurationResult};
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in relative image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// The whole image
    pub fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    /// Check geometry and clamp into the unit square
    ///
    /// NaN/inf coordinates and inverted boxes are errors. Coordinates that
    /// overshoot the unit square (model rounding) are clamped.
    pub fn validated(&self) -> CurationResult<BoundingBox> {
        if !self.is_finite() {
            return Err(CurationError::InvalidGeometry(format!(
                "non-finite coordinates [{}, {}, {}, {}]",
                self.x1, self.y1, self.x2, self.y2
            )));
        }
        let clamped = BoundingBox::new(
            self.x1.clamp(0.0, 1.0),
            self.y1.clamp(0.0, 1.0),
            self.x2.clamp(0.0, 1.0),
            self.y2.clamp(0.0, 1.0),
        );
        if clamped.x1 >= clamped.x2 || clamped.y1 >= clamped.y2 {
            return Err(CurationError::InvalidGeometry(format!(
                "degenerate box [{:.4}, {:.4}, {:.4}, {:.4}]",
                self.x1, self.y1, self.x2, self.y2
            )));
        }
        Ok(clamped)
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Intersection over Union with another box
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Pixel rectangle `(x, y, width, height)` for an image of the given size
    ///
    /// Always at least one pixel wide and tall.
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> (u32, u32, u32, u32) {
        let w = f64::from(image_width);
        let h = f64::from(image_height);
        let left = (self.x1 * w).floor().clamp(0.0, (w - 1.0).max(0.0)) as u32;
        let top = (self.y1 * h).floor().clamp(0.0, (h - 1.0).max(0.0)) as u32;
        let right = (self.x2 * w).ceil().clamp(0.0, w) as u32;
        let bottom = (self.y2 * h).ceil().clamp(0.0, h) as u32;
        (
            left,
            top,
            right.saturating_sub(left).max(1),
            bottom.saturating_sub(top).max(1),
        )
    }
}

/// Raw detector output: a region and its score, no label
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f64,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f64) -> Self {
        Self { bbox, confidence }
    }

    /// Validate geometry and confidence
    pub fn validated(&self) -> CurationResult<Detection> {
        if !self.confidence.is_finite() {
            return Err(CurationError::InvalidGeometry(format!(
                "non-finite confidence {}",
                self.confidence
            )));
        }
        Ok(Detection {
            bbox: self.bbox.validated()?,
            confidence: self.confidence.clamp(0.0, 1.0),
        })
    }
}

/// How a panel entered the figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelOrigin {
    /// Label found in the caption text
    #[default]
    Caption,
    /// Inserted to close a gap in the caption's label sequence
    GapFill,
    /// Detected region with no caption label; label continues the sequence
    Minted,
    /// Stand-in for a figure that is not subdivided
    WholeFigure,
}

/// A labeled sub-region of a figure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub panel_label: String,
    /// Empty when the caption has no text for this panel
    pub panel_caption: String,
    pub panel_bbox: Option<BoundingBox>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sd_files: Vec<String>,
    #[serde(default = "default_true")]
    pub is_verbatim: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
    #[serde(skip)]
    pub origin: PanelOrigin,
}

fn default_true() -> bool {
    true
}

impl Panel {
    /// Label and caption only, as produced by caption segmentation
    pub fn stub(label: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            panel_label: label.into(),
            panel_caption: caption.into(),
            panel_bbox: None,
            confidence: None,
            sd_files: Vec::new(),
            is_verbatim: true,
            ai_response: None,
            origin: PanelOrigin::Caption,
        }
    }

    /// Empty panel closing a gap in the label sequence
    pub fn gap_fill(label: impl Into<String>) -> Self {
        Self {
            origin: PanelOrigin::GapFill,
            ..Self::stub(label, "")
        }
    }

    /// Panel with neither caption, region nor data files
    pub fn is_empty(&self) -> bool {
        self.panel_caption.trim().is_empty() && self.panel_bbox.is_none() && self.sd_files.is_empty()
    }
}

/// Why a panel is reported as a duplicate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DuplicateReason {
    /// Two panels cover nearly the same image region
    OverlappingRegion { iou: f64 },
    /// The caption introduces the same label more than once
    RepeatedLabel,
}

/// Report entry for a panel that duplicates another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicatedPanel {
    pub panel_label: String,
    pub duplicate_of: String,
    #[serde(flatten)]
    pub reason: DuplicateReason,
}

/// Processing outcome of a figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FigureStatus {
    #[default]
    Complete,
    /// Record produced with recovered problems (see `errors`)
    Degraded,
    /// Figure excluded from region-bearing output
    Failed,
}

/// A figure with its caption, panels and associated files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub figure_label: String,
    pub caption_title: String,
    pub figure_caption: String,
    pub panels: Vec<Panel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub img_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sd_files: Vec<String>,
    #[serde(default)]
    pub unassigned_sd_files: Vec<String>,
    #[serde(default)]
    pub duplicated_panels: Vec<DuplicatedPanel>,
    #[serde(default = "default_true")]
    pub is_verbatim: bool,
    /// 0 means verbatim, 1 means unrelated to the source text
    #[serde(default)]
    pub hallucination_score: f64,
    #[serde(default)]
    pub status: FigureStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response_panel_source_assign: Option<String>,
    /// Labels the caption sequence requires; kept through cleanup even when empty
    #[serde(skip)]
    pub required_labels: Vec<String>,
}

impl Figure {
    pub fn new(figure_label: impl Into<String>) -> Self {
        Self {
            figure_label: figure_label.into(),
            caption_title: String::new(),
            figure_caption: String::new(),
            panels: Vec::new(),
            img_files: Vec::new(),
            sd_files: Vec::new(),
            unassigned_sd_files: Vec::new(),
            duplicated_panels: Vec::new(),
            is_verbatim: true,
            hallucination_score: 0.0,
            status: FigureStatus::Complete,
            errors: Vec::new(),
            ai_response_panel_source_assign: None,
            required_labels: Vec::new(),
        }
    }

    /// Record a recovered problem and mark the figure degraded
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        if self.status == FigureStatus::Complete {
            self.status = FigureStatus::Degraded;
        }
    }

    /// Record a fatal problem
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.status = FigureStatus::Failed;
    }

    pub fn panel(&self, label: &str) -> Option<&Panel> {
        self.panels.iter().find(|p| p.panel_label == label)
    }

    pub fn panel_labels(&self) -> Vec<String> {
        self.panels.iter().map(|p| p.panel_label.clone()).collect()
    }
}

/// A data-availability entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub database: String,
    pub accession_number: String,
    #[serde(default)]
    pub url: String,
}
