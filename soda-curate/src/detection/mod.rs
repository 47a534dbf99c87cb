//! Panel detection

pub mod adapter;

pub use adapter::{apply_nms, postprocess_detections, PanelDetectorAdapter};
