//! Caption segmentation
//!
//! Legends → figure stubs → panel stubs with a gap-free label sequence.

pub mod figure_splitter;
pub mod panel_splitter;
pub mod response;
pub mod segmenter;

pub use figure_splitter::{
    canonical_figure_label, expected_figure_labels, first_sentence, is_caption_missing, segment,
    split_figure_blocks, FigureBlock, CAPTION_NOT_FOUND,
};
pub use panel_splitter::{extract_panels, PanelMarker, PanelSplit};
pub use segmenter::{
    CaptionSegmenter, LegendSegmentation, PanelExtraction, SegmentationStage, SegmentationState,
};
