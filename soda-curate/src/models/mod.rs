//! Data models for soda-curate
//!
//! The manuscript record owns its figures; each figure owns its panels.
//! Detections are transient reconciler input and never stored on a figure.

pub mod cost;
pub mod figure;
pub mod manuscript;

pub use cost::{calculate_cost, ProcessingCost, ProcessingStep, TokenUsage};
pub use figure::{
    BoundingBox, DataSource, Detection, DuplicateReason, DuplicatedPanel, Figure, FigureStatus,
    Panel, PanelOrigin,
};
pub use manuscript::ManuscriptStructure;
