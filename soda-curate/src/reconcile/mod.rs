//! Detection ↔ caption label reconciliation

pub mod reconciler;
pub mod scorer;

pub use reconciler::{whole_figure_panel, PanelReconciler, ReconcileReport, Reconciliation, WHOLE_FIGURE_LABEL};
pub use scorer::{parse_panel_reply, reading_order, PositionalScorer, VisionMatchScorer};
