//! Curation workflow
//!
//! `figure_workflow` runs one figure through the stages; `orchestrator`
//! runs a manuscript's figures in parallel and assembles the record.

pub mod figure_workflow;
pub mod orchestrator;

pub use figure_workflow::{FigureInput, FigureOutcome, FigureWorkflow, DEFAULT_FIGURE_LABEL};
pub use orchestrator::{
    FigureWorkflowResult, ManuscriptInput, ManuscriptOrchestrator, ManuscriptRun, RunSummary,
};
