//! soda-curate library
//!
//! Reconciles figure captions, detected panel regions and source-data files
//! into one structured manuscript record.
//!
//! **Per-figure stages:**
//! 1. `segmentation`: legends → figures → panel captions (gap-free labels)
//! 2. `detection`: image → panel regions
//! 3. `reconcile`: caption labels × regions → canonical panels
//! 4. `assignment`: source-data paths → panels
//!
//! `manuscript` assembles the final record and `workflow` drives the stages
//! with per-figure isolation.

pub mod assignment;
pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod labels;
pub mod manuscript;
pub mod models;
pub mod prompts;
pub mod reconcile;
pub mod segmentation;
pub mod types;
pub mod utils;
pub mod verification;
pub mod workflow;

pub use crate::config::CurationConfig;
pub use crate::error::{CurationError, CurationResult};
pub use crate::models::{Figure, ManuscriptStructure, Panel};
pub use crate::workflow::{FigureWorkflow, ManuscriptOrchestrator, RunSummary};
