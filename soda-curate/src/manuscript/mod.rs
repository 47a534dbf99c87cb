//! Manuscript-level aggregation

pub mod accumulator;

pub use accumulator::{find_duplicated_panels, ManuscriptAccumulator};
