//! Panel label alphabets and sequence validation

pub mod alphabet;
pub mod sequencer;

pub use alphabet::{clean_label, LabelAlphabet};
pub use sequencer::{
    sort_by_alphabet, MissingLabel, PanelLabelSequencer, SequenceReport, GAP_SLACK, MAX_PANEL_ORDINAL,
};
