//! Strict completion response types
//!
//! Replies are parsed into typed structs at the service boundary. Anything
//! that does not fit (missing required fields, unknown fields, labels that are
//! not a single panel token) is a `MalformedResponse` and counts as a failed
//! attempt.

use crate::error::{CurationError, CurationResult};
use crate::labels::{clean_label, MAX_PANEL_ORDINAL};
use crate::segmentation::panel_splitter::label_token;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Reply to the caption location prompt
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptionLocationResponse {
    pub figures: Vec<LocatedCaption>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocatedCaption {
    pub figure_label: String,
    #[serde(default)]
    pub caption_title: String,
    pub figure_caption: String,
}

/// Reply to the panel splitting prompt
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PanelSplitResponse {
    pub panels: Vec<PanelCaptionEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PanelCaptionEntry {
    pub panel_label: String,
    /// May be empty: a panel without its own description
    #[serde(default)]
    pub panel_caption: String,
}

/// Semantic checks beyond the JSON shape
pub trait ValidateResponse {
    fn validate(&self) -> CurationResult<()>;
}

impl ValidateResponse for CaptionLocationResponse {
    fn validate(&self) -> CurationResult<()> {
        for (i, figure) in self.figures.iter().enumerate() {
            if figure.figure_label.trim().is_empty() {
                return Err(CurationError::MalformedResponse(format!(
                    "figures[{}].figure_label is empty",
                    i
                )));
            }
            if figure.figure_caption.trim().is_empty() {
                return Err(CurationError::MalformedResponse(format!(
                    "figures[{}].figure_caption is empty for {}",
                    i, figure.figure_label
                )));
            }
        }
        Ok(())
    }
}

impl ValidateResponse for PanelSplitResponse {
    fn validate(&self) -> CurationResult<()> {
        for (i, panel) in self.panels.iter().enumerate() {
            if clean_label(&panel.panel_label).is_empty() {
                return Err(CurationError::MalformedResponse(format!(
                    "panels[{}].panel_label is empty",
                    i
                )));
            }
            if label_token(&panel.panel_label).is_none() {
                return Err(CurationError::MalformedResponse(format!(
                    "panels[{}].panel_label {:?} is not a panel label",
                    i, panel.panel_label
                )));
            }
        }
        if self.panels.len() > MAX_PANEL_ORDINAL {
            return Err(CurationError::MalformedResponse(format!(
                "{} panels exceed the limit of {}",
                self.panels.len(),
                MAX_PANEL_ORDINAL
            )));
        }
        Ok(())
    }
}

/// Parse and validate a JSON reply
///
/// A surrounding Markdown code fence is tolerated; any other text is not.
pub fn parse_json_response<T>(text: &str) -> CurationResult<T>
where
    T: DeserializeOwned + ValidateResponse,
{
    let body = strip_code_fence(text);
    let parsed: T = serde_json::from_str(body)
        .map_err(|e| CurationError::MalformedResponse(format!("invalid JSON reply: {}", e)))?;
    parsed.validate()?;
    Ok(parsed)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
