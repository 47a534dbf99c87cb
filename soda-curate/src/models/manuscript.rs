//! Final structured manuscript record

use crate::models::cost::ProcessingCost;
use crate::models::figure::{DataSource, Figure, FigureStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured record for one manuscript archive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManuscriptStructure {
    pub manuscript_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub xml: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docx: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pdf: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub appendix: Vec<String>,
    pub figures: Vec<Figure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_availability: Vec<DataSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_associated_sd_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Raw AI responses keyed by step, kept for audit
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ai_responses: BTreeMap<String, String>,
    #[serde(default)]
    pub cost: ProcessingCost,
}

impl ManuscriptStructure {
    pub fn figure(&self, label: &str) -> Option<&Figure> {
        self.figures.iter().find(|f| f.figure_label == label)
    }

    pub fn failed_figures(&self) -> impl Iterator<Item = &Figure> {
        self.figures.iter().filter(|f| f.status == FigureStatus::Failed)
    }

    /// Serialize to pretty JSON
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_collections_omitted() {
        let record = ManuscriptStructure {
            manuscript_id: "EMBOJ-2024-1".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("errors").is_none());
        assert!(json.get("non_associated_sd_files").is_none());
        assert!(json.get("xml").is_none());
        assert_eq!(json["figures"], serde_json::json!([]));
        assert!(json.get("cost").is_some());
    }

    #[test]
    fn test_figure_level_required_fields_present() {
        let record = ManuscriptStructure {
            manuscript_id: "m".to_string(),
            figures: vec![Figure::new("Figure 1")],
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        let fig = &json["figures"][0];
        assert_eq!(fig["unassigned_sd_files"], serde_json::json!([]));
        assert_eq!(fig["duplicated_panels"], serde_json::json!([]));
        assert!(fig.get("img_files").is_none());
    }
}
