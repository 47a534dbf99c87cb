//! Token usage and cost accounting per processing step

use serde::{Deserialize, Serialize};

/// Token usage for one AI-backed operation (accumulates across calls)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// USD
    pub cost: f64,
}

impl TokenUsage {
    /// Usage for a single call, priced against `model`
    pub fn for_call(model: &str, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost: calculate_cost(model, prompt_tokens, completion_tokens),
        }
    }

    /// Fold another usage record into this one
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cost += other.cost;
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.cost == 0.0
    }
}

/// Processing steps that consume completion tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    ExtractSections,
    ExtractIndividualCaptions,
    AssignPanelSource,
    MatchCaptionPanel,
    ExtractDataSources,
}

impl ProcessingStep {
    pub const ALL: [ProcessingStep; 5] = [
        ProcessingStep::ExtractSections,
        ProcessingStep::ExtractIndividualCaptions,
        ProcessingStep::AssignPanelSource,
        ProcessingStep::MatchCaptionPanel,
        ProcessingStep::ExtractDataSources,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::ExtractSections => "extract_sections",
            ProcessingStep::ExtractIndividualCaptions => "extract_individual_captions",
            ProcessingStep::AssignPanelSource => "assign_panel_source",
            ProcessingStep::MatchCaptionPanel => "match_caption_panel",
            ProcessingStep::ExtractDataSources => "extract_data_sources",
        }
    }
}

/// Token usage per processing step plus the derived total
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingCost {
    pub extract_sections: TokenUsage,
    pub extract_individual_captions: TokenUsage,
    pub assign_panel_source: TokenUsage,
    pub match_caption_panel: TokenUsage,
    pub extract_data_sources: TokenUsage,
    pub total: TokenUsage,
}

impl ProcessingCost {
    pub fn step(&self, step: ProcessingStep) -> &TokenUsage {
        match step {
            ProcessingStep::ExtractSections => &self.extract_sections,
            ProcessingStep::ExtractIndividualCaptions => &self.extract_individual_captions,
            ProcessingStep::AssignPanelSource => &self.assign_panel_source,
            ProcessingStep::MatchCaptionPanel => &self.match_caption_panel,
            ProcessingStep::ExtractDataSources => &self.extract_data_sources,
        }
    }

    fn step_mut(&mut self, step: ProcessingStep) -> &mut TokenUsage {
        match step {
            ProcessingStep::ExtractSections => &mut self.extract_sections,
            ProcessingStep::ExtractIndividualCaptions => &mut self.extract_individual_captions,
            ProcessingStep::AssignPanelSource => &mut self.assign_panel_source,
            ProcessingStep::MatchCaptionPanel => &mut self.match_caption_panel,
            ProcessingStep::ExtractDataSources => &mut self.extract_data_sources,
        }
    }

    /// Add usage to a step; the total is refreshed by `update_total`
    pub fn record(&mut self, step: ProcessingStep, usage: &TokenUsage) {
        self.step_mut(step).add(usage);
    }

    /// Fold another cost sheet step by step
    pub fn merge(&mut self, other: &ProcessingCost) {
        for step in ProcessingStep::ALL {
            self.step_mut(step).add(other.step(step));
        }
        self.update_total();
    }

    /// Recompute the total from the individual steps
    pub fn update_total(&mut self) {
        let mut total = TokenUsage::default();
        for step in ProcessingStep::ALL {
            total.add(self.step(step));
        }
        total.total_tokens = total.prompt_tokens + total.completion_tokens;
        self.total = total;
    }
}

/// USD per one million (input, output) tokens
pub fn model_pricing(model: &str) -> Option<(f64, f64)> {
    match model {
        "gpt-4o" => Some((5.00, 10.00)),
        "gpt-4o-mini" => Some((0.15, 0.60)),
        _ => None,
    }
}

/// Cost of one call; models without a price entry cost nothing
pub fn calculate_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    match model_pricing(model) {
        Some((input, output)) => {
            (prompt_tokens as f64 / 1_000_000.0) * input
                + (completion_tokens as f64 / 1_000_000.0) * output
        }
        None => {
            tracing::debug!(model, "No pricing entry for model, cost recorded as 0");
            0.0
        }
    }
}
