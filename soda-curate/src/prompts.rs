//! Completion prompts
//!
//! Every prompt asks for a reply in a fixed shape; the matching parser lives
//! next to the step that consumes it.

/// Locate every figure caption in a legends blob
pub const LOCATE_CAPTIONS_SYSTEM: &str = "You are an assistant that extracts figure captions from scientific manuscripts. \
Copy text exactly as it appears in the source. Never paraphrase, summarize or correct it. \
Reply with a single JSON object and nothing else.";

/// Split one figure caption into panel captions
pub const SPLIT_PANELS_SYSTEM: &str = "You are an assistant that splits scientific figure captions into panel descriptions. \
Panel captions must be copied verbatim from the figure caption, including the panel marker. \
Reply with a single JSON object and nothing else.";

/// Read the panel label printed in a cropped figure region
pub const MATCH_PANEL_SYSTEM: &str = "You are an assistant that identifies panels of scientific figures. \
You are shown one cropped panel and the caption of the whole figure. \
Reply with exactly one line of the form PANEL_X: caption, where X is the panel label \
and caption is the part of the figure caption describing this panel, copied verbatim.";

/// User prompt for caption location
pub fn locate_captions_prompt(legends: &str, expected_labels: &[String]) -> String {
    format!(
        "Extract the caption of each of these figures: {labels}.\n\
         Return JSON of the form \
         {{\"figures\": [{{\"figure_label\": \"Figure 1\", \"caption_title\": \"...\", \"figure_caption\": \"...\"}}]}}.\n\
         figure_caption is the complete caption after the figure label. \
         caption_title is its first sentence. \
         Omit figures you cannot find.\n\n\
         Figure legends:\n{legends}",
        labels = expected_labels.join(", "),
        legends = legends
    )
}

/// User prompt for panel splitting
pub fn split_panels_prompt(figure_label: &str, figure_caption: &str) -> String {
    format!(
        "Split the caption of {label} into one entry per panel.\n\
         Return JSON of the form \
         {{\"panels\": [{{\"panel_label\": \"A\", \"panel_caption\": \"(A) ...\"}}]}}.\n\
         Keep panels in caption order. A grouped marker such as (A, B) yields one entry per label \
         sharing the same caption. If the figure has no panels, return an empty list.\n\n\
         Caption:\n{caption}",
        label = figure_label,
        caption = figure_caption
    )
}

/// User prompt for matching one cropped detection
pub fn match_panel_prompt(figure_caption: &str, expected_labels: &[String]) -> String {
    format!(
        "Expected panel labels: {labels}.\n\
         Figure caption:\n{caption}\n\n\
         Which panel is shown in the image?",
        labels = expected_labels.join(", "),
        caption = figure_caption
    )
}
