//! Panel reconciler
//!
//! Aligns detected regions with the caption's panel labels.
//!
//! **Algorithm:**
//! 1. ≤1 expected panel: one whole-figure panel, detections ignored
//! 2. Validate detection geometry (NaN/inf is a hard error)
//! 3. Score detections against expected labels (scorer is pluggable)
//! 4. Conflicts: several detections claiming one label keep the
//!    highest-confidence claim; the rest are demoted to surplus
//! 5. Surplus (unmatched, low-scoring or demoted) detections get new labels
//!    continuing the alphabet past the last expected label, in reading order
//! 6. Deficit: expected labels without a detection keep their stub, no bbox
//! 7. Output sorted by the figure's alphabet
//!
//! Count mismatches are the normal case and never an error.

use crate::config::ReconcileConfig;
use crate::error::CurationResult;
use crate::labels::{clean_label, sort_by_alphabet, LabelAlphabet, PanelLabelSequencer};
use crate::models::{Detection, Panel, PanelOrigin, TokenUsage};
use crate::reconcile::scorer::{reading_order, PositionalScorer};
use crate::types::{LabelMatch, MatchContext, PanelMatchScorer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Label given to an undivided figure with no caption label
pub const WHOLE_FIGURE_LABEL: &str = "A";

/// What reconciliation did with each detection and expected label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Expected labels that received a detection
    pub matched: Vec<String>,
    /// Detections that lost a label conflict
    pub demoted: usize,
    /// Labels minted for surplus detections
    pub minted: Vec<String>,
    /// Expected labels left without a detection
    pub deficit: Vec<String>,
    /// Detections not used because the figure is undivided
    pub ignored: usize,
    /// Scorer whose matches were used
    pub scorer: String,
    /// Why the configured scorer was replaced by the positional one
    pub fallback_reason: Option<String>,
}

/// Reconciled panels with bookkeeping
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub panels: Vec<Panel>,
    pub report: ReconcileReport,
    pub usage: TokenUsage,
}

/// One detection's claim on an expected label
#[derive(Debug, Clone)]
struct Claim {
    detection: usize,
    confidence: f64,
    score: f64,
    label_match: LabelMatch,
}

/// Panel reconciler
#[derive(Clone)]
pub struct PanelReconciler {
    config: ReconcileConfig,
    scorer: Arc<dyn PanelMatchScorer>,
    fallback: PositionalScorer,
}

impl PanelReconciler {
    /// Reconciler using reading-order matching
    pub fn new(config: ReconcileConfig) -> Self {
        let fallback = PositionalScorer::new(config.row_tolerance);
        Self {
            config,
            scorer: Arc::new(fallback),
            fallback,
        }
    }

    /// Use another scorer; reading order remains the fallback
    pub fn with_scorer(mut self, scorer: Arc<dyn PanelMatchScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    /// Reconcile expected panel stubs with detections
    ///
    /// Only malformed detections (non-finite or inverted boxes) are errors.
    pub async fn reconcile(
        &self,
        expected: &[Panel],
        detections: &[Detection],
        context: &MatchContext<'_>,
    ) -> CurationResult<Reconciliation> {
        if expected.len() <= 1 {
            let mut report = ReconcileReport {
                ignored: detections.len(),
                scorer: "none".to_string(),
                ..Default::default()
            };
            let panel = whole_figure_panel(expected.first());
            report.matched.push(panel.panel_label.clone());
            return Ok(Reconciliation {
                panels: vec![panel],
                report,
                usage: TokenUsage::default(),
            });
        }

        let validated = detections
            .iter()
            .map(Detection::validated)
            .collect::<CurationResult<Vec<_>>>()?;

        let (matches, usage, scorer, fallback_reason) = if validated.is_empty() {
            (Vec::new(), TokenUsage::default(), self.fallback.name(), None)
        } else {
            match self.scorer.score(context, &validated).await {
                Ok(scored) if scored.check_len(validated.len()).is_ok() => {
                    (scored.matches, scored.usage, self.scorer.name(), None)
                }
                result => {
                    let reason = match result {
                        Ok(scored) => format!(
                            "scorer returned {} matches for {} detections",
                            scored.matches.len(),
                            validated.len()
                        ),
                        Err(e) => e.to_string(),
                    };
                    warn!(
                        figure_label = context.figure_label,
                        scorer = self.scorer.name(),
                        error = %reason,
                        "Match scorer failed, falling back to reading order"
                    );
                    let expected_labels: Vec<String> =
                        expected.iter().map(|p| clean_label(&p.panel_label)).collect();
                    (
                        self.fallback.assign(&expected_labels, &validated),
                        TokenUsage::default(),
                        self.fallback.name(),
                        Some(reason),
                    )
                }
            }
        };

        let (panels, mut report) = self.arbitrate(expected, &validated, &matches);
        report.scorer = scorer.to_string();
        report.fallback_reason = fallback_reason;

        info!(
            figure_label = context.figure_label,
            detections = validated.len(),
            expected = expected.len(),
            matched = report.matched.len(),
            minted = report.minted.len(),
            deficit = report.deficit.len(),
            "Reconciled panels"
        );
        Ok(Reconciliation {
            panels,
            report,
            usage,
        })
    }

    /// Arbitrate scored matches into the canonical panel list
    ///
    /// `matches[i]` is the scorer's proposal for `detections[i]`. Detections
    /// must already be validated.
    pub fn arbitrate(
        &self,
        expected: &[Panel],
        detections: &[Detection],
        matches: &[Option<LabelMatch>],
    ) -> (Vec<Panel>, ReconcileReport) {
        let mut panels: Vec<Panel> = expected
            .iter()
            .map(|p| Panel {
                panel_label: clean_label(&p.panel_label),
                ..p.clone()
            })
            .collect();
        let expected_labels: Vec<String> = panels.iter().map(|p| p.panel_label.clone()).collect();
        let alphabet =
            PanelLabelSequencer::detect_alphabet(&expected_labels).unwrap_or(LabelAlphabet::Letters);

        let mut report = ReconcileReport::default();
        let mut claims: HashMap<String, Vec<Claim>> = HashMap::new();
        let mut surplus: Vec<usize> = Vec::new();

        for (i, detection) in detections.iter().enumerate() {
            let claim = matches.get(i).and_then(|m| m.as_ref()).and_then(|m| {
                let label = clean_label(&m.label);
                let known = expected_labels.contains(&label);
                if known && m.score >= self.config.min_match_score {
                    Some((label, m))
                } else {
                    None
                }
            });
            match claim {
                Some((label, m)) => claims.entry(label).or_default().push(Claim {
                    detection: i,
                    confidence: detection.confidence,
                    score: m.score,
                    label_match: m.clone(),
                }),
                None => surplus.push(i),
            }
        }

        for panel in panels.iter_mut() {
            let Some(mut contenders) = claims.remove(&panel.panel_label) else {
                continue;
            };
            // Highest confidence, then highest score, then earliest detection
            contenders.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
                    .then(a.detection.cmp(&b.detection))
            });
            let winner = contenders.remove(0);
            if !contenders.is_empty() {
                debug!(
                    panel_label = %panel.panel_label,
                    demoted = contenders.len(),
                    "Label conflict resolved by confidence"
                );
            }
            report.demoted += contenders.len();
            surplus.extend(contenders.iter().map(|c| c.detection));

            let detection = &detections[winner.detection];
            panel.panel_bbox = Some(detection.bbox);
            panel.confidence = Some(detection.confidence);
            if winner.label_match.ai_response.is_some() {
                panel.ai_response = winner.label_match.ai_response;
            }
            report.matched.push(panel.panel_label.clone());
        }

        report.deficit = panels
            .iter()
            .filter(|p| p.panel_bbox.is_none())
            .map(|p| p.panel_label.clone())
            .collect();

        // Surplus labels continue the sequence in reading order
        let surplus_detections: Vec<Detection> = surplus.iter().map(|&i| detections[i]).collect();
        let mut next_ordinal = expected_labels
            .iter()
            .filter_map(|l| alphabet.ordinal(l))
            .max()
            .unwrap_or(0)
            + 1;
        for local in reading_order(&surplus_detections, self.config.row_tolerance) {
            let detection = surplus_detections[local];
            let label = mint_label(alphabet, next_ordinal);
            next_ordinal += 1;

            let mut panel = Panel::stub(label.clone(), "");
            panel.panel_bbox = Some(detection.bbox);
            panel.confidence = Some(detection.confidence);
            panel.origin = PanelOrigin::Minted;
            panels.push(panel);
            report.minted.push(label);
        }

        sort_by_alphabet(&mut panels, alphabet);
        (panels, report)
    }
}

/// Next label of the alphabet; Roman numerals past 3999 continue as letters
fn mint_label(alphabet: LabelAlphabet, ordinal: usize) -> String {
    alphabet
        .symbol(ordinal)
        .or_else(|| LabelAlphabet::Letters.symbol(ordinal))
        .unwrap_or_else(|| ordinal.to_string())
}

/// Single panel standing for an undivided figure
pub fn whole_figure_panel(expected: Option<&Panel>) -> Panel {
    let mut panel = match expected {
        Some(stub) => Panel {
            panel_label: clean_label(&stub.panel_label),
            panel_bbox: None,
            confidence: None,
            ..stub.clone()
        },
        None => Panel::stub(WHOLE_FIGURE_LABEL, ""),
    };
    if panel.panel_label.is_empty() {
        panel.panel_label = WHOLE_FIGURE_LABEL.to_string();
    }
    panel.origin = PanelOrigin::WholeFigure;
    panel
}
