//! Pipeline configuration
//!
//! **Resolution order:**
//! 1. `--config` command-line argument
//! 2. `SODA_CONFIG` environment variable
//! 3. `<config_dir>/soda-curate/config.toml`
//! 4. Built-in defaults
//!
//! Scalar environment overrides (`SODA_MAX_WORKERS`, `SODA_MAX_ATTEMPTS`,
//! `SODA_CONFIDENCE_THRESHOLD`) are applied on top of whichever source won.
//! The resulting value is handed to each component explicitly.

use crate::error::{CurationError, CurationResult};
use serde::Deserialize;
use soda_common::config::{env_override, load_toml_file, resolve_config_file, LoggingConfig};
use std::time::Duration;
use tracing::{debug, info};

pub const APP_NAME: &str = "soda-curate";

/// Panel detector parameters passed through to the model
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    /// Detections scoring below this are discarded
    pub confidence_threshold: f64,
    /// Overlapping detections above this IoU are suppressed
    pub iou_threshold: f64,
    pub max_detections: usize,
    /// Square input size the model resizes to
    pub image_size: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.1,
            max_detections: 30,
            image_size: 512,
        }
    }
}

/// Reconciler thresholds
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Label matches scoring below this are treated as unmatched
    pub min_match_score: f64,
    /// Panels whose boxes overlap at least this much are reported as duplicates
    pub duplicate_iou_threshold: f64,
    /// Fraction of mean box height within which two boxes share a row
    pub row_tolerance: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            min_match_score: 0.0,
            duplicate_iou_threshold: 0.8,
            row_tolerance: 0.5,
        }
    }
}

/// Bounded retry and timeout budget for verifier-gated steps
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Budget for a single completion call
    pub completion_timeout_ms: u64,
    /// Total backoff budget for transient failures within one attempt
    pub transient_max_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            completion_timeout_ms: 60_000,
            transient_max_wait_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}

/// Figure-level parallelism
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    pub max_concurrent_figures: usize,
    pub event_capacity: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrent_figures: 4,
            event_capacity: 100,
        }
    }
}

/// Completion request parameters
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.1,
            max_tokens: 2048,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CurationConfig {
    pub detection: DetectionConfig,
    pub reconcile: ReconcileConfig,
    pub retry: RetryConfig,
    pub workflow: WorkflowConfig,
    pub completion: CompletionConfig,
    pub logging: LoggingConfig,
}

impl CurationConfig {
    /// Resolve, load, override and validate the configuration
    ///
    /// # Arguments
    /// * `cli_path` - Value of the `--config` argument, if given
    pub fn load(cli_path: Option<&str>) -> CurationResult<Self> {
        let mut config = match resolve_config_file(
            cli_path,
            soda_common::config::CONFIG_ENV_VAR,
            APP_NAME,
        )? {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                load_toml_file::<CurationConfig>(&path)?
            }
            None => {
                debug!("No configuration file found, using built-in defaults");
                CurationConfig::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no env overrides)
    pub fn from_toml_str(content: &str) -> CurationResult<Self> {
        let config: CurationConfig = toml::from_str(content)
            .map_err(|e| CurationError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply scalar environment overrides
    pub fn apply_env_overrides(&mut self) -> CurationResult<()> {
        if let Some(workers) = env_override::<usize>("SODA_MAX_WORKERS")? {
            self.workflow.max_concurrent_figures = workers;
        }
        if let Some(attempts) = env_override::<u32>("SODA_MAX_ATTEMPTS")? {
            self.retry.max_attempts = attempts;
        }
        if let Some(threshold) = env_override::<f64>("SODA_CONFIDENCE_THRESHOLD")? {
            self.detection.confidence_threshold = threshold;
        }
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> CurationResult<()> {
        check_unit("detection.confidence_threshold", self.detection.confidence_threshold)?;
        check_unit("detection.iou_threshold", self.detection.iou_threshold)?;
        check_unit("reconcile.min_match_score", self.reconcile.min_match_score)?;
        check_unit(
            "reconcile.duplicate_iou_threshold",
            self.reconcile.duplicate_iou_threshold,
        )?;
        if !(self.reconcile.row_tolerance.is_finite() && self.reconcile.row_tolerance > 0.0) {
            return Err(CurationError::Config(
                "reconcile.row_tolerance must be positive".to_string(),
            ));
        }
        if self.detection.max_detections == 0 {
            return Err(CurationError::Config(
                "detection.max_detections must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(CurationError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.workflow.max_concurrent_figures == 0 {
            return Err(CurationError::Config(
                "workflow.max_concurrent_figures must be at least 1".to_string(),
            ));
        }
        self.logging.validate()?;
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> CurationResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CurationError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_detector_conventions() {
        let config = CurationConfig::default();
        assert_eq!(config.detection.confidence_threshold, 0.25);
        assert_eq!(config.detection.iou_threshold, 0.1);
        assert_eq!(config.detection.max_detections, 30);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CurationConfig::from_toml_str(
            r#"
            [detection]
            confidence_threshold = 0.4

            [workflow]
            max_concurrent_figures = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.detection.confidence_threshold, 0.4);
        assert_eq!(config.detection.iou_threshold, 0.1);
        assert_eq!(config.workflow.max_concurrent_figures, 2);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let result = CurationConfig::from_toml_str("[detection]\nconfidence_threshold = 1.5\n");
        assert!(matches!(result, Err(CurationError::Config(_))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = CurationConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let result = CurationConfig::from_toml_str("[logging]\nlevel = \"loud\"\n");
        assert!(result.is_err());
    }
}
