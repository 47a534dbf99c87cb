//! soda-curate - figure/panel/source-data curation
//!
//! Runs a JSON job description through the curation pipeline and writes the
//! structured manuscript record as JSON.
//!
//! Usage: `soda-curate --job job.json [--config config.toml] [--output out.json]`

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use soda_curate::config::CurationConfig;
use soda_curate::models::{DataSource, Detection};
use soda_curate::reconcile::PanelReconciler;
use soda_curate::segmentation::CaptionSegmenter;
use soda_curate::workflow::{FigureWorkflow, ManuscriptInput, ManuscriptOrchestrator};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for soda-curate
#[derive(Parser, Debug)]
#[command(name = "soda-curate")]
#[command(about = "Reconcile figure captions, panel regions and source data")]
#[command(version)]
struct Args {
    /// Job description (JSON)
    #[arg(short, long)]
    job: PathBuf,

    /// Configuration file (TOML); falls back to SODA_CONFIG, then the user config dir
    #[arg(short, long)]
    config: Option<String>,

    /// Write the manuscript record here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Job file layout
#[derive(Debug, Deserialize)]
struct Job {
    manuscript_id: String,
    legends: String,
    #[serde(default)]
    expected_figure_count: usize,
    #[serde(default)]
    expected_figure_labels: Vec<String>,
    #[serde(default)]
    figures: Vec<JobFigure>,
    #[serde(default)]
    source_files: Vec<String>,
    #[serde(default)]
    data_sources: Vec<DataSource>,
}

#[derive(Debug, Deserialize)]
struct JobFigure {
    figure_label: String,
    /// Relative to the job file
    image_path: Option<String>,
    expected_panel_count: Option<usize>,
    /// Stand-in for the detection model
    detections: Option<Vec<Detection>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = CurationConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting soda-curate v{}", env!("CARGO_PKG_VERSION"));

    let job_text = tokio::fs::read_to_string(&args.job)
        .await
        .with_context(|| format!("Failed to read job file {}", args.job.display()))?;
    let job: Job = serde_json::from_str(&job_text)
        .with_context(|| format!("Failed to parse job file {}", args.job.display()))?;
    let job_dir = args.job.parent().unwrap_or_else(|| Path::new("."));
    let input = build_input(job, job_dir);

    let workflow = FigureWorkflow::new(
        CaptionSegmenter::new(config.retry.clone()),
        PanelReconciler::new(config.reconcile.clone()),
    )
    .with_detection_params(config.detection.clone());
    let orchestrator = ManuscriptOrchestrator::new(workflow, config);

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling remaining figures");
            ctrl_c_token.cancel();
        }
    });

    let run = orchestrator.run(input, cancel).await;
    let json = run
        .manuscript
        .to_json_pretty()
        .context("Failed to serialize manuscript record")?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Manuscript record written");
        }
        None => println!("{}", json),
    }

    info!(
        figures = run.summary.total_figures,
        successes = run.summary.successes,
        warnings = run.summary.warnings,
        failures = run.summary.failures,
        elapsed_ms = run.summary.duration_ms,
        "Done"
    );
    Ok(())
}

/// Turn the job description into orchestrator input
///
/// Unreadable images are logged and skipped; the figure then runs without one.
fn build_input(job: Job, job_dir: &Path) -> ManuscriptInput {
    let mut input = ManuscriptInput {
        manuscript_id: job.manuscript_id,
        legends: job.legends,
        expected_figure_count: job.expected_figure_count,
        expected_figure_labels: job.expected_figure_labels,
        source_files: job.source_files,
        data_sources: job.data_sources,
        ..Default::default()
    };

    for figure in job.figures {
        let label = figure.figure_label;
        if let Some(count) = figure.expected_panel_count {
            input.expected_panel_counts.insert(label.clone(), count);
        }
        if let Some(detections) = figure.detections {
            input.detections.insert(label.clone(), detections);
        }
        if let Some(relative) = figure.image_path {
            match image::open(job_dir.join(&relative)) {
                Ok(image) => {
                    input.images.insert(label.clone(), image);
                }
                Err(e) => warn!(figure_label = %label, path = %relative, error = %e, "Failed to open figure image"),
            }
            input.image_paths.insert(label, relative);
        }
    }
    input
}
