use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use wbf_ensemble::config::AppConfig;
use wbf_ensemble::report::{write_overlays, write_submission_file, Overlay};
use wbf_ensemble::{Ensemble, JsonPredictor, ResolutionIndex, ScoreDampening};

#[derive(Parser)]
#[command(
    name = "wbf-ensemble",
    about = "Fuse object detections of several models with Weighted Boxes Fusion"
)]
struct Cli {
    /// YAML config file, values are overridden by WBF_* env vars and flags
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory with the input images
    #[arg(short, long)]
    images: Option<PathBuf>,

    /// Detector export (JSON), one per model
    #[arg(short, long = "predictions", value_name = "FILE")]
    predictions: Vec<PathBuf>,

    /// Submission CSV path
    #[arg(short, long)]
    submission: Option<PathBuf>,

    /// Directory for the visual overlays
    #[arg(long)]
    overlay_dir: Option<PathBuf>,

    /// Do not render overlays
    #[arg(long, conflicts_with = "overlay_dir")]
    no_overlay: bool,

    /// Cluster merge IoU threshold
    #[arg(long)]
    iou_thr: Option<f32>,

    /// Per-model score prefilter
    #[arg(long)]
    skip_box_thr: Option<f32>,

    /// Output score filter
    #[arg(long)]
    final_conf_thresh: Option<f32>,

    /// model-agreement, member-count or disabled
    #[arg(long)]
    dampening: Option<ScoreDampening>,
}

impl Cli {
    fn apply(self, config: &mut AppConfig) {
        if let Some(images) = self.images {
            config.input.image_dir = images;
        }
        if !self.predictions.is_empty() {
            config.input.predictions = self.predictions;
        }
        if let Some(submission) = self.submission {
            config.output.submission = submission;
        }
        if self.no_overlay {
            config.output.overlay_dir = None;
        } else if let Some(dir) = self.overlay_dir {
            config.output.overlay_dir = Some(dir);
        }
        if let Some(v) = self.iou_thr {
            config.fusion.iou_thr = v;
        }
        if let Some(v) = self.skip_box_thr {
            config.fusion.skip_box_thr = v;
        }
        if let Some(v) = self.final_conf_thresh {
            config.fusion.final_conf_thresh = v;
        }
        if let Some(v) = self.dampening {
            config.fusion.dampening = v;
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);

    if config.input.predictions.is_empty() {
        anyhow::bail!("no model predictions given, pass --predictions FILE at least once");
    }

    tracing::info!("fusion: {}", config.fusion);
    let ensemble = Ensemble::new(config.fusion)?;

    let index = ResolutionIndex::from_dir(&config.input.image_dir, &config.input.extensions)
        .with_context(|| format!("indexing images in {:?}", config.input.image_dir))?;

    let mut predictors = config
        .input
        .predictions
        .iter()
        .map(|path| JsonPredictor::from_file(path).with_context(|| format!("loading {:?}", path)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let report = ensemble.run(&index, &mut predictors);

    write_submission_file(&config.output.submission, &report.results)?;

    if let Some(dir) = &config.output.overlay_dir {
        let overlay = Overlay::new(config.output.overlay.clone(), config.labels.clone())
            .context("preparing overlays")?;
        if !overlay.has_font() {
            tracing::info!("no overlay font configured, captions drawn as score bars");
        }
        write_overlays(&index, &report.results, dir, &overlay)?;
    }

    for failure in &report.failures {
        tracing::error!(
            id = %failure.id,
            model = failure.model.as_deref().unwrap_or("-"),
            "image not processed: {}",
            failure.error
        );
    }

    Ok(())
}
