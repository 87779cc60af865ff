use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use rs_frcnn_pipeline::pipeline::frcnn_pipeline::config::PipelineConfig;
use rs_frcnn_pipeline::pipeline::frcnn_pipeline::pipeline::{check_training_inputs, FrcnnPipeline};

/// Fast R-CNN training input preparation
#[derive(Debug, Parser)]
#[command(author, version, about = "Fast R-CNN ROI generation and trainer input export", long_about = None)]
struct Cli {
    /// JSON configuration file; built-in grocery settings when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the image directory
    #[arg(long, global = true)]
    img_dir: Option<PathBuf>,

    /// Override the stage-1 roi directory
    #[arg(long, global = true)]
    roi_dir: Option<PathBuf>,

    /// Override the trainer input directory
    #[arg(long, global = true)]
    cntk_files_dir: Option<PathBuf>,

    /// Log and skip images that fail instead of aborting
    #[arg(long, global = true)]
    skip_failed: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate candidate rois for every image
    GenerateRois,
    /// Write the trainer input files of every image set
    Export {
        /// Remove the cached roidb before exporting
        #[arg(long)]
        clear_cache: bool,
    },
    /// Verify that the trainer input files of an image set exist
    CheckInputs {
        #[arg(long, default_value = "train")]
        image_set: String,
    },
    /// Print the effective configuration as JSON
    PrintConfig,
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::new(),
    };
    if let Some(dir) = &cli.img_dir {
        config.img_dir = dir.clone();
    }
    if let Some(dir) = &cli.roi_dir {
        config.roi_dir = dir.clone();
    }
    if let Some(dir) = &cli.cntk_files_dir {
        config.cntk_files_dir = dir.clone();
    }
    if cli.skip_failed {
        config.skip_failed_images = true;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;

    match &cli.command {
        Command::GenerateRois => {
            let pipeline = FrcnnPipeline::new(config).context("invalid configuration")?;
            let summary = pipeline.generate_rois().context("roi generation failed")?;
            info!(
                processed = summary.processed,
                skipped = summary.skipped,
                dir = %pipeline.config().roi_dir.display(),
                "roi generation done"
            );
        }
        Command::Export { clear_cache } => {
            let pipeline = FrcnnPipeline::new(config).context("invalid configuration")?;
            if *clear_cache {
                pipeline.clear_cache().context("clearing roidb cache")?;
            }
            let outputs = pipeline.export().context("export failed")?;
            for (paths, summary) in outputs {
                info!(
                    images = %paths.images.display(),
                    processed = summary.processed,
                    skipped = summary.skipped,
                    "image set exported"
                );
            }
        }
        Command::CheckInputs { image_set } => {
            if !config.image_sets.iter().any(|s| &s.name == image_set) {
                return Err(anyhow!("unknown image set {image_set}"));
            }
            let paths = check_training_inputs(&config.cntk_files_dir, image_set)?;
            info!(images = %paths.images.display(), "trainer inputs present");
        }
        Command::PrintConfig => {
            let json = serde_json::to_string_pretty(&config).context("serializing config")?;
            println!("{json}");
        }
    }
    Ok(())
}
