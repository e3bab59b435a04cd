//! BiSeNet Cityscapes training
//!
//! Trains with one data-parallel replica per device, saves `model_final.mpk` in the
//! output directory and then scores it on the validation split.
//!
//! ## Usage
//!
//! ```bash
//! # Default recipe on the CPU backend
//! cargo run --release --bin train -- --data ./data
//!
//! # Four CUDA devices, checkpoint every 5000 iterations
//! cargo run --release --bin train --features cuda --no-default-features -- \
//!     --devices 0-3 --checkpoint-interval 5000
//!
//! # Pick up the most recent checkpoint
//! cargo run --release --bin train -- --resume latest
//! ```

use std::{path::PathBuf, str::FromStr};

use anyhow::{ensure, Context, Result};
use bisenet_burn::{
    dataset::CityscapesDataset,
    evaluation::{evaluate, MscEvalConfig},
    training::{train, Resume, TrainingConfig},
    Split,
};
use bisenet_demos::{
    create_devices, get_backend_name, parse_device_indices, setup_logger, TrainingBackend,
};
use burn::{config::Config, module::AutodiffModule};
use clap::Parser;

/// `--resume` value: an iteration number or `latest`.
#[derive(Debug, Clone, Copy)]
struct ResumeArg(Resume);

impl FromStr for ResumeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Self(Resume::Latest));
        }
        s.parse()
            .map(|iteration| Self(Resume::Iteration(iteration)))
            .map_err(|_| format!("expected an iteration or 'latest', got '{s}'"))
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Training configuration (JSON). Defaults to the standard Cityscapes recipe.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cityscapes root containing `leftImg8bit/` and `gtFine/`
    #[arg(long)]
    data: Option<PathBuf>,

    /// Directory for logs, checkpoints and the final model
    #[arg(short, long, default_value = "./res")]
    output: PathBuf,

    /// Devices to train on, e.g. `0`, `0,1` or `0-3`
    #[arg(long, default_value = "0")]
    devices: String,

    /// Override the number of iterations
    #[arg(long)]
    max_iter: Option<usize>,

    /// Override the number of images per device
    #[arg(long)]
    n_img_per_device: Option<usize>,

    /// Save a checkpoint every N iterations
    #[arg(long)]
    checkpoint_interval: Option<usize>,

    /// Resume from a checkpoint iteration or `latest`
    #[arg(long)]
    resume: Option<ResumeArg>,

    /// torchvision ResNet weights for the context path
    #[cfg(feature = "pretrained")]
    #[arg(long)]
    pretrained: Option<PathBuf>,

    /// Skip the validation run after training
    #[arg(long)]
    skip_eval: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let logger = setup_logger(Some(args.output.as_path()))?;

    let mut config = match &args.config {
        Some(path) => TrainingConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TrainingConfig::new(),
    };
    if let Some(root) = args.data {
        config.dataset.root = root;
    }
    if let Some(max_iter) = args.max_iter {
        config.scheduler.max_iter = max_iter;
    }
    if let Some(n_img) = args.n_img_per_device {
        config.n_img_per_device = n_img;
    }
    if args.checkpoint_interval.is_some() {
        config.checkpoint_interval = args.checkpoint_interval;
    }
    #[cfg(feature = "pretrained")]
    if args.pretrained.is_some() {
        config.pretrained_backbone = args.pretrained;
    }

    let indices = parse_device_indices(&args.devices).map_err(anyhow::Error::msg)?;
    let devices = create_devices(&indices);
    ensure!(!devices.is_empty(), "No device selected");

    tracing::info!(
        backend = get_backend_name(),
        devices = ?indices,
        log_file = ?logger.log_file,
        "BiSeNet training"
    );

    let resume = args.resume.map_or(Resume::No, |r| r.0);
    let model = train::<TrainingBackend>(&config, &devices, &args.output, resume)
        .context("Training failed")?;

    if args.skip_eval {
        return Ok(());
    }

    tracing::info!("evaluating the final model");
    let dataset = CityscapesDataset::new(&config.dataset, &Split::Val)
        .context("Failed to load the validation split")?;
    let report = evaluate(&model.valid(), dataset, &MscEvalConfig::new(), &devices[0])
        .context("Evaluation failed")?;

    let report_path = args.output.join("eval.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    tracing::info!(path = %report_path.display(), "evaluation report written");

    Ok(())
}
