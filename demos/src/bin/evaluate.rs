//! Multi-scale evaluation of a trained BiSeNet on the Cityscapes validation split.
//!
//! ```bash
//! cargo run --release --bin evaluate -- --model ./res/model_final.mpk --data ./data
//!
//! # Single scale, no flip
//! cargo run --release --bin evaluate -- --model ./res/model_final.mpk --scales 1.0 --no-flip
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use bisenet_burn::{
    dataset::CityscapesDataset,
    evaluation::{evaluate, MscEvalConfig},
    export::load_model,
    training::TrainingConfig,
    Split,
};
use bisenet_demos::{create_devices, get_backend_name, setup_logger, SelectedBackend};
use burn::config::Config;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Trained weights (`.mpk`, `-f16.mpk` or `.bin`)
    #[arg(short, long)]
    model: PathBuf,

    /// Training configuration; defaults to `config.json` next to the weights
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cityscapes root, overriding the configuration
    #[arg(long)]
    data: Option<PathBuf>,

    /// Split to score
    #[arg(long, default_value = "val")]
    split: String,

    /// Scales to average over
    #[arg(long, value_delimiter = ',')]
    scales: Option<Vec<f32>>,

    /// Disable flip averaging
    #[arg(long)]
    no_flip: bool,

    /// Sliding window side
    #[arg(long, default_value = "1024")]
    crop_size: usize,

    /// Device index
    #[arg(long, default_value = "0")]
    device: usize,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _logger = setup_logger(None)?;

    let config_path = args.config.clone().or_else(|| {
        let sibling = args.model.parent()?.join("config.json");
        sibling.is_file().then_some(sibling)
    });
    let mut config = match &config_path {
        Some(path) => TrainingConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TrainingConfig::new(),
    };
    if let Some(root) = args.data {
        config.dataset.root = root;
    }

    let split = match args.split.as_str() {
        "train" => Split::Train,
        "val" => Split::Val,
        "test" => Split::Test,
        other => anyhow::bail!("Unknown split '{other}' (expected train, val or test)"),
    };

    let mut eval_config = MscEvalConfig::new()
        .with_flip(!args.no_flip)
        .with_crop_size(args.crop_size);
    if let Some(scales) = args.scales {
        eval_config.scales = scales;
    }

    let device = create_devices(&[args.device])
        .pop()
        .context("No device available")?;
    tracing::info!(backend = get_backend_name(), model = %args.model.display(), "evaluating");

    let model = load_model::<SelectedBackend>(&config.model, &args.model, &device)
        .context("Failed to load model")?;
    let dataset = CityscapesDataset::new(&config.dataset, &split)
        .with_context(|| format!("Failed to load the {split:?} split"))?;
    let report =
        evaluate(&model, dataset, &eval_config, &device).context("Evaluation failed")?;

    let json = serde_json::to_string_pretty(&report)?;
    match args.output {
        Some(path) => std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    Ok(())
}
