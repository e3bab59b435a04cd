//! Re-saves trained weights in other Burn record formats and prints model complexity.
//!
//! ```bash
//! cargo run --release --bin export -- --model ./res/model_final.mpk --output ./export
//! cargo run --release --bin export -- --model ./res/model_final.mpk --format mpk-f16
//! ```

use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use bisenet_burn::{
    export::{export_model, load_model, ExportFormat},
    stats::ModelStats,
    training::{TrainingConfig, FINAL_MODEL_STEM},
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

    /// Output directory
    #[arg(short, long, default_value = "./export")]
    output: PathBuf,

    /// Formats to write (mpk, mpk-f16, bin); all by default
    #[arg(long = "format", value_delimiter = ',')]
    formats: Vec<ExportFormat>,

    /// Output file stem
    #[arg(long, default_value = FINAL_MODEL_STEM)]
    stem: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _logger = setup_logger(None)?;

    let config_path = args.config.clone().or_else(|| {
        let sibling = args.model.parent()?.join("config.json");
        sibling.is_file().then_some(sibling)
    });
    let config = match &config_path {
        Some(path) => TrainingConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TrainingConfig::new(),
    };

    let formats = if args.formats.is_empty() {
        ExportFormat::ALL.to_vec()
    } else {
        args.formats
    };
    ensure!(!args.stem.is_empty(), "Output stem must not be empty");

    let device = create_devices(&[0]).pop().context("No device available")?;
    tracing::info!(backend = get_backend_name(), model = %args.model.display(), "exporting");

    let model = load_model::<SelectedBackend>(&config.model, &args.model, &device)
        .context("Failed to load model")?;
    let stats = ModelStats::measure(&model, config.stats_input);
    println!("{stats}");

    let paths = export_model(&model, &args.output, &args.stem, &formats)
        .context("Failed to export model")?;
    for path in paths {
        println!("{}", path.display());
    }

    Ok(())
}
