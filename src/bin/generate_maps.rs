//! Generate maps from sketches with a trained model.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use sketch2map::utils::config::ModelConfig;
use sketch2map::utils::read_checkpoint_meta;
use sketch2map::{
    find_latest_checkpoint, load_checkpoint, run_inference, DataLoader, MapDataset, MapGan,
    MapType,
};

#[derive(Parser, Debug)]
#[command(name = "generate_maps")]
#[command(about = "Translate sketches into normal or depth maps with a trained model")]
struct Args {
    /// Directory with input sketches (PNG)
    #[arg(long)]
    input_dir: PathBuf,

    /// Optional directory with ground-truth maps for comparison images
    #[arg(long)]
    target_dir: Option<PathBuf>,

    /// Directory the generated maps are written to
    #[arg(long, default_value = "generated")]
    output_dir: PathBuf,

    /// Checkpoint directory to load from; the latest checkpoint is used
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: String,

    /// Load this specific checkpoint instead of the latest one
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Target modality, must match the trained model
    #[arg(long, value_enum, default_value_t = MapType::Normal)]
    map_type: MapType,

    /// Square image size (multiple of 16)
    #[arg(long, default_value_t = 256)]
    image_size: u32,

    /// Batch size
    #[arg(long, default_value_t = 4)]
    batch_size: usize,

    /// Base filters for the generator, must match the trained model
    #[arg(long, default_value_t = 64)]
    gen_base_filters: i64,

    /// Base filters for the critic, must match the trained model
    #[arg(long, default_value_t = 64)]
    critic_base_filters: i64,

    /// Use CUDA if available
    #[arg(long)]
    gpu: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();

    let device = if args.gpu && tch::Cuda::is_available() {
        tch::Device::Cuda(0)
    } else {
        tch::Device::Cpu
    };
    info!("Using device: {:?}", device);

    let checkpoint = match args.checkpoint {
        Some(path) => path,
        None => find_latest_checkpoint(&args.checkpoint_dir)?
            .with_context(|| format!("no checkpoint found in {}", args.checkpoint_dir))?,
    };

    let meta = read_checkpoint_meta(&checkpoint)?;
    if meta.map_type != args.map_type.to_string() {
        bail!(
            "checkpoint was trained for '{}' maps but '{}' was requested",
            meta.map_type,
            args.map_type
        );
    }

    let model_config = ModelConfig {
        gen_base_filters: args.gen_base_filters,
        critic_base_filters: args.critic_base_filters,
        dropout: 0.0,
    };
    let mut gan = MapGan::from_config(&model_config, args.map_type, device);
    load_checkpoint(&mut gan, &checkpoint)
        .with_context(|| format!("failed to load checkpoint {}", checkpoint.display()))?;
    info!("Loaded checkpoint {}", checkpoint.display());

    let dataset = match &args.target_dir {
        Some(target_dir) => {
            MapDataset::paired(&args.input_dir, target_dir, args.map_type, args.image_size)?
        }
        None => MapDataset::input_only(&args.input_dir, args.map_type, args.image_size)?,
    };
    info!("Translating {} sketches", dataset.len());

    let mut loader = DataLoader::new(dataset, args.batch_size, false, false);
    let summary = run_inference(&gan, &mut loader, &args.output_dir, device)?;

    info!(
        "Wrote {} maps to {}",
        summary.written.len(),
        args.output_dir.display()
    );
    if !summary.all_ok() {
        for (path, reason) in &summary.failures {
            warn!("{}: {}", path.display(), reason);
        }
        bail!("{} sketches could not be translated", summary.failures.len());
    }

    Ok(())
}
