//! Train the sketch-to-map WGAN-GP.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use sketch2map::training::NullSink;
use sketch2map::utils::config::{Config, DataConfig, ModelConfig, TrainingConfigFile};
use sketch2map::{
    find_latest_checkpoint, load_checkpoint, DataLoader, MapDataset, MapGan, MapType, Trainer,
    TrainerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "train_model")]
#[command(about = "Train a WGAN-GP translating sketches into normal or depth maps")]
struct Args {
    /// Directory with input sketches (PNG)
    #[arg(long)]
    input_dir: PathBuf,

    /// Directory with target maps (EXR)
    #[arg(long)]
    target_dir: PathBuf,

    /// Target modality
    #[arg(long, value_enum, default_value_t = MapType::Normal)]
    map_type: MapType,

    /// Number of training epochs
    #[arg(long, default_value_t = 10)]
    epochs: usize,

    /// Learning rate for both optimizers
    #[arg(long, default_value_t = 2e-5)]
    lr: f64,

    /// Batch size
    #[arg(long, default_value_t = 4)]
    batch_size: usize,

    /// Critic updates per generator update
    #[arg(long, default_value_t = 5)]
    n_critic: usize,

    /// Weight of the pixelwise L1 term in the generator loss
    #[arg(long, default_value_t = 500.0)]
    weight_l1: f64,

    /// Gradient penalty coefficient
    #[arg(long, default_value_t = 10.0)]
    gradient_penalty_coefficient: f64,

    /// Fraction of samples held out for validation
    #[arg(long, default_value_t = 0.1)]
    val_fraction: f64,

    /// Square image size (multiple of 16)
    #[arg(long, default_value_t = 256)]
    image_size: u32,

    /// Base filters for the generator
    #[arg(long, default_value_t = 64)]
    gen_base_filters: i64,

    /// Base filters for the critic
    #[arg(long, default_value_t = 64)]
    critic_base_filters: i64,

    /// Critic dropout rate
    #[arg(long, default_value_t = 0.3)]
    dropout: f64,

    /// Save a checkpoint every N epochs
    #[arg(long, default_value_t = 5)]
    checkpoint_every: usize,

    /// Checkpoint directory
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: String,

    /// Output directory for validation grids
    #[arg(long, default_value = "output")]
    output_dir: String,

    /// Directory for the run log and the metrics CSV
    #[arg(long, default_value = "logs")]
    log_dir: String,

    /// Resume training, from a specific checkpoint directory when given a
    /// value and from the latest one otherwise
    #[arg(long, num_args = 0..=1)]
    resume: Option<Option<PathBuf>>,

    /// Use CUDA if available
    #[arg(long)]
    gpu: bool,

    /// Optional TOML or JSON config file; command line flags are ignored
    #[arg(long)]
    config: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        if let Some(path) = &self.config {
            let config = if path.ends_with(".toml") {
                Config::from_toml(path)?
            } else {
                Config::from_json(path)?
            };
            return Ok(config);
        }

        Ok(Config {
            data: DataConfig {
                input_dir: self.input_dir.to_string_lossy().into_owned(),
                target_dir: self.target_dir.to_string_lossy().into_owned(),
                map_type: self.map_type,
                image_size: self.image_size,
                batch_size: self.batch_size,
                val_fraction: self.val_fraction,
            },
            model: ModelConfig {
                gen_base_filters: self.gen_base_filters,
                critic_base_filters: self.critic_base_filters,
                dropout: self.dropout,
            },
            training: TrainingConfigFile {
                epochs: self.epochs,
                lr: self.lr,
                n_critic: self.n_critic,
                weight_l1: self.weight_l1,
                gradient_penalty_coefficient: self.gradient_penalty_coefficient,
                checkpoint_every: self.checkpoint_every,
                checkpoint_dir: self.checkpoint_dir,
                output_dir: self.output_dir,
                log_dir: self.log_dir,
                device: if self.gpu { "cuda" } else { "cpu" }.to_string(),
            },
        })
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let resume = args.resume.clone();
    let config = args.into_config()?;
    config.validate()?;

    std::fs::create_dir_all(&config.training.log_dir)?;
    let log_file = std::fs::File::create(Path::new(&config.training.log_dir).join("train.log"))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();

    let device = config.get_device();
    info!("Using device: {:?}", device);

    let dataset = MapDataset::paired(
        std::path::Path::new(&config.data.input_dir),
        std::path::Path::new(&config.data.target_dir),
        config.data.map_type,
        config.data.image_size,
    )
    .context("failed to build the paired dataset")?;
    info!("Loaded {} sketch/map pairs", dataset.len());

    let (train_ds, val_ds) = dataset.split(config.data.val_fraction);
    info!(
        "Split: {} training samples, {} validation samples",
        train_ds.len(),
        val_ds.len()
    );

    let mut train_loader = DataLoader::new(train_ds, config.data.batch_size, true, true);
    let mut val_loader = DataLoader::new(val_ds, config.data.batch_size, false, false);

    let mut gan = MapGan::from_config(&config.model, config.data.map_type, device);

    let trainer_config = TrainerConfig {
        epochs: config.training.epochs,
        lr: config.training.lr,
        n_critic: config.training.n_critic,
        weight_l1: config.training.weight_l1,
        gradient_penalty_coefficient: config.training.gradient_penalty_coefficient,
        checkpoint_every: config.training.checkpoint_every,
        checkpoint_dir: config.training.checkpoint_dir.clone(),
        output_dir: config.training.output_dir.clone(),
        ..Default::default()
    };
    let mut trainer = Trainer::new(trainer_config, device)?;

    let mut start_epoch = 0;
    if let Some(checkpoint) = resume {
        let checkpoint = match checkpoint {
            Some(path) => path,
            None => find_latest_checkpoint(&config.training.checkpoint_dir)?
                .context("--resume given but no checkpoint found")?,
        };
        let (epoch, metrics) = load_checkpoint(&mut gan, &checkpoint)?;
        trainer.set_metrics(metrics);
        start_epoch = epoch + 1;
        info!(
            "Resuming from {} at epoch {}",
            checkpoint.display(),
            start_epoch
        );
    }

    let metrics = trainer.train(
        &mut gan,
        &mut train_loader,
        &mut val_loader,
        start_epoch,
        &mut NullSink,
    )?;

    let metrics_path = format!("{}/metrics.csv", config.training.log_dir);
    metrics.save_csv(&metrics_path)?;
    info!("Training finished, metrics saved to {}", metrics_path);

    Ok(())
}
