//! # sketch2map
//!
//! Image-to-image translation from line sketches to surface-normal or depth
//! maps, trained with a Wasserstein GAN with gradient penalty (WGAN-GP).
//!
//! ## Modules
//!
//! - `data`: paired sketch/map datasets, batching and prefetching
//! - `model`: U-Net generator and Wasserstein critic
//! - `training`: adversarial training loop, losses and metrics
//! - `inference`: forward-only map generation from trained models
//! - `utils`: configuration and checkpointing

pub mod data;
pub mod error;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use data::{Batch, DataLoader, MapDataset, Sample};
pub use error::{Error, Result};
pub use inference::{run_inference, InferenceSummary, SketchMapper};
pub use model::{Critic, Generator, MapGan};
pub use training::{MetricSink, Trainer, TrainerConfig, TrainingMetrics};
pub use utils::{find_latest_checkpoint, load_checkpoint, save_checkpoint, Config, MapType};
