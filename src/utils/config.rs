//! Configuration management
//!
//! Provides unified configuration for the sketch-to-map pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Target modality of the translation.
///
/// Selects both the sketch encoding (RGB vs grayscale) and the number of
/// output channels the generator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MapType {
    /// Surface-normal maps: 3-channel RGB sketch in, 3-channel map out.
    Normal,
    /// Depth maps: 1-channel grayscale sketch in, 1-channel map out.
    Depth,
}

impl MapType {
    /// Sketch channels fed to the generator.
    pub fn in_channels(&self) -> i64 {
        match self {
            MapType::Normal => 3,
            MapType::Depth => 1,
        }
    }

    /// Map channels produced by the generator.
    pub fn out_channels(&self) -> i64 {
        match self {
            MapType::Normal => 3,
            MapType::Depth => 1,
        }
    }
}

impl std::fmt::Display for MapType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapType::Normal => write!(f, "normal"),
            MapType::Depth => write!(f, "depth"),
        }
    }
}

impl std::str::FromStr for MapType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(MapType::Normal),
            "depth" => Ok(MapType::Depth),
            other => Err(Error::Configuration(format!(
                "unknown map type '{}', expected 'normal' or 'depth'",
                other
            ))),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data configuration
    pub data: DataConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Training configuration
    pub training: TrainingConfigFile,
}

/// Data-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory with input sketches (PNG)
    pub input_dir: String,
    /// Directory with target maps (EXR)
    pub target_dir: String,
    /// Target modality
    pub map_type: MapType,
    /// Square image size sketches and maps are resized to
    pub image_size: u32,
    /// Batch size
    pub batch_size: usize,
    /// Fraction of paired samples held out for validation
    pub val_fraction: f64,
}

/// Model-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base filters for the generator encoder
    pub gen_base_filters: i64,
    /// Base filters for the critic
    pub critic_base_filters: i64,
    /// Dropout rate for the critic
    pub dropout: f64,
}

/// Training-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfigFile {
    /// Number of epochs
    pub epochs: usize,
    /// Learning rate shared by both RMSprop optimizers
    pub lr: f64,
    /// Critic updates per generator update
    pub n_critic: usize,
    /// Weight of the pixelwise L1 term in the generator loss
    pub weight_l1: f64,
    /// Coefficient of the gradient penalty in the critic loss
    pub gradient_penalty_coefficient: f64,
    /// Checkpoint save frequency (epochs)
    pub checkpoint_every: usize,
    /// Checkpoint directory
    pub checkpoint_dir: String,
    /// Directory for validation grids and other run artifacts
    pub output_dir: String,
    /// Directory for run logs and the metrics CSV
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Device: "cpu" or "cuda"
    pub device: String,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                input_dir: "datasets/sketches".to_string(),
                target_dir: "datasets/maps".to_string(),
                map_type: MapType::Normal,
                image_size: 256,
                batch_size: 4,
                val_fraction: 0.1,
            },
            model: ModelConfig {
                gen_base_filters: 64,
                critic_base_filters: 64,
                dropout: 0.3,
            },
            training: TrainingConfigFile {
                epochs: 10,
                lr: 2e-5,
                n_critic: 5,
                weight_l1: 500.0,
                gradient_penalty_coefficient: 10.0,
                checkpoint_every: 5,
                checkpoint_dir: "checkpoints".to_string(),
                output_dir: "output".to_string(),
                log_dir: default_log_dir(),
                device: "cpu".to_string(),
            },
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Configuration(format!("invalid config file {}: {}", path, e)))?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get device from configuration
    pub fn get_device(&self) -> tch::Device {
        match self.training.device.to_lowercase().as_str() {
            "cuda" | "gpu" => {
                if tch::Cuda::is_available() {
                    tch::Device::Cuda(0)
                } else {
                    tracing::warn!("CUDA requested but not available, falling back to CPU");
                    tch::Device::Cpu
                }
            }
            _ => tch::Device::Cpu,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.training.lr <= 0.0 {
            return Err(Error::Configuration(format!(
                "learning rate must be > 0, got {}",
                self.training.lr
            )));
        }
        if self.data.batch_size == 0 {
            return Err(Error::Configuration("batch size must be > 0".to_string()));
        }
        if self.training.epochs == 0 {
            return Err(Error::Configuration(
                "number of epochs must be > 0".to_string(),
            ));
        }
        if self.training.n_critic == 0 {
            return Err(Error::Configuration("n_critic must be >= 1".to_string()));
        }
        if self.training.gradient_penalty_coefficient < 0.0 {
            return Err(Error::Configuration(
                "gradient penalty coefficient must be >= 0".to_string(),
            ));
        }
        if self.data.image_size == 0 || self.data.image_size % 16 != 0 {
            return Err(Error::Configuration(format!(
                "image size must be a positive multiple of 16, got {}",
                self.data.image_size
            )));
        }
        // Zero would leave the validation split empty and only fail after a
        // full epoch of compute
        if self.data.val_fraction <= 0.0 || self.data.val_fraction >= 1.0 {
            return Err(Error::Configuration(format!(
                "val fraction must be in (0, 1), got {}",
                self.data.val_fraction
            )));
        }
        if self.data.input_dir.is_empty() {
            return Err(Error::Configuration("input directory not given".to_string()));
        }
        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Config::default().model
    }
}

/// Create default configuration file if it doesn't exist
pub fn ensure_config_exists(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        if path.ends_with(".toml") {
            Config::from_toml(path)
        } else {
            Config::from_json(path)
        }
    } else {
        let config = Config::default();
        if path.ends_with(".toml") {
            config.save_toml(path)?;
        } else {
            config.save_json(path)?;
        }
        Ok(config)
    }
}
