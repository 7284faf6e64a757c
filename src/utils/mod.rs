//! Utility modules
//!
//! This module provides:
//! - Configuration management (TOML/JSON)
//! - Checkpoint save/load with epoch-consistency checks

pub mod checkpoint;
pub mod config;

pub use checkpoint::{
    find_latest_checkpoint, generator_weights_path, load_checkpoint, read_checkpoint_meta,
    save_checkpoint, CheckpointMeta,
};
pub use config::{
    ensure_config_exists, Config, DataConfig, MapType, ModelConfig, TrainingConfigFile,
};
