//! Training module for the sketch-to-map GAN
//!
//! This module provides:
//! - WGAN-GP loss functions (critic objective, gradient penalty, generator
//!   objective with weighted L1)
//! - Metric collection and pluggable per-step sinks
//! - The trainer running the n_critic update schedule

pub mod losses;
pub mod metrics;
pub mod trainer;

pub use metrics::{MemorySink, MetricSink, NullSink, TrainingMetrics};
pub use trainer::{StepOutput, Trainer, TrainerConfig};
