//! Model module containing the adversarial pair
//!
//! This module provides:
//! - U-Net Generator translating sketches into maps
//! - Wasserstein Critic scoring joint sketch/map pairs
//! - MapGan wrapper owning both variable stores

pub mod critic;
pub mod gan;
pub mod generator;

pub use critic::{Critic, CriticConfig};
pub use gan::MapGan;
pub use generator::{Generator, GeneratorConfig};
