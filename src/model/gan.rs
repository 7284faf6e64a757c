//! Model wrapper combining Generator and Critic
//!
//! Owns the two variable stores so generator-only and critic-only optimizer
//! steps stay independent, and provides save/load for both networks.

use tch::{nn, nn::OptimizerConfig, nn::VarStore, Device, Tensor};

use super::critic::{Critic, CriticConfig};
use super::generator::{Generator, GeneratorConfig};
use crate::error::Result;
use crate::utils::{MapType, ModelConfig};

/// Complete sketch-to-map GAN
pub struct MapGan {
    /// Generator network
    pub generator: Generator,
    /// Critic network
    pub critic: Critic,
    /// Variable store for generator
    pub gen_vs: VarStore,
    /// Variable store for critic
    pub critic_vs: VarStore,
    /// Device (CPU/GPU)
    pub device: Device,
    map_type: MapType,
}

impl MapGan {
    /// Create a new model pair
    pub fn new(
        gen_config: GeneratorConfig,
        critic_config: CriticConfig,
        map_type: MapType,
        device: Device,
    ) -> Self {
        let gen_vs = VarStore::new(device);
        let critic_vs = VarStore::new(device);

        let generator = Generator::new(&gen_vs.root(), gen_config);
        let critic = Critic::new(&critic_vs.root(), critic_config);

        Self {
            generator,
            critic,
            gen_vs,
            critic_vs,
            device,
            map_type,
        }
    }

    /// Create a model pair sized by [`ModelConfig`] for the given modality.
    pub fn from_config(model: &ModelConfig, map_type: MapType, device: Device) -> Self {
        let gen_config = GeneratorConfig {
            in_channels: map_type.in_channels(),
            out_channels: map_type.out_channels(),
            base_filters: model.gen_base_filters,
        };
        let critic_config = CriticConfig {
            in_channels: map_type.in_channels(),
            out_channels: map_type.out_channels(),
            base_filters: model.critic_base_filters,
            dropout: model.dropout,
        };
        Self::new(gen_config, critic_config, map_type, device)
    }

    /// Predict maps for a batch of sketches (inference mode, no gradients).
    pub fn predict(&self, sketches: &Tensor) -> Tensor {
        tch::no_grad(|| self.generator.generate(sketches))
    }

    /// Generator optimizer (RMSprop, as in the WGAN recipe)
    pub fn gen_optimizer(&self, lr: f64) -> Result<nn::Optimizer> {
        Ok(nn::RmsProp::default().build(&self.gen_vs, lr)?)
    }

    /// Critic optimizer (RMSprop)
    pub fn critic_optimizer(&self, lr: f64) -> Result<nn::Optimizer> {
        Ok(nn::RmsProp::default().build(&self.critic_vs, lr)?)
    }

    /// Save both networks
    pub fn save(&self, gen_path: &str, critic_path: &str) -> Result<()> {
        self.gen_vs.save(gen_path)?;
        self.critic_vs.save(critic_path)?;
        Ok(())
    }

    /// Load both networks
    pub fn load(&mut self, gen_path: &str, critic_path: &str) -> Result<()> {
        self.gen_vs.load(gen_path)?;
        self.critic_vs.load(critic_path)?;
        Ok(())
    }

    /// Get target modality
    pub fn map_type(&self) -> MapType {
        self.map_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ModelConfig {
        ModelConfig {
            gen_base_filters: 8,
            critic_base_filters: 8,
            dropout: 0.0,
        }
    }

    #[test]
    fn test_gan_creation_and_predict() {
        let gan = MapGan::from_config(&small_config(), MapType::Normal, Device::Cpu);

        let sketches = Tensor::randn([2, 3, 64, 64], (tch::Kind::Float, Device::Cpu));
        let maps = gan.predict(&sketches);

        assert_eq!(maps.size(), vec![2, 3, 64, 64]);
        assert!(!maps.requires_grad());
    }

    #[test]
    fn test_gan_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let gen_path = dir.path().join("generator.pt");
        let critic_path = dir.path().join("critic.pt");

        let gan = MapGan::from_config(&small_config(), MapType::Depth, Device::Cpu);
        gan.save(gen_path.to_str().unwrap(), critic_path.to_str().unwrap())
            .unwrap();

        let mut other = MapGan::from_config(&small_config(), MapType::Depth, Device::Cpu);
        other
            .load(gen_path.to_str().unwrap(), critic_path.to_str().unwrap())
            .unwrap();

        let input = Tensor::randn([1, 1, 64, 64], (tch::Kind::Float, Device::Cpu));
        let a = gan.predict(&input);
        let b = other.predict(&input);
        let diff: f64 = (a - b).abs().max().double_value(&[]);
        assert!(diff < 1e-6);
    }
}
