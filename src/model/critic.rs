//! Critic network (Wasserstein discriminator)
//!
//! Scores how real a joint sketch+map pair looks. The output is an unbounded
//! real score, not a probability: the Wasserstein formulation uses no sigmoid.

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

/// Critic network configuration
#[derive(Debug, Clone)]
pub struct CriticConfig {
    /// Sketch channels
    pub in_channels: i64,
    /// Map channels (the critic scores the concatenated pair)
    pub out_channels: i64,
    /// Base number of filters
    pub base_filters: i64,
    /// Dropout rate
    pub dropout: f64,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            out_channels: 3,
            base_filters: 64,
            dropout: 0.3,
        }
    }
}

/// Wasserstein critic
///
/// Architecture:
/// 1. Four stride-2 Conv2d stages with LeakyReLU and Dropout.
///    No normalization layers: the gradient penalty constrains the critic
///    per sample, and batch norm would couple samples within a batch.
/// 2. Adaptive average pooling and a Dense layer producing one scalar.
#[derive(Debug)]
pub struct Critic {
    config: CriticConfig,
    conv1: nn::Conv2D,
    conv2: nn::Conv2D,
    conv3: nn::Conv2D,
    conv4: nn::Conv2D,
    fc: nn::Linear,
}

impl Critic {
    /// Create a new Critic network
    pub fn new(vs: &nn::Path, config: CriticConfig) -> Self {
        let base = config.base_filters;

        let conv_config = nn::ConvConfig {
            stride: 2,
            padding: 1,
            ..Default::default()
        };

        let joint_channels = config.in_channels + config.out_channels;
        let conv1 = nn::conv2d(vs / "conv1", joint_channels, base, 4, conv_config);
        let conv2 = nn::conv2d(vs / "conv2", base, base * 2, 4, conv_config);
        let conv3 = nn::conv2d(vs / "conv3", base * 2, base * 4, 4, conv_config);
        let conv4 = nn::conv2d(vs / "conv4", base * 4, base * 8, 4, conv_config);

        let fc = nn::linear(vs / "fc", base * 8, 1, Default::default());

        Self {
            config,
            conv1,
            conv2,
            conv3,
            conv4,
            fc,
        }
    }

    /// Forward pass on a joint sketch+map tensor
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor of shape (batch, in_channels + out_channels, H, W)
    /// * `train` - Whether in training mode (affects dropout)
    ///
    /// # Returns
    ///
    /// Tensor of shape (batch, 1) with unbounded scores
    pub fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let x = self.conv1.forward(input).leaky_relu();
        let x = x.dropout(self.config.dropout, train);

        let x = self.conv2.forward(&x).leaky_relu();
        let x = x.dropout(self.config.dropout, train);

        let x = self.conv3.forward(&x).leaky_relu();
        let x = x.dropout(self.config.dropout, train);

        let x = self.conv4.forward(&x).leaky_relu();

        // Pool to 1x1 so the head is independent of the image size
        let x = x.adaptive_avg_pool2d([1, 1]);
        let batch_size = x.size()[0];
        let x = x.view([batch_size, -1]);

        self.fc.forward(&x)
    }

    /// Score a sketch/map pair by concatenating along the channel axis.
    pub fn forward_pair(&self, sketch: &Tensor, map: &Tensor, train: bool) -> Tensor {
        let joint = Tensor::cat(&[sketch.shallow_clone(), map.shallow_clone()], 1);
        self.forward_t(&joint, train)
    }

    /// Get configuration
    pub fn config(&self) -> &CriticConfig {
        &self.config
    }
}

impl ModuleT for Critic {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        Critic::forward_t(self, xs, train)
    }
}
