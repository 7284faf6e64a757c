//! Generator network
//!
//! U-Net style encoder/decoder that translates a sketch into a normal or
//! depth map. Skip connections carry edge detail from the encoder to the
//! matching decoder stage. Fully convolutional: any input size divisible by
//! 16 works.

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

/// Generator network configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Sketch channels (3 for normal-map runs, 1 for depth)
    pub in_channels: i64,
    /// Map channels produced
    pub out_channels: i64,
    /// Base number of filters in the first encoder stage
    pub base_filters: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            out_channels: 3,
            base_filters: 64,
        }
    }
}

/// U-Net generator
///
/// Architecture:
/// 1. Four stride-2 Conv2d encoder stages (LeakyReLU, BatchNorm after the first)
/// 2. Four stride-2 ConvTranspose2d decoder stages with skip concatenation
/// 3. Final Tanh, output in [-1, 1]
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    enc1: nn::Conv2D,
    enc2: nn::Conv2D,
    enc3: nn::Conv2D,
    enc4: nn::Conv2D,
    enc_bn2: nn::BatchNorm,
    enc_bn3: nn::BatchNorm,
    enc_bn4: nn::BatchNorm,
    dec1: nn::ConvTranspose2D,
    dec2: nn::ConvTranspose2D,
    dec3: nn::ConvTranspose2D,
    dec4: nn::ConvTranspose2D,
    dec_bn1: nn::BatchNorm,
    dec_bn2: nn::BatchNorm,
    dec_bn3: nn::BatchNorm,
}

impl Generator {
    /// Create a new Generator network
    pub fn new(vs: &nn::Path, config: GeneratorConfig) -> Self {
        let base = config.base_filters;

        let down = nn::ConvConfig {
            stride: 2,
            padding: 1,
            ..Default::default()
        };
        // kernel 4, stride 2, padding 1 doubles the spatial size exactly
        let up = nn::ConvTransposeConfig {
            stride: 2,
            padding: 1,
            ..Default::default()
        };

        let enc1 = nn::conv2d(vs / "enc1", config.in_channels, base, 4, down);
        let enc2 = nn::conv2d(vs / "enc2", base, base * 2, 4, down);
        let enc3 = nn::conv2d(vs / "enc3", base * 2, base * 4, 4, down);
        let enc4 = nn::conv2d(vs / "enc4", base * 4, base * 8, 4, down);

        let enc_bn2 = nn::batch_norm2d(vs / "enc_bn2", base * 2, Default::default());
        let enc_bn3 = nn::batch_norm2d(vs / "enc_bn3", base * 4, Default::default());
        let enc_bn4 = nn::batch_norm2d(vs / "enc_bn4", base * 8, Default::default());

        // Decoder inputs double where a skip connection is concatenated
        let dec1 = nn::conv_transpose2d(vs / "dec1", base * 8, base * 4, 4, up);
        let dec2 = nn::conv_transpose2d(vs / "dec2", base * 8, base * 2, 4, up);
        let dec3 = nn::conv_transpose2d(vs / "dec3", base * 4, base, 4, up);
        let dec4 = nn::conv_transpose2d(vs / "dec4", base * 2, config.out_channels, 4, up);

        let dec_bn1 = nn::batch_norm2d(vs / "dec_bn1", base * 4, Default::default());
        let dec_bn2 = nn::batch_norm2d(vs / "dec_bn2", base * 2, Default::default());
        let dec_bn3 = nn::batch_norm2d(vs / "dec_bn3", base, Default::default());

        Self {
            config,
            enc1,
            enc2,
            enc3,
            enc4,
            enc_bn2,
            enc_bn3,
            enc_bn4,
            dec1,
            dec2,
            dec3,
            dec4,
            dec_bn1,
            dec_bn2,
            dec_bn3,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor of shape (batch, in_channels, H, W), H and W
    ///   divisible by 16
    /// * `train` - Whether in training mode (affects batch norm)
    ///
    /// # Returns
    ///
    /// Tensor of shape (batch, out_channels, H, W) in [-1, 1]
    pub fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let e1 = self.enc1.forward(input).leaky_relu();
        let e2 = self
            .enc_bn2
            .forward_t(&self.enc2.forward(&e1), train)
            .leaky_relu();
        let e3 = self
            .enc_bn3
            .forward_t(&self.enc3.forward(&e2), train)
            .leaky_relu();
        let e4 = self
            .enc_bn4
            .forward_t(&self.enc4.forward(&e3), train)
            .leaky_relu();

        let d1 = self
            .dec_bn1
            .forward_t(&self.dec1.forward(&e4), train)
            .relu();
        let d1 = Tensor::cat(&[d1, e3], 1);

        let d2 = self
            .dec_bn2
            .forward_t(&self.dec2.forward(&d1), train)
            .relu();
        let d2 = Tensor::cat(&[d2, e2], 1);

        let d3 = self
            .dec_bn3
            .forward_t(&self.dec3.forward(&d2), train)
            .relu();
        let d3 = Tensor::cat(&[d3, e1], 1);

        self.dec4.forward(&d3).tanh()
    }

    /// Predict a map (inference mode)
    pub fn generate(&self, input: &Tensor) -> Tensor {
        self.forward_t(input, false)
    }

    /// Get configuration
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

impl ModuleT for Generator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        Generator::forward_t(self, xs, train)
    }
}
