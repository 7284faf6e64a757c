//! Loss functions for WGAN-GP training
//!
//! Implements the Wasserstein critic objective with gradient penalty and the
//! conditional generator objective (adversarial term + weighted pixelwise L1).

use tch::{Kind, Tensor};

use crate::model::Critic;

/// Generator loss: -E[D(x, G(x))] + weight_l1 * L1(G(x), y)
///
/// The adversarial term drives the critic's score on fakes upward; the L1
/// term anchors the prediction to the paired ground truth.
///
/// # Arguments
///
/// * `fake_scores` - Critic scores on (sketch, fake) pairs
/// * `fake` - Generated maps
/// * `target` - Ground-truth maps
/// * `weight_l1` - Weight of the pixelwise term
pub fn generator_loss(
    fake_scores: &Tensor,
    fake: &Tensor,
    target: &Tensor,
    weight_l1: f64,
) -> Tensor {
    let adversarial = -fake_scores.mean(Kind::Float);
    let pixelwise = fake.l1_loss(target, tch::Reduction::Mean);
    adversarial + pixelwise * weight_l1
}

/// Critic loss: -E[D(real)] + E[D(fake)] + coefficient * gradient penalty
///
/// Wasserstein formulation: raw scores, no sigmoid or log.
pub fn critic_loss(
    real_scores: &Tensor,
    fake_scores: &Tensor,
    penalty: &Tensor,
    coefficient: f64,
) -> Tensor {
    -real_scores.mean(Kind::Float) + fake_scores.mean(Kind::Float) + penalty * coefficient
}

/// Draw one interpolation coefficient per sample, shaped for broadcasting
/// over (C, H, W).
pub fn sample_alpha(batch_size: i64, device: tch::Device) -> Tensor {
    Tensor::rand([batch_size, 1, 1, 1], (Kind::Float, device))
}

/// Per-sample convex combination: `alpha * real + (1 - alpha) * fake`.
pub fn interpolate(real: &Tensor, fake: &Tensor, alpha: &Tensor) -> Tensor {
    real * alpha + fake * (Tensor::ones_like(alpha) - alpha)
}

/// Two-sided gradient penalty with freshly drawn per-sample coefficients.
///
/// `real` and `fake` are joint sketch+map tensors of identical shape
/// [N, C, H, W].
pub fn gradient_penalty(critic: &Critic, real: &Tensor, fake: &Tensor, train: bool) -> Tensor {
    let alpha = sample_alpha(real.size()[0], real.device());
    gradient_penalty_at(critic, real, fake, &alpha, train)
}

/// Gradient penalty at explicit interpolation coefficients.
///
/// Evaluates the critic on `alpha * real + (1 - alpha) * fake`, differentiates
/// the summed scores with respect to the interpolated batch (keeping the graph
/// so the penalty itself can be backpropagated), and returns
/// `mean((||grad||_2 - 1)^2)`. The target norm is the constant 1 required for
/// the 1-Lipschitz constraint; it is not a tunable.
pub fn gradient_penalty_at(
    critic: &Critic,
    real: &Tensor,
    fake: &Tensor,
    alpha: &Tensor,
    train: bool,
) -> Tensor {
    let batch_size = real.size()[0];

    let interpolated =
        interpolate(&real.detach(), &fake.detach(), alpha).set_requires_grad(true);
    let scores = critic.forward_t(&interpolated, train);

    let gradients = Tensor::run_backward(
        &[scores.sum(Kind::Float)],
        &[&interpolated],
        true, // keep_graph
        true, // create_graph: the penalty is itself differentiated
    );

    let grad_norm = gradients[0]
        .view([batch_size, -1])
        .square()
        .sum_dim_intlist(1, false, Kind::Float)
        .sqrt();

    (grad_norm - 1.0).square().mean(Kind::Float)
}
