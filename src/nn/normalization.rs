//! Normalization layers.
//!
//! # References
//!
//! - Ioffe, S., & Szegedy, C. (2015). Batch normalization: Accelerating
//!   deep network training. ICML.

use super::init::{constant, zeros};
use crate::autograd::Tensor;

/// Batch Normalization for 2D feature maps (Ioffe & Szegedy, 2015).
///
/// Normalizes each channel over the batch and spatial dimensions during
/// training, and uses running statistics during evaluation. The training
/// path is recorded on the autograd tape; the recorded gradient accounts
/// for the batch statistics' dependence on the input.
///
/// The forward pass takes `&mut self` because training mode updates the
/// running statistics in place.
///
/// # Shape
///
/// - Input: `(N, C, H, W)`
/// - Output: `(N, C, H, W)`
#[derive(Debug)]
pub struct BatchNorm2d {
    num_features: usize,
    eps: f32,
    momentum: f32,
    /// Learnable scale (gamma)
    weight: Tensor,
    /// Learnable shift (beta)
    bias: Tensor,
    /// Running mean (not learnable)
    running_mean: Tensor,
    /// Running variance (not learnable)
    running_var: Tensor,
    /// Training mode
    training: bool,
}

impl BatchNorm2d {
    /// Create a new `BatchNorm2d` layer.
    ///
    /// # Arguments
    ///
    /// * `num_features` - Number of channels
    #[must_use]
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            eps: 1e-5,
            momentum: 0.1,
            weight: constant(&[num_features], 1.0).requires_grad(),
            bias: zeros(&[num_features]).requires_grad(),
            running_mean: zeros(&[num_features]),
            running_var: constant(&[num_features], 1.0),
            training: true,
        }
    }

    /// Set momentum for running statistics update.
    #[must_use]
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    /// Set epsilon for numerical stability.
    #[must_use]
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Exclude the scale parameter from gradient updates.
    ///
    /// Used when a learned gate already controls per-channel magnitude,
    /// so the normalization scale must not compete with it.
    pub fn freeze_scale(&mut self) {
        self.weight.requires_grad_(false);
    }

    /// Whether the scale parameter receives gradients.
    #[must_use]
    pub fn scale_trainable(&self) -> bool {
        self.weight.requires_grad_enabled()
    }

    /// Number of channels.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Compute the forward pass.
    ///
    /// In training mode, normalizes with batch statistics and updates
    /// the running statistics. In evaluation mode, normalizes with the
    /// stored running statistics.
    pub fn forward(&mut self, input: &Tensor) -> Tensor {
        assert_eq!(
            input.ndim(),
            4,
            "BatchNorm2d expects 4D input [N, C, H, W], got {}D",
            input.ndim()
        );
        let shape = input.shape();
        let (n, c, h, w) = (shape[0], shape[1], shape[2], shape[3]);
        assert_eq!(
            c, self.num_features,
            "Expected {} channels, got {}",
            self.num_features, c
        );

        if self.training {
            let (mean, var) = batch_statistics(input.data(), n, c, h, w);

            // Update running statistics. The running variance uses the
            // unbiased estimate while normalization uses the biased one.
            let m = (n * h * w) as f32;
            let correction = if m > 1.0 { m / (m - 1.0) } else { 1.0 };
            let rm = self.running_mean.data_mut();
            for (r, &b) in rm.iter_mut().zip(mean.iter()) {
                *r = (1.0 - self.momentum) * *r + self.momentum * b;
            }
            let rv = self.running_var.data_mut();
            for (r, &b) in rv.iter_mut().zip(var.iter()) {
                *r = (1.0 - self.momentum) * *r + self.momentum * b * correction;
            }

            input.batch_norm2d(&self.weight, &self.bias, &mean, &var, self.eps)
        } else {
            self.forward_eval(input)
        }
    }

    /// Evaluation-mode forward using running statistics.
    ///
    /// Not recorded on the tape.
    fn forward_eval(&self, input: &Tensor) -> Tensor {
        let shape = input.shape();
        let (n, c, h, w) = (shape[0], shape[1], shape[2], shape[3]);
        let plane = h * w;

        let x = input.data();
        let gamma = self.weight.data();
        let beta = self.bias.data();
        let rm = self.running_mean.data();
        let rv = self.running_var.data();

        let mut output = vec![0.0f32; n * c * plane];
        for b in 0..n {
            for ch in 0..c {
                let std_inv = 1.0 / (rv[ch] + self.eps).sqrt();
                let base = (b * c + ch) * plane;
                for idx in base..base + plane {
                    output[idx] = gamma[ch] * (x[idx] - rm[ch]) * std_inv + beta[ch];
                }
            }
        }

        Tensor::new(&output, shape)
    }

    /// Get references to all learnable parameters.
    #[must_use]
    pub fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weight, &self.bias]
    }

    /// Get mutable references to all learnable parameters.
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.weight, &mut self.bias]
    }

    /// Switch to training mode.
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Switch to evaluation mode.
    pub fn eval(&mut self) {
        self.training = false;
    }

    /// Whether the layer is in training mode.
    #[must_use]
    pub fn training(&self) -> bool {
        self.training
    }

    /// Get reference to the scale parameter.
    #[must_use]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Get reference to the shift parameter.
    #[must_use]
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Get reference to the running mean.
    #[must_use]
    pub fn running_mean(&self) -> &Tensor {
        &self.running_mean
    }

    /// Get reference to the running variance.
    #[must_use]
    pub fn running_var(&self) -> &Tensor {
        &self.running_var
    }

    /// Set the scale parameter from external data.
    ///
    /// Preserves the frozen/trainable state of the previous scale.
    pub fn set_weight(&mut self, mut weight: Tensor) {
        weight.requires_grad_(self.weight.requires_grad_enabled());
        self.weight = weight;
    }

    /// Set the shift parameter from external data.
    pub fn set_bias(&mut self, bias: Tensor) {
        self.bias = bias.requires_grad();
    }

    /// Set the running mean from external data.
    pub fn set_running_mean(&mut self, running_mean: Tensor) {
        self.running_mean = running_mean;
    }

    /// Set the running variance from external data.
    pub fn set_running_var(&mut self, running_var: Tensor) {
        self.running_var = running_var;
    }
}

/// Per-channel mean and biased variance over the batch and spatial axes.
fn batch_statistics(x: &[f32], n: usize, c: usize, h: usize, w: usize) -> (Vec<f32>, Vec<f32>) {
    let plane = h * w;
    let m = (n * plane) as f32;

    let mut mean = vec![0.0f32; c];
    for b in 0..n {
        for ch in 0..c {
            let base = (b * c + ch) * plane;
            mean[ch] += x[base..base + plane].iter().sum::<f32>();
        }
    }
    for v in &mut mean {
        *v /= m;
    }

    let mut var = vec![0.0f32; c];
    for b in 0..n {
        for ch in 0..c {
            let base = (b * c + ch) * plane;
            var[ch] += x[base..base + plane]
                .iter()
                .map(|&v| (v - mean[ch]) * (v - mean[ch]))
                .sum::<f32>();
        }
    }
    for v in &mut var {
        *v /= m;
    }

    (mean, var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad};

    #[test]
    fn test_batchnorm2d_normalizes_training_batch() {
        let mut bn = BatchNorm2d::new(2);
        // Layout (N, C, H, W): channel 0 holds {1, 10}, channel 1 holds {3, 30}.
        let x = Tensor::new(&[1.0, 3.0, 10.0, 30.0], &[2, 2, 1, 1]);
        let y = bn.forward(&x);
        assert_eq!(y.shape(), &[2, 2, 1, 1]);

        let d = y.data();
        for ch in 0..2 {
            let mean = (d[ch] + d[2 + ch]) / 2.0;
            assert!(mean.abs() < 1e-4, "channel {ch} mean {mean} not centered");
        }
    }

    #[test]
    fn test_batchnorm2d_updates_running_stats() {
        let mut bn = BatchNorm2d::new(1);
        assert_eq!(bn.running_mean().data(), &[0.0]);
        assert_eq!(bn.running_var().data(), &[1.0]);

        // Batch of 4 values in one channel: mean 4, biased var 5.
        let x = Tensor::new(&[1.0, 3.0, 5.0, 7.0], &[2, 1, 1, 2]);
        bn.forward(&x);

        // momentum 0.1: rm = 0.9*0 + 0.1*4, rv = 0.9*1 + 0.1*(5*4/3)
        let rm = bn.running_mean().data()[0];
        let rv = bn.running_var().data()[0];
        assert!((rm - 0.4).abs() < 1e-5, "running mean {rm}");
        assert!((rv - (0.9 + 0.1 * 5.0 * 4.0 / 3.0)).abs() < 1e-4, "running var {rv}");
    }

    #[test]
    fn test_batchnorm2d_eval_uses_running_stats() {
        let mut bn = BatchNorm2d::new(1).with_eps(0.0);
        bn.set_running_mean(Tensor::from_slice(&[2.0]));
        bn.set_running_var(Tensor::from_slice(&[4.0]));
        bn.eval();

        let x = Tensor::new(&[2.0, 4.0, 0.0, 6.0], &[1, 1, 2, 2]);
        let y = bn.forward(&x);

        // (x - 2) / 2 with gamma=1, beta=0
        assert_eq!(y.data(), &[0.0, 1.0, -1.0, 2.0]);
    }

    #[test]
    fn test_batchnorm2d_freeze_scale_blocks_gradient() {
        clear_graph();
        let mut bn = BatchNorm2d::new(1);
        bn.freeze_scale();
        assert!(!bn.scale_trainable());

        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
        let y = bn.forward(&x);
        y.sum().backward();

        assert!(get_grad(bn.weight().id()).is_none(), "frozen scale got a gradient");
        assert!(get_grad(bn.bias().id()).is_some(), "shift should still train");
        clear_graph();
    }

    #[test]
    fn test_batchnorm2d_set_weight_preserves_frozen_state() {
        let mut bn = BatchNorm2d::new(2);
        bn.freeze_scale();
        bn.set_weight(Tensor::from_slice(&[0.5, 1.5]));
        assert!(!bn.scale_trainable());
        assert_eq!(bn.weight().data(), &[0.5, 1.5]);
    }

    #[test]
    fn test_batchnorm2d_train_eval_toggle() {
        let mut bn = BatchNorm2d::new(4);
        assert!(bn.training());
        bn.eval();
        assert!(!bn.training());
        bn.train();
        assert!(bn.training());
    }
}
