//! Per-channel importance scoring from a block's input feature map.

use crate::autograd::Tensor;
use crate::nn::{kaiming_uniform, Linear, Module};

/// Reduces a feature map to one raw importance score per output channel.
///
/// Three steps: spatially average the input to `[batch, in_channels]`,
/// map through a learned affine transform to `[batch, out_channels]`
/// (one score per channel the downstream convolution will produce), and
/// rectify so scores are non-negative.
///
/// The affine weight uses fan-out variance scaling and the bias starts
/// at 1.0, so every channel scores positively before training and the
/// winner-take-all step, not the initialization, decides who survives.
#[derive(Debug)]
pub struct ChannelScorer {
    affine: Linear,
    in_channels: usize,
    out_channels: usize,
}

impl ChannelScorer {
    /// Create a scorer for a block taking `in_channels` and producing
    /// `out_channels`.
    #[must_use]
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self::with_seed(in_channels, out_channels, None)
    }

    /// Create a scorer with seeded weight initialization.
    #[must_use]
    pub fn with_seed(in_channels: usize, out_channels: usize, seed: Option<u64>) -> Self {
        let mut affine = Linear::with_seed(in_channels, out_channels, seed);
        affine.set_weight(
            kaiming_uniform(&[out_channels, in_channels], out_channels, seed).requires_grad(),
        );
        affine.set_bias(Tensor::full(&[out_channels], 1.0).requires_grad());

        Self {
            affine,
            in_channels,
            out_channels,
        }
    }

    /// Raw gate scores for a `[batch, in_channels, h, w]` feature map.
    ///
    /// Returns a non-negative `[batch, out_channels]` tensor.
    #[must_use]
    pub fn forward(&self, input: &Tensor) -> Tensor {
        let pooled = input.global_avg_pool2d();
        self.affine.forward(&pooled).relu()
    }

    /// Number of input channels scored over.
    #[must_use]
    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Number of scores produced per sample.
    #[must_use]
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Affine weight, shape `[out_channels, in_channels]`.
    #[must_use]
    pub fn weight(&self) -> &Tensor {
        self.affine.weight()
    }

    /// Affine bias, shape `[out_channels]`.
    #[must_use]
    pub fn bias(&self) -> Option<&Tensor> {
        self.affine.bias()
    }

    /// Replace the affine weight (state restoration).
    pub fn set_weight(&mut self, weight: Tensor) {
        self.affine.set_weight(weight);
    }

    /// Replace the affine bias (state restoration).
    pub fn set_bias(&mut self, bias: Tensor) {
        self.affine.set_bias(bias);
    }

    /// Trainable parameters: affine weight and bias.
    #[must_use]
    pub fn parameters(&self) -> Vec<&Tensor> {
        self.affine.parameters()
    }

    /// Mutable trainable parameters.
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.affine.parameters_mut()
    }
}
