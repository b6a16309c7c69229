//! Convolution blocks, plain and gated.

use crate::autograd::Tensor;
use crate::error::{PodarError, Result};
use crate::nn::{BatchNorm2d, Conv2d, Module};

use super::scorer::ChannelScorer;
use super::wta::winner_take_all;

/// Convolution, batch normalization, rectification. No gating.
#[derive(Debug)]
pub struct PlainBlock {
    conv: Conv2d,
    norm: BatchNorm2d,
}

impl PlainBlock {
    /// Create a block with the given convolution geometry.
    #[must_use]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        Self::with_seed(in_channels, out_channels, kernel_size, stride, padding, None)
    }

    /// Create a block with seeded weight initialization.
    #[must_use]
    pub fn with_seed(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        seed: Option<u64>,
    ) -> Self {
        Self {
            conv: Conv2d::with_seed(in_channels, out_channels, kernel_size, stride, padding, true, seed),
            norm: BatchNorm2d::new(out_channels),
        }
    }

    /// Feature map for a `[batch, in_channels, h, w]` input.
    pub fn forward(&mut self, input: &Tensor) -> Tensor {
        let y = self.conv.forward(input);
        self.norm.forward(&y).relu()
    }

    /// Switch to training mode (batch statistics, running-stat updates).
    pub fn train(&mut self) {
        self.norm.train();
    }

    /// Switch to evaluation mode (running statistics).
    pub fn eval(&mut self) {
        self.norm.eval();
    }

    /// Whether the block is in training mode.
    #[must_use]
    pub fn training(&self) -> bool {
        self.norm.training()
    }

    /// The convolution sublayer.
    #[must_use]
    pub fn conv(&self) -> &Conv2d {
        &self.conv
    }

    /// Mutable convolution sublayer.
    pub fn conv_mut(&mut self) -> &mut Conv2d {
        &mut self.conv
    }

    /// The normalization sublayer.
    #[must_use]
    pub fn norm(&self) -> &BatchNorm2d {
        &self.norm
    }

    /// Mutable normalization sublayer.
    pub fn norm_mut(&mut self) -> &mut BatchNorm2d {
        &mut self.norm
    }

    /// Trainable parameters, convolution first.
    #[must_use]
    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.conv.parameters();
        params.extend(self.norm.parameters());
        params
    }

    /// Mutable trainable parameters.
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.conv.parameters_mut();
        params.extend(self.norm.parameters_mut());
        params
    }
}

/// Convolution block modulated by a learned per-input channel gate.
///
/// The gate scores the block input, winner-take-all selection keeps the
/// strongest `round(out_channels * ratio)` scores per sample, and the
/// surviving scores rescale the normalized convolution output channel
/// by channel. Zeroed channels stay in the feature map as all-zero
/// slices, so the output shape always matches [`PlainBlock`].
///
/// The normalization scale is frozen at construction: the gate owns
/// channel-wise magnitude, so the scale must not compete with it.
#[derive(Debug)]
pub struct GatedBlock {
    conv: Conv2d,
    norm: BatchNorm2d,
    gate: ChannelScorer,
    ratio: f32,
}

impl GatedBlock {
    /// Create a gated block.
    ///
    /// # Errors
    ///
    /// Returns [`PodarError::InvalidSparsity`] when `ratio` falls
    /// outside `[0, 1]`.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        ratio: f32,
    ) -> Result<Self> {
        Self::with_seed(in_channels, out_channels, kernel_size, stride, padding, ratio, None)
    }

    /// Create a gated block with seeded weight initialization.
    ///
    /// # Errors
    ///
    /// Returns [`PodarError::InvalidSparsity`] when `ratio` falls
    /// outside `[0, 1]`.
    pub fn with_seed(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        ratio: f32,
        seed: Option<u64>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(PodarError::invalid_sparsity(ratio));
        }

        let mut norm = BatchNorm2d::new(out_channels);
        norm.freeze_scale();

        Ok(Self {
            conv: Conv2d::with_seed(in_channels, out_channels, kernel_size, stride, padding, true, seed),
            norm,
            gate: ChannelScorer::with_seed(in_channels, out_channels, seed),
            ratio,
        })
    }

    /// Feature map and sparsity cost for a `[batch, in_channels, h, w]`
    /// input.
    ///
    /// The cost is the L1 norm of the gate vector, one scalar covering
    /// every sample in the batch.
    pub fn forward(&mut self, input: &Tensor) -> (Tensor, Tensor) {
        let scale = winner_take_all(&self.gate.forward(input), self.ratio);

        let y = self.conv.forward(input);
        let y = self.norm.forward(&y);
        let output = y.scale_channels(&scale).relu();

        let cost = scale.l1_norm();
        (output, cost)
    }

    /// Switch to training mode.
    pub fn train(&mut self) {
        self.norm.train();
    }

    /// Switch to evaluation mode.
    pub fn eval(&mut self) {
        self.norm.eval();
    }

    /// Whether the block is in training mode.
    #[must_use]
    pub fn training(&self) -> bool {
        self.norm.training()
    }

    /// Sparsity ratio fixed at construction.
    #[must_use]
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// The convolution sublayer.
    #[must_use]
    pub fn conv(&self) -> &Conv2d {
        &self.conv
    }

    /// Mutable convolution sublayer.
    pub fn conv_mut(&mut self) -> &mut Conv2d {
        &mut self.conv
    }

    /// The normalization sublayer.
    #[must_use]
    pub fn norm(&self) -> &BatchNorm2d {
        &self.norm
    }

    /// Mutable normalization sublayer.
    pub fn norm_mut(&mut self) -> &mut BatchNorm2d {
        &mut self.norm
    }

    /// The gate scorer.
    #[must_use]
    pub fn gate(&self) -> &ChannelScorer {
        &self.gate
    }

    /// Mutable gate scorer.
    pub fn gate_mut(&mut self) -> &mut ChannelScorer {
        &mut self.gate
    }

    /// Trainable parameters: convolution, normalization, then gate.
    ///
    /// The frozen normalization scale is still listed; it carries no
    /// gradient, so optimizers skip it.
    #[must_use]
    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.conv.parameters();
        params.extend(self.norm.parameters());
        params.extend(self.gate.parameters());
        params
    }

    /// Mutable trainable parameters.
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.conv.parameters_mut();
        params.extend(self.norm.parameters_mut());
        params.extend(self.gate.parameters_mut());
        params
    }
}
