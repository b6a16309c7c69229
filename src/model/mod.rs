//! CIFAR-10 classifier networks, plain and channel-gated.
//!
//! Both networks share one fixed topology: eight convolution blocks
//! (two of them striding down), global average pooling, and a linear
//! classifier over 10 classes. [`CifarNet`] runs plain blocks and
//! returns logits; [`GatedCifarNet`] runs gated blocks and returns
//! logits plus the summed sparsity cost. The two are distinct types so
//! a caller can never invoke the wrong forward contract.
//!
//! Parameters carry stable names (`layers.<i>.conv.weight`,
//! `layers.<i>.norm.running_var`, `layers.<i>.gate.bias`,
//! `classifier.weight`) so checkpoints can be restored whole or
//! filtered by suffix when warm-starting across sparsity levels.

use crate::autograd::Tensor;
use crate::error::{PodarError, Result};
use crate::gate::{ChannelScorer, GatedBlock, PlainBlock};
use crate::nn::{BatchNorm2d, Conv2d, GlobalAvgPool2d, Linear, Module, StateDict};

/// Number of output classes.
pub const NUM_CLASSES: usize = 10;

/// Expected input channels (RGB).
pub const INPUT_CHANNELS: usize = 3;

/// Block geometry: (in_channels, out_channels, kernel, stride, padding).
const BLOCKS: [(usize, usize, usize, usize, usize); 8] = [
    (3, 64, 3, 1, 0),
    (64, 64, 3, 1, 1),
    (64, 128, 3, 2, 1),
    (128, 128, 3, 1, 1),
    (128, 128, 3, 1, 1),
    (128, 192, 3, 2, 1),
    (192, 192, 3, 1, 1),
    (192, 192, 3, 1, 1),
];

/// Classifier input width: channels out of the last block.
const FEATURE_DIM: usize = 192;

fn block_seed(seed: Option<u64>, index: usize) -> Option<u64> {
    seed.map(|s| s.wrapping_add(index as u64))
}

/// Plain eight-block convolutional classifier.
#[derive(Debug)]
pub struct CifarNet {
    layers: Vec<PlainBlock>,
    pool: GlobalAvgPool2d,
    classifier: Linear,
}

impl CifarNet {
    /// Create a network with entropy-seeded initialization.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(None)
    }

    /// Create a network with seeded initialization. Each block draws
    /// from its own derived seed so equal-shaped layers differ.
    #[must_use]
    pub fn with_seed(seed: Option<u64>) -> Self {
        let layers = BLOCKS
            .iter()
            .enumerate()
            .map(|(i, &(c_in, c_out, k, s, p))| {
                PlainBlock::with_seed(c_in, c_out, k, s, p, block_seed(seed, i))
            })
            .collect();

        Self {
            layers,
            pool: GlobalAvgPool2d::new(),
            classifier: Linear::with_seed(FEATURE_DIM, NUM_CLASSES, block_seed(seed, BLOCKS.len())),
        }
    }

    /// Class logits for a `[batch, 3, h, w]` image batch.
    pub fn forward(&mut self, input: &Tensor) -> Tensor {
        let mut x = self.layers[0].forward(input);
        for block in &mut self.layers[1..] {
            x = block.forward(&x);
        }
        let features = self.pool.forward(&x);
        self.classifier.forward(&features)
    }

    /// Switch to training mode.
    pub fn train(&mut self) {
        for block in &mut self.layers {
            block.train();
        }
    }

    /// Switch to evaluation mode.
    pub fn eval(&mut self) {
        for block in &mut self.layers {
            block.eval();
        }
    }

    /// Trainable parameters across all blocks and the classifier.
    #[must_use]
    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = Vec::new();
        for block in &self.layers {
            params.extend(block.parameters());
        }
        params.extend(self.classifier.parameters());
        params
    }

    /// Mutable trainable parameters, in a stable order.
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = Vec::new();
        for block in &mut self.layers {
            params.extend(block.parameters_mut());
        }
        params.extend(self.classifier.parameters_mut());
        params
    }

    /// Total trainable parameter count.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }

    /// Named snapshot of all parameters and running statistics.
    #[must_use]
    pub fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for (i, block) in self.layers.iter().enumerate() {
            snapshot_conv(&mut state, &format!("layers.{i}.conv"), block.conv());
            snapshot_norm(&mut state, &format!("layers.{i}.norm"), block.norm());
        }
        snapshot_linear(&mut state, "classifier", &self.classifier);
        state
    }

    /// Restore every parameter and running statistic from `state`.
    ///
    /// # Errors
    ///
    /// Fails on a missing entry or a shape mismatch.
    pub fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        for (i, block) in self.layers.iter_mut().enumerate() {
            restore_conv(block.conv_mut(), state, &format!("layers.{i}.conv"), true)?;
            restore_norm(block.norm_mut(), state, &format!("layers.{i}.norm"), true)?;
        }
        restore_linear(&mut self.classifier, state, "classifier", true)?;
        Ok(())
    }

    /// Restore the entries of `state` whose names this network owns,
    /// skipping names that are absent. Returns how many tensors were
    /// applied.
    ///
    /// # Errors
    ///
    /// Fails when a present entry's shape mismatches.
    pub fn load_matching(&mut self, state: &StateDict) -> Result<usize> {
        let mut applied = 0;
        for (i, block) in self.layers.iter_mut().enumerate() {
            applied += restore_conv(block.conv_mut(), state, &format!("layers.{i}.conv"), false)?;
            applied += restore_norm(block.norm_mut(), state, &format!("layers.{i}.norm"), false)?;
        }
        applied += restore_linear(&mut self.classifier, state, "classifier", false)?;
        Ok(applied)
    }
}

impl Default for CifarNet {
    fn default() -> Self {
        Self::new()
    }
}

/// Eight-block classifier with per-input channel gating.
///
/// Forward returns the logits together with the summed sparsity cost,
/// one scalar per call covering the whole batch.
#[derive(Debug)]
pub struct GatedCifarNet {
    layers: Vec<GatedBlock>,
    pool: GlobalAvgPool2d,
    classifier: Linear,
    ratio: f32,
}

impl GatedCifarNet {
    /// Create a gated network keeping `round(C * ratio)` channels per
    /// block.
    ///
    /// # Errors
    ///
    /// Returns [`PodarError::InvalidSparsity`] when `ratio` falls
    /// outside `[0, 1]`.
    pub fn new(ratio: f32) -> Result<Self> {
        Self::with_seed(ratio, None)
    }

    /// Create a gated network with seeded initialization.
    ///
    /// # Errors
    ///
    /// Returns [`PodarError::InvalidSparsity`] when `ratio` falls
    /// outside `[0, 1]`.
    pub fn with_seed(ratio: f32, seed: Option<u64>) -> Result<Self> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(PodarError::invalid_sparsity(ratio));
        }

        let layers = BLOCKS
            .iter()
            .enumerate()
            .map(|(i, &(c_in, c_out, k, s, p))| {
                GatedBlock::with_seed(c_in, c_out, k, s, p, ratio, block_seed(seed, i))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            layers,
            pool: GlobalAvgPool2d::new(),
            classifier: Linear::with_seed(FEATURE_DIM, NUM_CLASSES, block_seed(seed, BLOCKS.len())),
            ratio,
        })
    }

    /// Class logits and total sparsity cost for a `[batch, 3, h, w]`
    /// image batch.
    ///
    /// The cost is the sum over blocks of each block's gate-vector L1
    /// norm.
    pub fn forward(&mut self, input: &Tensor) -> (Tensor, Tensor) {
        let mut cost = Tensor::from_slice(&[0.0]);

        let (mut x, block_cost) = self.layers[0].forward(input);
        cost = cost.add(&block_cost);

        for block in &mut self.layers[1..] {
            let (y, block_cost) = block.forward(&x);
            x = y;
            cost = cost.add(&block_cost);
        }

        let features = self.pool.forward(&x);
        let logits = self.classifier.forward(&features);
        (logits, cost)
    }

    /// Sparsity ratio fixed at construction.
    #[must_use]
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Switch to training mode.
    pub fn train(&mut self) {
        for block in &mut self.layers {
            block.train();
        }
    }

    /// Switch to evaluation mode.
    pub fn eval(&mut self) {
        for block in &mut self.layers {
            block.eval();
        }
    }

    /// Trainable parameters across blocks, gates, and the classifier.
    ///
    /// Frozen normalization scales are listed but carry no gradient.
    #[must_use]
    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = Vec::new();
        for block in &self.layers {
            params.extend(block.parameters());
        }
        params.extend(self.classifier.parameters());
        params
    }

    /// Mutable trainable parameters, in a stable order.
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = Vec::new();
        for block in &mut self.layers {
            params.extend(block.parameters_mut());
        }
        params.extend(self.classifier.parameters_mut());
        params
    }

    /// Total trainable parameter count.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }

    /// Named snapshot of all parameters and running statistics.
    #[must_use]
    pub fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for (i, block) in self.layers.iter().enumerate() {
            snapshot_conv(&mut state, &format!("layers.{i}.conv"), block.conv());
            snapshot_norm(&mut state, &format!("layers.{i}.norm"), block.norm());
            snapshot_gate(&mut state, &format!("layers.{i}.gate"), block.gate());
        }
        snapshot_linear(&mut state, "classifier", &self.classifier);
        state
    }

    /// Restore every parameter and running statistic from `state`.
    ///
    /// # Errors
    ///
    /// Fails on a missing entry or a shape mismatch.
    pub fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        for (i, block) in self.layers.iter_mut().enumerate() {
            restore_conv(block.conv_mut(), state, &format!("layers.{i}.conv"), true)?;
            restore_norm(block.norm_mut(), state, &format!("layers.{i}.norm"), true)?;
            restore_gate(block.gate_mut(), state, &format!("layers.{i}.gate"), true)?;
        }
        restore_linear(&mut self.classifier, state, "classifier", true)?;
        Ok(())
    }

    /// Restore the entries of `state` whose names this network owns,
    /// skipping names that are absent. Returns how many tensors were
    /// applied.
    ///
    /// Warm starts rely on this: a dense checkpoint filtered to
    /// `conv.weight`/`conv.bias` seeds the convolutions and leaves
    /// gates at their initialization.
    ///
    /// # Errors
    ///
    /// Fails when a present entry's shape mismatches.
    pub fn load_matching(&mut self, state: &StateDict) -> Result<usize> {
        let mut applied = 0;
        for (i, block) in self.layers.iter_mut().enumerate() {
            applied += restore_conv(block.conv_mut(), state, &format!("layers.{i}.conv"), false)?;
            applied += restore_norm(block.norm_mut(), state, &format!("layers.{i}.norm"), false)?;
            applied += restore_gate(block.gate_mut(), state, &format!("layers.{i}.gate"), false)?;
        }
        applied += restore_linear(&mut self.classifier, state, "classifier", false)?;
        Ok(applied)
    }
}

// ---------------------------------------------------------------------------
// Named snapshot/restore plumbing shared by both networks.
// ---------------------------------------------------------------------------

fn insert(state: &mut StateDict, name: String, tensor: &Tensor) {
    state.insert(name, (tensor.data().to_vec(), tensor.shape().to_vec()));
}

fn snapshot_conv(state: &mut StateDict, prefix: &str, conv: &Conv2d) {
    insert(state, format!("{prefix}.weight"), conv.weight());
    if let Some(bias) = conv.bias() {
        insert(state, format!("{prefix}.bias"), bias);
    }
}

fn snapshot_norm(state: &mut StateDict, prefix: &str, norm: &BatchNorm2d) {
    insert(state, format!("{prefix}.weight"), norm.weight());
    insert(state, format!("{prefix}.bias"), norm.bias());
    insert(state, format!("{prefix}.running_mean"), norm.running_mean());
    insert(state, format!("{prefix}.running_var"), norm.running_var());
}

fn snapshot_gate(state: &mut StateDict, prefix: &str, gate: &ChannelScorer) {
    insert(state, format!("{prefix}.weight"), gate.weight());
    if let Some(bias) = gate.bias() {
        insert(state, format!("{prefix}.bias"), bias);
    }
}

fn snapshot_linear(state: &mut StateDict, prefix: &str, linear: &Linear) {
    insert(state, format!("{prefix}.weight"), linear.weight());
    if let Some(bias) = linear.bias() {
        insert(state, format!("{prefix}.bias"), bias);
    }
}

/// Look up `name` in the state dict, validating its shape. In strict
/// mode a missing entry is an error; otherwise it yields `None`.
fn lookup<'a>(
    state: &'a StateDict,
    name: &str,
    shape: &[usize],
    strict: bool,
) -> Result<Option<&'a [f32]>> {
    match state.get(name) {
        None if strict => Err(PodarError::MissingParameter {
            name: name.to_string(),
        }),
        None => Ok(None),
        Some((data, found)) => {
            if found.as_slice() != shape {
                return Err(PodarError::DimensionMismatch {
                    expected: format!("{name} {shape:?}"),
                    actual: format!("{found:?}"),
                });
            }
            Ok(Some(data))
        }
    }
}

fn restore_conv(conv: &mut Conv2d, state: &StateDict, prefix: &str, strict: bool) -> Result<usize> {
    let mut applied = 0;

    let weight_shape = conv.weight().shape().to_vec();
    if let Some(data) = lookup(state, &format!("{prefix}.weight"), &weight_shape, strict)? {
        conv.set_weight(Tensor::new(data, &weight_shape).requires_grad());
        applied += 1;
    }

    if let Some(bias_shape) = conv.bias().map(|b| b.shape().to_vec()) {
        if let Some(data) = lookup(state, &format!("{prefix}.bias"), &bias_shape, strict)? {
            conv.set_bias(Tensor::new(data, &bias_shape).requires_grad());
            applied += 1;
        }
    }

    Ok(applied)
}

fn restore_norm(
    norm: &mut BatchNorm2d,
    state: &StateDict,
    prefix: &str,
    strict: bool,
) -> Result<usize> {
    let mut applied = 0;
    let shape = vec![norm.num_features()];

    if let Some(data) = lookup(state, &format!("{prefix}.weight"), &shape, strict)? {
        // set_weight preserves a frozen scale's requires_grad state
        norm.set_weight(Tensor::new(data, &shape));
        applied += 1;
    }
    if let Some(data) = lookup(state, &format!("{prefix}.bias"), &shape, strict)? {
        norm.set_bias(Tensor::new(data, &shape));
        applied += 1;
    }
    if let Some(data) = lookup(state, &format!("{prefix}.running_mean"), &shape, strict)? {
        norm.set_running_mean(Tensor::new(data, &shape));
        applied += 1;
    }
    if let Some(data) = lookup(state, &format!("{prefix}.running_var"), &shape, strict)? {
        norm.set_running_var(Tensor::new(data, &shape));
        applied += 1;
    }

    Ok(applied)
}

fn restore_gate(
    gate: &mut ChannelScorer,
    state: &StateDict,
    prefix: &str,
    strict: bool,
) -> Result<usize> {
    let mut applied = 0;

    let weight_shape = gate.weight().shape().to_vec();
    if let Some(data) = lookup(state, &format!("{prefix}.weight"), &weight_shape, strict)? {
        gate.set_weight(Tensor::new(data, &weight_shape).requires_grad());
        applied += 1;
    }

    if let Some(bias_shape) = gate.bias().map(|b| b.shape().to_vec()) {
        if let Some(data) = lookup(state, &format!("{prefix}.bias"), &bias_shape, strict)? {
            gate.set_bias(Tensor::new(data, &bias_shape).requires_grad());
            applied += 1;
        }
    }

    Ok(applied)
}

fn restore_linear(
    linear: &mut Linear,
    state: &StateDict,
    prefix: &str,
    strict: bool,
) -> Result<usize> {
    let mut applied = 0;

    let weight_shape = linear.weight().shape().to_vec();
    if let Some(data) = lookup(state, &format!("{prefix}.weight"), &weight_shape, strict)? {
        linear.set_weight(Tensor::new(data, &weight_shape).requires_grad());
        applied += 1;
    }

    if let Some(bias_shape) = linear.bias().map(|b| b.shape().to_vec()) {
        if let Some(data) = lookup(state, &format!("{prefix}.bias"), &bias_shape, strict)? {
            linear.set_bias(Tensor::new(data, &bias_shape).requires_grad());
            applied += 1;
        }
    }

    Ok(applied)
}
