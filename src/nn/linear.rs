//! Fully connected (linear) layer.
//!
//! Implements the transformation y = xW^T + b.
//!
//! # References
//!
//! - Glorot, X., & Bengio, Y. (2010). Understanding the difficulty of training
//!   deep feedforward neural networks. AISTATS.

use super::init::{xavier_uniform, zeros};
use super::module::Module;
use crate::autograd::Tensor;

/// Fully connected layer: y = xW^T + b
///
/// Applies a linear transformation to the incoming data.
/// Weight initialization follows Xavier/Glorot (Glorot & Bengio, 2010).
///
/// # Shape
///
/// - Input: `(N, in_features)`
/// - Output: `(N, out_features)`
///
/// # Example
///
/// ```ignore
/// use podar::nn::{Module, Linear};
/// use podar::autograd::Tensor;
///
/// let layer = Linear::new(192, 10);
/// let x = Tensor::ones(&[128, 192]);
/// let output = layer.forward(&x);
///
/// assert_eq!(output.shape(), &[128, 10]);
/// ```
pub struct Linear {
    /// Weight matrix, shape: [`out_features`, `in_features`]
    weight: Tensor,

    /// Bias vector, shape: [`out_features`], or None if bias=false
    bias: Option<Tensor>,

    /// Number of input features
    in_features: usize,

    /// Number of output features
    out_features: usize,
}

impl Linear {
    /// Create a new Linear layer with Xavier initialization.
    #[must_use]
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self::with_seed(in_features, out_features, None)
    }

    /// Create a Linear layer with a specific random seed.
    #[must_use]
    pub fn with_seed(in_features: usize, out_features: usize, seed: Option<u64>) -> Self {
        let weight = xavier_uniform(&[out_features, in_features], in_features, out_features, seed)
            .requires_grad();
        let bias = zeros(&[out_features]).requires_grad();

        Self {
            weight,
            bias: Some(bias),
            in_features,
            out_features,
        }
    }

    /// Create a Linear layer without bias.
    ///
    /// Useful when followed by a normalization layer with its own bias.
    #[must_use]
    pub fn without_bias(in_features: usize, out_features: usize) -> Self {
        let weight =
            xavier_uniform(&[out_features, in_features], in_features, out_features, None)
                .requires_grad();

        Self {
            weight,
            bias: None,
            in_features,
            out_features,
        }
    }

    /// Get the input feature dimension.
    #[must_use]
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Get the output feature dimension.
    #[must_use]
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Check if this layer has a bias term.
    #[must_use]
    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Set weight tensor from external data.
    ///
    /// Used for loading pre-trained weights.
    pub fn set_weight(&mut self, weight: Tensor) {
        self.weight = weight;
    }

    /// Set bias tensor from external data.
    pub fn set_bias(&mut self, bias: Tensor) {
        self.bias = Some(bias);
    }

    /// Get reference to weight tensor.
    #[must_use]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Get reference to bias tensor if present.
    #[must_use]
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Tensor {
        assert_eq!(
            input.ndim(),
            2,
            "Linear expects 2D input [N, in_features], got {}D",
            input.ndim()
        );

        // y = x @ W^T + b. The transpose is recorded on the tape so
        // gradients flow back into the weight each step.
        let weight_t = self.weight.transpose();
        let output = input.matmul(&weight_t);

        match &self.bias {
            Some(b) => output.broadcast_add(b),
            None => output,
        }
    }

    fn parameters(&self) -> Vec<&Tensor> {
        match &self.bias {
            Some(b) => vec![&self.weight, b],
            None => vec![&self.weight],
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        match &mut self.bias {
            Some(b) => vec![&mut self.weight, b],
            None => vec![&mut self.weight],
        }
    }
}

impl std::fmt::Debug for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .field("bias", &self.bias.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad};

    #[test]
    fn test_linear_forward_shape() {
        let layer = Linear::new(10, 5);
        let x = Tensor::ones(&[32, 10]);
        let output = layer.forward(&x);

        assert_eq!(output.shape(), &[32, 5]);
    }

    #[test]
    fn test_linear_parameters() {
        let layer = Linear::new(10, 5);
        let params = layer.parameters();

        assert_eq!(params.len(), 2); // weight + bias
        assert_eq!(params[0].shape(), &[5, 10]); // weight
        assert_eq!(params[1].shape(), &[5]); // bias
    }

    #[test]
    fn test_linear_without_bias() {
        let layer = Linear::without_bias(10, 5);
        let params = layer.parameters();

        assert_eq!(params.len(), 1); // weight only
        assert!(!layer.has_bias());
    }

    #[test]
    fn test_linear_num_parameters() {
        let layer = Linear::new(10, 5);
        // weight: 10*5 = 50, bias: 5, total: 55
        assert_eq!(layer.num_parameters(), 55);
    }

    #[test]
    fn test_linear_reproducible() {
        let layer1 = Linear::with_seed(10, 5, Some(42));
        let layer2 = Linear::with_seed(10, 5, Some(42));

        assert_eq!(layer1.weight.data(), layer2.weight.data());
    }

    #[test]
    fn test_linear_identity_like() {
        let mut layer = Linear::with_seed(3, 3, Some(42));

        let identity = Tensor::new(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0], &[3, 3]);
        let zero_bias = Tensor::zeros(&[3]);

        layer.set_weight(identity.requires_grad());
        layer.set_bias(zero_bias.requires_grad());

        let x = Tensor::new(&[1.0, 2.0, 3.0], &[1, 3]);
        let output = layer.forward(&x);

        // With identity weight and zero bias, output should equal input
        assert_eq!(output.shape(), &[1, 3]);

        let out_data = output.data();
        assert!((out_data[0] - 1.0).abs() < 1e-5);
        assert!((out_data[1] - 2.0).abs() < 1e-5);
        assert!((out_data[2] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_linear_with_bias() {
        let mut layer = Linear::with_seed(2, 2, Some(42));

        layer.set_weight(Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]).requires_grad());
        layer.set_bias(Tensor::new(&[10.0, 20.0], &[2]).requires_grad());

        let x = Tensor::new(&[1.0, 2.0], &[1, 2]);
        let output = layer.forward(&x);

        // y = x @ W^T + b = [1, 2] + [10, 20] = [11, 22]
        let out_data = output.data();
        assert!((out_data[0] - 11.0).abs() < 1e-5);
        assert!((out_data[1] - 22.0).abs() < 1e-5);
    }

    #[test]
    fn test_linear_gradients_reach_parameters() {
        clear_graph();
        let layer = Linear::with_seed(3, 2, Some(42));

        let x = Tensor::new(&[1.0, 2.0, 3.0], &[1, 3]);
        let y = layer.forward(&x);
        y.sum().backward();

        let w_grad = get_grad(layer.weight().id()).expect("weight grad");
        assert_eq!(w_grad.shape(), &[2, 3]);
        // d(sum)/dW[o][i] = x[i] for every output row
        assert_eq!(w_grad.data(), &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);

        let b_grad = get_grad(layer.bias().expect("bias").id()).expect("bias grad");
        assert_eq!(b_grad.data(), &[1.0, 1.0]);
        clear_graph();
    }
}
