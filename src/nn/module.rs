//! The `Module` trait, the base interface for neural network layers.

use crate::autograd::Tensor;

/// Base trait for neural network modules.
///
/// A module transforms an input tensor into an output tensor and may
/// own learnable parameters. Stateless layers only implement
/// [`forward`](Module::forward); layers with parameters also implement
/// [`parameters`](Module::parameters) and
/// [`parameters_mut`](Module::parameters_mut) so optimizers can reach
/// their weights.
pub trait Module {
    /// Compute the forward pass.
    fn forward(&self, input: &Tensor) -> Tensor;

    /// Get references to all learnable parameters.
    fn parameters(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    /// Get mutable references to all learnable parameters.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        Vec::new()
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }

    /// Switch the module into training mode.
    fn train(&mut self) {}

    /// Switch the module into evaluation mode.
    fn eval(&mut self) {}

    /// Whether the module is in training mode.
    fn training(&self) -> bool {
        true
    }
}
