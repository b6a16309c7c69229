//! Tensor with automatic differentiation support.
//!
//! The `Tensor` type pairs flat f32 storage with a shape and, when
//! gradient tracking is enabled, participates in the thread-local
//! computation graph built by the op layer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::primitives::Vector;

use super::grad_fn::GradFn;
use super::with_graph;

/// Unique identifier for tensors in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(u64);

impl TensorId {
    /// Generate a new unique tensor ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TensorId {
    fn default() -> Self {
        Self::new()
    }
}

/// A tensor with optional gradient tracking.
///
/// Stores:
/// - `data`: flat values in row-major order (backed by [`Vector`])
/// - `shape`: dimensions, e.g. `[batch, channels, height, width]`
/// - `grad`: accumulated gradient, populated after `backward()`
/// - `requires_grad`: whether gradients flow to this tensor
/// - `grad_fn`: the operation that produced this tensor, if any
/// - `id`: identity within the computation graph
///
/// Cloning a tensor clones its data but keeps the same `id`, so a clone
/// registered with the graph still resolves to the original leaf.
#[derive(Clone)]
pub struct Tensor {
    /// Underlying data storage
    data: Vector<f32>,

    /// Shape of the tensor
    shape: Vec<usize>,

    /// Gradient (populated after `backward()`)
    grad: Option<Box<Tensor>>,

    /// Whether this tensor requires gradient computation
    requires_grad: bool,

    /// Whether this is a leaf tensor (created by user, not by operation)
    is_leaf: bool,

    /// Function that computes gradients during backward pass
    grad_fn: Option<Arc<dyn GradFn>>,

    /// Unique identifier for graph construction
    id: TensorId,
}

impl Tensor {
    /// Create a new tensor from a slice with the given shape.
    ///
    /// Gradient tracking is disabled by default.
    ///
    /// # Panics
    ///
    /// Panics if the data length doesn't match the product of shape
    /// dimensions.
    #[must_use]
    pub fn new(data: &[f32], shape: &[usize]) -> Self {
        let expected_len: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_len,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_len
        );

        Self {
            data: Vector::from_slice(data),
            shape: shape.to_vec(),
            grad: None,
            requires_grad: false,
            is_leaf: true,
            grad_fn: None,
            id: TensorId::new(),
        }
    }

    /// Create a tensor from a 1D slice.
    #[must_use]
    pub fn from_slice(data: &[f32]) -> Self {
        Self::new(data, &[data.len()])
    }

    /// Create a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        let len: usize = shape.iter().product();
        Self::new(&vec![0.0; len], shape)
    }

    /// Create a tensor filled with ones.
    #[must_use]
    pub fn ones(shape: &[usize]) -> Self {
        let len: usize = shape.iter().product();
        Self::new(&vec![1.0; len], shape)
    }

    /// Create a tensor filled with a constant value.
    #[must_use]
    pub fn full(shape: &[usize], value: f32) -> Self {
        let len: usize = shape.iter().product();
        Self::new(&vec![value; len], shape)
    }

    /// Create a zero tensor with the same shape as another.
    #[must_use]
    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(&other.shape)
    }

    /// Create a ones tensor with the same shape as another.
    #[must_use]
    pub fn ones_like(other: &Tensor) -> Self {
        Self::ones(&other.shape)
    }

    /// Enable gradient tracking for this tensor.
    ///
    /// Returns self for method chaining.
    #[must_use]
    pub fn requires_grad(mut self) -> Self {
        self.requires_grad = true;
        self
    }

    /// Enable or disable gradient tracking (in-place).
    pub fn requires_grad_(&mut self, requires: bool) -> &mut Self {
        self.requires_grad = requires;
        self
    }

    /// Check if this tensor requires gradient computation.
    #[must_use]
    pub fn requires_grad_enabled(&self) -> bool {
        self.requires_grad
    }

    /// Check if this is a leaf tensor (not created by an operation).
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// Get the tensor's unique identifier.
    #[must_use]
    pub fn id(&self) -> TensorId {
        self.id
    }

    /// Get the shape of the tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Get the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get a reference to the underlying data.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        self.data.as_slice()
    }

    /// Get a mutable reference to the underlying data.
    ///
    /// # Warning
    ///
    /// Modifying data directly may invalidate recorded gradients.
    pub fn data_mut(&mut self) -> &mut [f32] {
        self.data.as_mut_slice()
    }

    /// Get the gradient tensor (if computed).
    #[must_use]
    pub fn grad(&self) -> Option<&Tensor> {
        self.grad.as_deref()
    }

    /// Zero out the gradient.
    pub fn zero_grad_(&mut self) {
        self.grad = None;
    }

    /// Clear the gradient (alias for `zero_grad_`).
    pub fn clear_grad(&mut self) {
        self.grad = None;
    }

    /// Accumulate gradient (used during backward pass).
    pub(crate) fn accumulate_grad(&mut self, grad: Tensor) {
        match &mut self.grad {
            Some(existing) => {
                let new_data: Vec<f32> = existing
                    .data()
                    .iter()
                    .zip(grad.data().iter())
                    .map(|(a, b)| a + b)
                    .collect();
                **existing = Tensor::new(&new_data, &self.shape);
            }
            None => {
                self.grad = Some(Box::new(grad));
            }
        }
    }

    /// Set the gradient function (used internally by operations).
    pub(crate) fn set_grad_fn(&mut self, grad_fn: Arc<dyn GradFn>) {
        self.grad_fn = Some(grad_fn);
        self.is_leaf = false;
    }

    /// Detach tensor from the computation graph.
    ///
    /// Returns a new leaf with the same data and no gradient tracking.
    #[must_use]
    pub fn detach(&self) -> Tensor {
        Tensor {
            data: self.data.clone(),
            shape: self.shape.clone(),
            grad: None,
            requires_grad: false,
            is_leaf: true,
            grad_fn: None,
            id: TensorId::new(),
        }
    }

    /// Get a scalar value (for 1-element tensors).
    ///
    /// # Panics
    ///
    /// Panics if the tensor has more than one element.
    #[must_use]
    pub fn item(&self) -> f32 {
        assert_eq!(
            self.numel(),
            1,
            "item() only works on tensors with exactly 1 element, got {}",
            self.numel()
        );
        self.data[0]
    }

    /// Compute gradients via reverse-mode backpropagation.
    ///
    /// # Panics
    ///
    /// Panics if called on a tensor with more than one element
    /// (use `backward_with_grad` for non-scalar outputs).
    pub fn backward(&self) {
        assert_eq!(
            self.numel(),
            1,
            "backward() requires scalar output, got shape {:?}. Use backward_with_grad() instead.",
            self.shape
        );

        self.backward_with_grad(Tensor::ones(&self.shape));
    }

    /// Compute gradients seeding the backward pass with `grad_output`.
    pub fn backward_with_grad(&self, grad_output: Tensor) {
        with_graph(|graph| {
            graph.backward(self.id, grad_output);
        });
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad)
            .field("is_leaf", &self.is_leaf)
            .field("has_grad", &self.grad.is_some())
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_creation() {
        let t = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.numel(), 6);
        assert_eq!(t.ndim(), 2);
        assert!(t.is_leaf());
    }

    #[test]
    #[should_panic(expected = "doesn't match shape")]
    fn test_tensor_creation_wrong_len() {
        let _ = Tensor::new(&[1.0, 2.0, 3.0], &[2, 2]);
    }

    #[test]
    fn test_tensor_from_slice() {
        let t = Tensor::from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(t.shape(), &[3]);
    }

    #[test]
    fn test_fill_constructors() {
        let z = Tensor::zeros(&[2, 3]);
        assert!(z.data().iter().all(|&x| x == 0.0));

        let o = Tensor::ones(&[2, 3]);
        assert!(o.data().iter().all(|&x| x == 1.0));

        let f = Tensor::full(&[4], 1.5);
        assert!(f.data().iter().all(|&x| x == 1.5));

        let zl = Tensor::zeros_like(&o);
        assert_eq!(zl.shape(), o.shape());
    }

    #[test]
    fn test_requires_grad_builder() {
        let t = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
        assert!(t.requires_grad_enabled());

        let mut t2 = Tensor::from_slice(&[1.0, 2.0]);
        assert!(!t2.requires_grad_enabled());
        t2.requires_grad_(true);
        assert!(t2.requires_grad_enabled());
    }

    #[test]
    fn test_detach_drops_tracking() {
        let t = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
        let d = t.detach();

        assert!(t.requires_grad_enabled());
        assert!(!d.requires_grad_enabled());
        assert!(d.is_leaf());
        assert_ne!(t.id(), d.id());
        assert_eq!(t.data(), d.data());
    }

    #[test]
    fn test_item() {
        let t = Tensor::new(&[42.0], &[1]);
        assert_eq!(t.item(), 42.0);
    }

    #[test]
    #[should_panic(expected = "item() only works on tensors with exactly 1 element")]
    fn test_item_panics_multi_element() {
        let t = Tensor::from_slice(&[1.0, 2.0]);
        let _ = t.item();
    }

    #[test]
    fn test_clone_preserves_id() {
        let t = Tensor::from_slice(&[1.0]);
        let c = t.clone();
        assert_eq!(t.id(), c.id());
    }

    #[test]
    fn test_gradient_accumulation() {
        let mut t = Tensor::from_slice(&[1.0, 2.0, 3.0]).requires_grad();

        t.accumulate_grad(Tensor::from_slice(&[0.5, 0.5, 0.5]));
        let first = t
            .grad()
            .expect("grad should exist after accumulate")
            .data()
            .to_vec();
        assert_eq!(first, vec![0.5, 0.5, 0.5]);

        t.accumulate_grad(Tensor::from_slice(&[1.0, 1.0, 1.0]));
        let second = t
            .grad()
            .expect("grad should exist after second accumulate")
            .data()
            .to_vec();
        assert_eq!(second, vec![1.5, 1.5, 1.5]);

        t.zero_grad_();
        assert!(t.grad().is_none());
    }
}
