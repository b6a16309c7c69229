//! Computation graph for automatic differentiation.
//!
//! Tape-based recording of operations and the reverse-order backward
//! pass that drives training.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::grad_fn::GradFn;
use super::tensor::{Tensor, TensorId};

/// Entry in the computation tape.
#[derive(Clone)]
pub(crate) struct TapeEntry {
    /// ID of the output tensor
    pub output_id: TensorId,

    /// Function to compute gradients
    pub grad_fn: Arc<dyn GradFn>,

    /// IDs of input tensors
    pub input_ids: Vec<TensorId>,
}

/// Computation graph that records operations for the backward pass.
///
/// Operations append to a tape in forward order; `backward` replays the
/// tape in reverse, propagating gradients from the output toward the
/// leaves and accumulating where a tensor feeds several ops.
///
/// # Thread Safety
///
/// Each thread owns its graph (`thread_local` in the parent module), so
/// recording needs no synchronization.
#[allow(missing_debug_implementations)]
pub struct ComputationGraph {
    /// Recorded operations (tape)
    tape: Vec<TapeEntry>,

    /// Map from tensor ID to tensor (leaf tensors that need gradients)
    tensors: HashMap<TensorId, Tensor>,

    /// Set of tensor IDs that require gradients
    requires_grad: HashSet<TensorId>,
}

impl ComputationGraph {
    /// Create a new empty computation graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tape: Vec::new(),
            tensors: HashMap::new(),
            requires_grad: HashSet::new(),
        }
    }

    /// Clear all recorded operations and registered tensors.
    pub fn clear(&mut self) {
        self.tape.clear();
        self.tensors.clear();
        self.requires_grad.clear();
    }

    /// Register a tensor so the backward pass can deposit its gradient.
    pub fn register_tensor(&mut self, tensor: Tensor) {
        if tensor.requires_grad_enabled() {
            self.requires_grad.insert(tensor.id());
        }
        self.tensors.insert(tensor.id(), tensor);
    }

    /// Record an operation to the tape.
    pub fn record(
        &mut self,
        output_id: TensorId,
        grad_fn: Arc<dyn GradFn>,
        input_ids: Vec<TensorId>,
    ) {
        self.tape.push(TapeEntry {
            output_id,
            grad_fn,
            input_ids,
        });
    }

    /// Get a registered tensor by ID.
    #[must_use]
    pub fn get_tensor(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.get(&id)
    }

    /// Get a registered tensor mutably by ID.
    pub fn get_tensor_mut(&mut self, id: TensorId) -> Option<&mut Tensor> {
        self.tensors.get_mut(&id)
    }

    /// Compute gradients via backpropagation.
    ///
    /// Seeds `grad_output` for the output tensor, walks the tape in
    /// reverse, asks each entry's grad_fn for input gradients, and
    /// accumulates per tensor ID. Entries whose output never received a
    /// gradient are skipped (they are off the differentiation path).
    /// Finally the accumulated gradients are stored into the registered
    /// leaf tensors that require them.
    pub fn backward(&mut self, output_id: TensorId, grad_output: Tensor) {
        let mut grads: HashMap<TensorId, Tensor> = HashMap::new();
        grads.insert(output_id, grad_output);

        for entry in self.tape.iter().rev() {
            let grad_out = match grads.get(&entry.output_id) {
                Some(g) => g.clone(),
                None => continue,
            };

            let input_grads = entry.grad_fn.backward(&grad_out);

            for (input_id, input_grad) in entry.input_ids.iter().zip(input_grads) {
                grads
                    .entry(*input_id)
                    .and_modify(|existing| {
                        let new_data: Vec<f32> = existing
                            .data()
                            .iter()
                            .zip(input_grad.data().iter())
                            .map(|(a, b)| a + b)
                            .collect();
                        *existing = Tensor::new(&new_data, existing.shape());
                    })
                    .or_insert(input_grad);
            }
        }

        for (id, grad) in grads {
            if let Some(tensor) = self.tensors.get_mut(&id) {
                if tensor.requires_grad_enabled() && tensor.is_leaf() {
                    tensor.accumulate_grad(grad);
                }
            }
        }
    }

    /// Get the number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tape.len()
    }

    /// Check if the tape is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    /// Get gradient for a tensor by ID (after backward).
    #[must_use]
    pub fn get_grad(&self, id: TensorId) -> Option<Tensor> {
        self.tensors.get(&id).and_then(|t| t.grad().cloned())
    }

    /// Clear gradient for a specific tensor.
    pub fn clear_grad(&mut self, id: TensorId) {
        if let Some(tensor) = self.tensors.get_mut(&id) {
            tensor.clear_grad();
        }
    }
}

impl Default for ComputationGraph {
    fn default() -> Self {
        Self::new()
    }
}
