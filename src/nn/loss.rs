//! Differentiable loss functions for classifier training.
//!
//! The loss here works with autograd [`Tensor`]s and supports
//! backpropagation for gradient-based optimization.
//!
//! # Example
//!
//! ```ignore
//! use podar::nn::loss::CrossEntropyLoss;
//! use podar::autograd::Tensor;
//!
//! let criterion = CrossEntropyLoss::new();
//! let logits = Tensor::new(&[1.0, 2.0, 0.5, 0.1, 3.0, 0.2], &[2, 3]).requires_grad();
//! let targets = Tensor::from_slice(&[1.0, 2.0]); // class indices
//! let loss = criterion.forward(&logits, &targets);
//! ```
//!
//! # References
//!
//! - Bishop, C. M. (2006). Pattern Recognition and Machine Learning. Springer.

use crate::autograd::grad_fn::CrossEntropyBackward;
use crate::autograd::{is_grad_enabled, with_graph, Tensor};
use std::sync::Arc;

/// Cross-Entropy loss for multi-class classification.
///
/// Combines log-softmax and negative log-likelihood in one step for
/// numerical stability, and averages over the batch:
///
/// ```text
/// loss = mean_b(-log(softmax(logits_b)[target_b]))
/// ```
///
/// # Arguments
///
/// * `logits` - Raw model outputs, shape [batch, num_classes]
/// * `targets` - Target class indices, shape [batch]
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self
    }

    /// Compute mean cross-entropy loss over the batch.
    ///
    /// # Arguments
    ///
    /// * `logits` - Shape [batch, num_classes]
    /// * `targets` - Shape [batch], integer class indices (as f32)
    pub fn forward(&self, logits: &Tensor, targets: &Tensor) -> Tensor {
        assert_eq!(logits.ndim(), 2, "Logits must be 2D [batch, classes]");
        assert_eq!(targets.ndim(), 1, "Targets must be 1D [batch]");
        assert_eq!(
            logits.shape()[0],
            targets.shape()[0],
            "Batch sizes must match"
        );

        let batch_size = logits.shape()[0];
        let num_classes = logits.shape()[1];

        // Softmax is retained for the backward pass
        let softmax_output = softmax_2d(logits);

        // log_softmax keeps the loss itself numerically stable
        let log_probs = log_softmax(logits);

        let target_indices: Vec<usize> = targets
            .data()
            .iter()
            .map(|&t| {
                let idx = t as usize;
                assert!(
                    idx < num_classes,
                    "Target class {idx} out of bounds for {num_classes} classes"
                );
                idx
            })
            .collect();

        // Negative log likelihood of the target class, averaged over the batch
        let mut total = 0.0;
        for (b, &target_class) in target_indices.iter().enumerate() {
            total -= log_probs.data()[b * num_classes + target_class];
        }
        let mut loss = Tensor::from_slice(&[total / batch_size as f32]);

        if is_grad_enabled() && logits.requires_grad_enabled() {
            loss.requires_grad_(true);
            let grad_fn = Arc::new(CrossEntropyBackward {
                softmax_output: softmax_output.clone(),
                targets: target_indices,
            });
            loss.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(logits.clone());
                graph.record(loss.id(), grad_fn, vec![logits.id()]);
            });
        }

        loss
    }
}

/// Compute softmax along the last dimension of a 2D tensor.
fn softmax_2d(x: &Tensor) -> Tensor {
    assert_eq!(x.ndim(), 2);

    let (batch, features) = (x.shape()[0], x.shape()[1]);
    let mut output = vec![0.0; batch * features];

    for b in 0..batch {
        let row_start = b * features;

        // Find max for numerical stability
        let max_val = x.data()[row_start..row_start + features]
            .iter()
            .fold(f32::NEG_INFINITY, |a, &b| a.max(b));

        // Compute exp(x - max)
        let mut sum = 0.0;
        for j in 0..features {
            let exp_val = (x.data()[row_start + j] - max_val).exp();
            output[row_start + j] = exp_val;
            sum += exp_val;
        }

        // Normalize
        for j in 0..features {
            output[row_start + j] /= sum;
        }
    }

    Tensor::new(&output, x.shape())
}

/// Compute log-softmax along the last dimension of a 2D tensor.
fn log_softmax(x: &Tensor) -> Tensor {
    assert_eq!(x.ndim(), 2);

    let (batch, features) = (x.shape()[0], x.shape()[1]);
    let mut output = vec![0.0; batch * features];

    for b in 0..batch {
        let row_start = b * features;

        // Find max for numerical stability
        let max_val = x.data()[row_start..row_start + features]
            .iter()
            .fold(f32::NEG_INFINITY, |a, &b| a.max(b));

        // Compute log(sum(exp(x - max)))
        let log_sum_exp: f32 = x.data()[row_start..row_start + features]
            .iter()
            .map(|&v| (v - max_val).exp())
            .sum::<f32>()
            .ln();

        // log_softmax = x - max - log_sum_exp
        for j in 0..features {
            output[row_start + j] = x.data()[row_start + j] - max_val - log_sum_exp;
        }
    }

    Tensor::new(&output, x.shape())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad};

    #[test]
    fn test_cross_entropy_uniform_logits() {
        // Equal logits over 10 classes: loss = -log(1/10) = ln(10)
        let criterion = CrossEntropyLoss::new();
        let logits = Tensor::new(&[0.0; 20], &[2, 10]);
        let targets = Tensor::from_slice(&[3.0, 7.0]);

        let loss = criterion.forward(&logits, &targets);

        assert_eq!(loss.shape(), &[1]);
        assert!((loss.item() - 10.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_cross_entropy_confident_prediction() {
        // A large logit on the target class drives the loss toward zero
        let criterion = CrossEntropyLoss::new();
        let logits = Tensor::new(&[10.0, 0.0, 0.0], &[1, 3]);
        let targets = Tensor::from_slice(&[0.0]);

        let loss = criterion.forward(&logits, &targets);
        assert!(loss.item() < 0.01);

        // The same logit on a wrong class drives it up
        let bad_targets = Tensor::from_slice(&[1.0]);
        let bad_loss = criterion.forward(&logits, &bad_targets);
        assert!(bad_loss.item() > 5.0);
    }

    #[test]
    fn test_cross_entropy_mean_over_batch() {
        let criterion = CrossEntropyLoss::new();

        let l0 = criterion.forward(
            &Tensor::new(&[2.0, 0.0], &[1, 2]),
            &Tensor::from_slice(&[0.0]),
        );
        let l1 = criterion.forward(
            &Tensor::new(&[0.0, 1.0], &[1, 2]),
            &Tensor::from_slice(&[1.0]),
        );
        let both = criterion.forward(
            &Tensor::new(&[2.0, 0.0, 0.0, 1.0], &[2, 2]),
            &Tensor::from_slice(&[0.0, 1.0]),
        );

        let expected = (l0.item() + l1.item()) / 2.0;
        assert!((both.item() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_gradient() {
        clear_graph();

        let criterion = CrossEntropyLoss::new();
        let logits = Tensor::new(&[1.0, 2.0, 0.5, 0.1, 3.0, 0.2], &[2, 3]).requires_grad();
        let targets = Tensor::from_slice(&[1.0, 2.0]);

        let loss = criterion.forward(&logits, &targets);
        loss.backward();

        let grad = get_grad(logits.id()).unwrap();
        assert_eq!(grad.shape(), &[2, 3]);

        // Gradient is (softmax - onehot)/batch: rows sum to zero and the
        // target entry is negative
        for b in 0..2 {
            let row: f32 = grad.data()[b * 3..(b + 1) * 3].iter().sum();
            assert!(row.abs() < 1e-6);
        }
        assert!(grad.data()[1] < 0.0);
        assert!(grad.data()[5] < 0.0);

        clear_graph();
    }

    #[test]
    fn test_cross_entropy_gradient_matches_softmax() {
        clear_graph();

        let criterion = CrossEntropyLoss::new();
        let logits = Tensor::new(&[0.2, -1.0, 0.7], &[1, 3]).requires_grad();
        let targets = Tensor::from_slice(&[2.0]);

        let loss = criterion.forward(&logits, &targets);
        loss.backward();

        let grad = get_grad(logits.id()).unwrap();
        let softmax = softmax_2d(&Tensor::new(&[0.2, -1.0, 0.7], &[1, 3]));
        for c in 0..3 {
            let expected = softmax.data()[c] - if c == 2 { 1.0 } else { 0.0 };
            assert!((grad.data()[c] - expected).abs() < 1e-6);
        }

        clear_graph();
    }

    #[test]
    fn test_log_softmax_sums_to_one_in_prob_space() {
        let x = Tensor::new(&[1.0, 2.0, 3.0, -1.0, 0.0, 1.0], &[2, 3]);
        let lp = log_softmax(&x);
        for b in 0..2 {
            let total: f32 = lp.data()[b * 3..(b + 1) * 3].iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_cross_entropy_rejects_bad_target() {
        let criterion = CrossEntropyLoss::new();
        let logits = Tensor::new(&[1.0, 2.0], &[1, 2]);
        let targets = Tensor::from_slice(&[5.0]);
        criterion.forward(&logits, &targets);
    }
}
