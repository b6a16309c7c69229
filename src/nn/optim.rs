//! Gradient-based optimizer for network training.
//!
//! Works with autograd Tensors to update parameters from computed
//! gradients. Parameters whose gradient is absent after a backward pass
//! (frozen tensors, for example a normalization scale held fixed under
//! gating) are simply skipped.
//!
//! # Example
//!
//! ```ignore
//! use podar::nn::{Linear, Module, optim::Adam};
//! use podar::nn::loss::CrossEntropyLoss;
//! use podar::autograd::{clear_graph, Tensor};
//!
//! let mut model = Linear::new(10, 5);
//! let mut optimizer = Adam::new(model.parameters_mut(), 1e-3);
//!
//! for _ in 0..100 {
//!     clear_graph();
//!     let pred = model.forward(&x);
//!     let loss = CrossEntropyLoss::new().forward(&pred, &y);
//!     loss.backward();
//!     optimizer.step_with_params(&mut model.parameters_mut());
//!     optimizer.zero_grad();
//! }
//! ```
//!
//! # References
//!
//! - Kingma, D. P., & Ba, J. (2015). Adam: A method for stochastic optimization. ICLR.

use crate::autograd::{get_grad, Tensor, TensorId};

/// Common trait for optimizers.
pub trait Optimizer {
    /// Perform a single optimization step using computed gradients.
    fn step(&mut self);

    /// Zero all parameter gradients.
    fn zero_grad(&mut self);

    /// Get current learning rate.
    fn lr(&self) -> f32;

    /// Set learning rate (for schedulers).
    fn set_lr(&mut self, lr: f32);
}

/// Adam optimizer (Kingma & Ba, 2015).
///
/// Adaptive learning rates with bias-corrected first and second moment
/// estimates:
///
/// ```text
/// m_t = β₁ * m_{t-1} + (1 - β₁) * grad
/// v_t = β₂ * v_{t-1} + (1 - β₂) * grad²
/// m̂_t = m_t / (1 - β₁ᵗ)
/// v̂_t = v_t / (1 - β₂ᵗ)
/// param = param - lr * m̂_t / (√v̂_t + ε)
/// ```
#[derive(Debug)]
pub struct Adam {
    param_ids: Vec<TensorId>,
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    /// First moment estimates
    m: Vec<Vec<f32>>,
    /// Second moment estimates
    v: Vec<Vec<f32>>,
    /// Current timestep for bias correction
    pub(crate) t: usize,
    pub(crate) initialized: bool,
}

impl Adam {
    /// Create a new Adam optimizer with default hyperparameters.
    ///
    /// Default: β₁=0.9, β₂=0.999, ε=1e-8
    #[allow(clippy::needless_pass_by_value)]
    #[must_use]
    pub fn new(params: Vec<&mut Tensor>, lr: f32) -> Self {
        let param_ids: Vec<TensorId> = params.iter().map(|p| p.id()).collect();
        Self {
            param_ids,
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
            initialized: false,
        }
    }

    /// Set beta parameters.
    #[must_use]
    pub fn betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    /// Set epsilon for numerical stability.
    #[must_use]
    pub fn eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Set weight decay (L2 regularization, applied to gradient).
    #[must_use]
    pub fn weight_decay(mut self, wd: f32) -> Self {
        self.weight_decay = wd;
        self
    }

    fn update_param(&mut self, param: &mut Tensor, idx: usize) {
        let Some(grad) = get_grad(param.id()) else {
            return;
        };

        let grad_data = grad.data();
        let param_data = param.data_mut();

        // Initialize this slot's state on first use. A parameter can
        // see its first gradient after the optimizer's first step, so
        // the check is per slot, not a global flag.
        if idx >= self.m.len() {
            self.m.resize(idx + 1, Vec::new());
            self.v.resize(idx + 1, Vec::new());
        }
        if self.m[idx].len() != param_data.len() {
            self.m[idx] = vec![0.0; param_data.len()];
            self.v[idx] = vec![0.0; param_data.len()];
        }

        let m = &mut self.m[idx];
        let v = &mut self.v[idx];

        // Bias correction factors
        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);

        for i in 0..param_data.len() {
            let mut g = grad_data[i];

            // L2 regularization (applied to gradient, not decoupled)
            if self.weight_decay != 0.0 {
                g += self.weight_decay * param_data[i];
            }

            // Update biased first moment estimate
            m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;

            // Update biased second moment estimate
            v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;

            // Compute bias-corrected estimates
            let m_hat = m[i] / bias_correction1;
            let v_hat = v[i] / bias_correction2;

            // Update parameter
            param_data[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }

    /// Perform optimization step with direct tensor access.
    pub fn step_with_params(&mut self, params: &mut [&mut Tensor]) {
        self.t += 1;
        for (idx, param) in params.iter_mut().enumerate() {
            self.update_param(param, idx);
        }
        self.initialized = true;
    }
}

impl Optimizer for Adam {
    fn step(&mut self) {
        self.t += 1;
        self.initialized = true;
    }

    fn zero_grad(&mut self) {
        for &id in &self.param_ids {
            crate::autograd::clear_grad(id);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::clear_graph;

    fn squared_sum(param: &Tensor) -> Tensor {
        param.mul(param).sum()
    }

    #[test]
    fn test_adam_basic() {
        clear_graph();

        let mut param = Tensor::from_slice(&[1.0, 2.0]).requires_grad();

        let loss = squared_sum(&param);
        loss.backward();

        let mut adam = Adam::new(vec![&mut param], 0.1);
        adam.step_with_params(&mut [&mut param]);

        // After one step, params should decrease
        assert!(param.data()[0] < 1.0);
        assert!(param.data()[1] < 2.0);
    }

    #[test]
    fn test_adam_first_step_magnitude() {
        clear_graph();

        let mut param = Tensor::from_slice(&[5.0]).requires_grad();

        let loss = squared_sum(&param);
        loss.backward();

        let mut adam = Adam::new(vec![&mut param], 0.1);
        adam.step_with_params(&mut [&mut param]);

        // On the first step bias correction cancels the moment decay, so
        // the update is lr * g / (|g| + eps) ≈ lr
        assert!((param.data()[0] - 4.9).abs() < 1e-4);
    }

    #[test]
    fn test_adam_convergence() {
        // Adam should minimize a simple quadratic
        clear_graph();

        let mut param = Tensor::from_slice(&[5.0]).requires_grad();
        let mut adam = Adam::new(vec![&mut param], 0.5);

        for _ in 0..100 {
            clear_graph();
            let loss = squared_sum(&param);
            loss.backward();
            adam.step_with_params(&mut [&mut param]);
        }

        assert!(
            param.data()[0].abs() < 0.1,
            "Parameter should converge to 0, got {}",
            param.data()[0]
        );
    }

    #[test]
    fn test_adam_skips_param_without_grad() {
        clear_graph();

        let mut trained = Tensor::from_slice(&[1.0]).requires_grad();
        let mut frozen = Tensor::from_slice(&[7.0]);

        let loss = squared_sum(&trained);
        loss.backward();

        let mut adam = Adam::new(vec![&mut trained, &mut frozen], 0.1);
        adam.step_with_params(&mut [&mut trained, &mut frozen]);

        assert!(trained.data()[0] < 1.0);
        assert_eq!(frozen.data()[0], 7.0);
    }

    #[test]
    fn test_adam_with_custom_betas() {
        clear_graph();

        let mut param = Tensor::from_slice(&[1.0]).requires_grad();

        let loss = squared_sum(&param);
        loss.backward();

        let mut adam = Adam::new(vec![&mut param], 0.1).betas(0.8, 0.99);
        adam.step_with_params(&mut [&mut param]);

        assert!(param.data()[0] < 1.0);
    }

    #[test]
    fn test_adam_with_eps() {
        clear_graph();

        let mut param = Tensor::from_slice(&[1.0]).requires_grad();

        let loss = squared_sum(&param);
        loss.backward();

        let mut adam = Adam::new(vec![&mut param], 0.1).eps(1e-6);
        adam.step_with_params(&mut [&mut param]);

        assert!(param.data()[0] < 1.0);
    }

    #[test]
    fn test_adam_with_weight_decay() {
        clear_graph();

        let mut param = Tensor::from_slice(&[10.0]).requires_grad();

        let loss = squared_sum(&param);
        loss.backward();

        let mut adam = Adam::new(vec![&mut param], 0.1).weight_decay(0.1);
        adam.step_with_params(&mut [&mut param]);

        assert!(param.data()[0] < 10.0);
    }

    #[test]
    fn test_zero_grad() {
        clear_graph();

        let mut param = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
        let param_id = param.id();

        let loss = squared_sum(&param);
        loss.backward();

        assert!(get_grad(param_id).is_some());

        let mut adam = Adam::new(vec![&mut param], 0.1);
        adam.zero_grad();

        assert!(get_grad(param_id).is_none());
    }

    #[test]
    fn test_learning_rate_change() {
        let mut param = Tensor::from_slice(&[1.0]).requires_grad();
        let mut adam = Adam::new(vec![&mut param], 0.1);

        assert!((adam.lr() - 0.1).abs() < 1e-6);

        adam.set_lr(0.01);
        assert!((adam.lr() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_adam_step_trait() {
        let mut param = Tensor::from_slice(&[1.0]).requires_grad();
        let mut adam = Adam::new(vec![&mut param], 0.1);

        adam.step();
        assert!(adam.initialized);
        assert_eq!(adam.t, 1);
    }
}
