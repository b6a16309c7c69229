//! Differentiable operations for tensors.
//!
//! Each operation computes its forward result, then records a `GradFn`
//! to the computation graph when gradient tracking is enabled. Dense
//! inner loops (matmul, convolution) run through trueno's SIMD kernels.

use std::sync::Arc;

use super::grad_fn::{
    AddBackward, BatchNorm2dBackward, BroadcastAddBackward, Conv2dBackward,
    GlobalAvgPool2dBackward, L1NormBackward, MatmulBackward, MeanBackward, MulBackward,
    MulScalarBackward, NegBackward, ReluBackward, ScaleChannelsBackward, SubBackward, SumBackward,
    TransposeBackward, ViewBackward,
};
use super::tensor::Tensor;
use super::{is_grad_enabled, with_graph};

// ============================================================================
// Element-wise Operations
// ============================================================================

impl Tensor {
    /// Element-wise addition: z = self + other
    #[must_use]
    pub fn add(&self, other: &Tensor) -> Tensor {
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a + b)
            .collect();

        let mut result = Tensor::new(&data, self.shape());

        if is_grad_enabled() && (self.requires_grad_enabled() || other.requires_grad_enabled()) {
            result.requires_grad_(true);
            let grad_fn = Arc::new(AddBackward {
                x_shape: self.shape().to_vec(),
                y_shape: other.shape().to_vec(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.register_tensor(other.clone());
                graph.record(result.id(), grad_fn, vec![self.id(), other.id()]);
            });
        }

        result
    }

    /// Element-wise subtraction: z = self - other
    #[must_use]
    pub fn sub(&self, other: &Tensor) -> Tensor {
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a - b)
            .collect();

        let mut result = Tensor::new(&data, self.shape());

        if is_grad_enabled() && (self.requires_grad_enabled() || other.requires_grad_enabled()) {
            result.requires_grad_(true);
            let grad_fn = Arc::new(SubBackward {
                x_shape: self.shape().to_vec(),
                y_shape: other.shape().to_vec(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.register_tensor(other.clone());
                graph.record(result.id(), grad_fn, vec![self.id(), other.id()]);
            });
        }

        result
    }

    /// Element-wise multiplication: z = self * other
    #[must_use]
    pub fn mul(&self, other: &Tensor) -> Tensor {
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a * b)
            .collect();

        let mut result = Tensor::new(&data, self.shape());

        if is_grad_enabled() && (self.requires_grad_enabled() || other.requires_grad_enabled()) {
            result.requires_grad_(true);
            let grad_fn = Arc::new(MulBackward {
                x: self.clone(),
                y: other.clone(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.register_tensor(other.clone());
                graph.record(result.id(), grad_fn, vec![self.id(), other.id()]);
            });
        }

        result
    }

    /// Element-wise negation: z = -self
    #[must_use]
    pub fn neg(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| -a).collect();

        let mut result = Tensor::new(&data, self.shape());

        if is_grad_enabled() && self.requires_grad_enabled() {
            result.requires_grad_(true);
            let grad_fn = Arc::new(NegBackward);
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.record(result.id(), grad_fn, vec![self.id()]);
            });
        }

        result
    }

    /// Scalar multiplication: z = self * scalar
    #[must_use]
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a * scalar).collect();
        let mut result = Tensor::new(&data, self.shape());

        if is_grad_enabled() && self.requires_grad_enabled() {
            result.requires_grad_(true);
            let grad_fn = Arc::new(MulScalarBackward { scalar });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.record(result.id(), grad_fn, vec![self.id()]);
            });
        }

        result
    }
}

// ============================================================================
// Reduction Operations
// ============================================================================

impl Tensor {
    /// Sum all elements: z = sum(self)
    #[must_use]
    pub fn sum(&self) -> Tensor {
        let sum: f32 = self.data().iter().sum();
        let mut result = Tensor::new(&[sum], &[1]);

        if is_grad_enabled() && self.requires_grad_enabled() {
            result.requires_grad_(true);
            let grad_fn = Arc::new(SumBackward {
                input_shape: self.shape().to_vec(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.record(result.id(), grad_fn, vec![self.id()]);
            });
        }

        result
    }

    /// Mean of all elements: z = mean(self)
    #[must_use]
    pub fn mean(&self) -> Tensor {
        let sum: f32 = self.data().iter().sum();
        let mean = sum / self.numel() as f32;
        let mut result = Tensor::new(&[mean], &[1]);

        if is_grad_enabled() && self.requires_grad_enabled() {
            result.requires_grad_(true);
            let grad_fn = Arc::new(MeanBackward {
                input_shape: self.shape().to_vec(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.record(result.id(), grad_fn, vec![self.id()]);
            });
        }

        result
    }

    /// L1 norm: z = Σ|x_i|, as a 1-element tensor.
    ///
    /// This is the sparsity cost of a gate vector; for the non-negative
    /// vectors produced after ReLU it coincides with `sum`.
    #[must_use]
    pub fn l1_norm(&self) -> Tensor {
        let total: f32 = self.data().iter().map(|&a| a.abs()).sum();
        let mut result = Tensor::new(&[total], &[1]);

        if is_grad_enabled() && self.requires_grad_enabled() {
            result.requires_grad_(true);
            let grad_fn = Arc::new(L1NormBackward { x: self.clone() });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.record(result.id(), grad_fn, vec![self.id()]);
            });
        }

        result
    }
}

// ============================================================================
// Activation Functions
// ============================================================================

impl Tensor {
    /// `ReLU` activation: z = max(0, self)
    #[must_use]
    pub fn relu(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.max(0.0)).collect();
        let mut result = Tensor::new(&data, self.shape());

        if is_grad_enabled() && self.requires_grad_enabled() {
            result.requires_grad_(true);
            let grad_fn = Arc::new(ReluBackward { x: self.clone() });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.record(result.id(), grad_fn, vec![self.id()]);
            });
        }

        result
    }
}

// ============================================================================
// Linear Algebra
// ============================================================================

impl Tensor {
    /// Matrix multiplication: z = self @ other
    ///
    /// Supports 2D tensors only.
    #[must_use]
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");

        let (m, k1) = (self.shape()[0], self.shape()[1]);
        let (k2, n) = (other.shape()[0], other.shape()[1]);
        assert_eq!(k1, k2, "matmul dimension mismatch: {k1} vs {k2}");

        let a_matrix =
            trueno::Matrix::from_vec(m, k1, self.data().to_vec()).expect("valid matrix dimensions");
        let b_matrix = trueno::Matrix::from_vec(k2, n, other.data().to_vec())
            .expect("valid matrix dimensions");
        let result_matrix = a_matrix.matmul(&b_matrix).expect("matmul should succeed");
        let data = result_matrix.as_slice().to_vec();

        let mut result = Tensor::new(&data, &[m, n]);

        if is_grad_enabled() && (self.requires_grad_enabled() || other.requires_grad_enabled()) {
            result.requires_grad_(true);
            let grad_fn = Arc::new(MatmulBackward {
                x: self.clone(),
                y: other.clone(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.register_tensor(other.clone());
                graph.record(result.id(), grad_fn, vec![self.id(), other.id()]);
            });
        }

        result
    }

    /// Transpose a 2D tensor.
    #[must_use]
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires 2D tensor");

        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let mut data = vec![0.0; rows * cols];

        for i in 0..rows {
            for j in 0..cols {
                data[j * rows + i] = self.data()[i * cols + j];
            }
        }

        let mut result = Tensor::new(&data, &[cols, rows]);

        if is_grad_enabled() && self.requires_grad_enabled() {
            result.requires_grad_(true);
            let grad_fn = Arc::new(TransposeBackward);
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.record(result.id(), grad_fn, vec![self.id()]);
            });
        }

        result
    }

    /// Broadcast addition: z = matrix + vector (broadcasts over rows).
    ///
    /// Adds a bias vector to each row of a 2D matrix.
    ///
    /// # Shape
    ///
    /// - self: `[N, M]`
    /// - other: `[M]`
    /// - output: `[N, M]`
    #[must_use]
    pub fn broadcast_add(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "broadcast_add requires 2D matrix");
        assert_eq!(other.ndim(), 1, "broadcast_add requires 1D vector");
        assert_eq!(
            self.shape()[1],
            other.shape()[0],
            "Matrix columns {} must match vector length {}",
            self.shape()[1],
            other.shape()[0]
        );

        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let mut data = vec![0.0; rows * cols];

        for i in 0..rows {
            for j in 0..cols {
                data[i * cols + j] = self.data()[i * cols + j] + other.data()[j];
            }
        }

        let mut result = Tensor::new(&data, self.shape());

        if is_grad_enabled() && (self.requires_grad_enabled() || other.requires_grad_enabled()) {
            result.requires_grad_(true);
            let grad_fn = Arc::new(BroadcastAddBackward {
                x_shape: self.shape().to_vec(),
                y_shape: other.shape().to_vec(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.register_tensor(other.clone());
                graph.record(result.id(), grad_fn, vec![self.id(), other.id()]);
            });
        }

        result
    }

    /// Reshape tensor to a new shape (view).
    ///
    /// The total number of elements must remain the same.
    #[must_use]
    pub fn view(&self, new_shape: &[usize]) -> Tensor {
        let old_numel: usize = self.shape().iter().product();
        let new_numel: usize = new_shape.iter().product();
        assert_eq!(
            old_numel, new_numel,
            "view: number of elements must match ({old_numel} vs {new_numel})"
        );

        let mut result = Tensor::new(self.data(), new_shape);

        if is_grad_enabled() && self.requires_grad_enabled() {
            result.requires_grad_(true);
            let grad_fn = Arc::new(ViewBackward {
                input_shape: self.shape().to_vec(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.record(result.id(), grad_fn, vec![self.id()]);
            });
        }

        result
    }
}

// ============================================================================
// Convolution and Pooling
// ============================================================================

impl Tensor {
    /// 2D convolution over a (N, C, H, W) input.
    ///
    /// The kernel slides with the given stride over the zero-padded
    /// input. Forward runs as im2col plus one GEMM per sample.
    ///
    /// # Shape
    ///
    /// - self: `[N, C_in, H, W]`
    /// - weight: `[C_out, C_in, KH, KW]`
    /// - bias: `[C_out]` when present
    /// - output: `[N, C_out, OH, OW]` with `OH = (H + 2·pad - KH)/stride + 1`
    ///
    /// # Panics
    ///
    /// Panics on dimension mismatches or a kernel larger than the
    /// padded input.
    #[must_use]
    pub fn conv2d(
        &self,
        weight: &Tensor,
        bias: Option<&Tensor>,
        stride: usize,
        padding: usize,
    ) -> Tensor {
        assert_eq!(self.ndim(), 4, "conv2d expects (N, C, H, W) input");
        assert_eq!(weight.ndim(), 4, "conv2d expects (O, I, KH, KW) weight");
        assert!(stride > 0, "conv2d stride must be positive");

        let (n, c_in, h, w) = (
            self.shape()[0],
            self.shape()[1],
            self.shape()[2],
            self.shape()[3],
        );
        let (c_out, w_c_in, kh, kw) = (
            weight.shape()[0],
            weight.shape()[1],
            weight.shape()[2],
            weight.shape()[3],
        );
        assert_eq!(c_in, w_c_in, "conv2d channel mismatch: {c_in} vs {w_c_in}");
        assert!(
            h + 2 * padding >= kh && w + 2 * padding >= kw,
            "conv2d kernel ({kh}x{kw}) larger than padded input ({h}x{w}, padding {padding})"
        );
        if let Some(b) = bias {
            assert_eq!(b.numel(), c_out, "conv2d bias length must equal C_out");
        }

        let oh = (h + 2 * padding - kh) / stride + 1;
        let ow = (w + 2 * padding - kw) / stride + 1;
        let k = c_in * kh * kw;
        let plane_out = oh * ow;

        let w_matrix = trueno::Matrix::from_vec(c_out, k, weight.data().to_vec())
            .expect("valid matrix dimensions");

        let x = self.data();
        let mut output = vec![0.0f32; n * c_out * plane_out];

        for b in 0..n {
            // im2col: (C_in·KH·KW, OH·OW) patch matrix for this sample
            let mut col = vec![0.0f32; k * plane_out];
            for i in 0..c_in {
                for ky in 0..kh {
                    for kx in 0..kw {
                        let row = (i * kh + ky) * kw + kx;
                        for y in 0..oh {
                            let iy = y * stride + ky;
                            if iy < padding || iy - padding >= h {
                                continue;
                            }
                            let iy = iy - padding;
                            for xo in 0..ow {
                                let ix = xo * stride + kx;
                                if ix < padding || ix - padding >= w {
                                    continue;
                                }
                                let ix = ix - padding;
                                col[row * plane_out + y * ow + xo] =
                                    x[((b * c_in + i) * h + iy) * w + ix];
                            }
                        }
                    }
                }
            }

            let col_matrix =
                trueno::Matrix::from_vec(k, plane_out, col).expect("valid matrix dimensions");
            let out_matrix = w_matrix.matmul(&col_matrix).expect("matmul should succeed");
            let base = b * c_out * plane_out;
            output[base..base + c_out * plane_out].copy_from_slice(out_matrix.as_slice());
        }

        if let Some(bias) = bias {
            for b in 0..n {
                for o in 0..c_out {
                    let b_val = bias.data()[o];
                    let base = (b * c_out + o) * plane_out;
                    for v in &mut output[base..base + plane_out] {
                        *v += b_val;
                    }
                }
            }
        }

        let mut result = Tensor::new(&output, &[n, c_out, oh, ow]);

        let needs_grad = self.requires_grad_enabled()
            || weight.requires_grad_enabled()
            || bias.is_some_and(Tensor::requires_grad_enabled);
        if is_grad_enabled() && needs_grad {
            result.requires_grad_(true);
            let grad_fn = Arc::new(Conv2dBackward {
                input: self.clone(),
                weight: weight.clone(),
                stride,
                padding,
                has_bias: bias.is_some(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.register_tensor(weight.clone());
                let mut input_ids = vec![self.id(), weight.id()];
                if let Some(bias) = bias {
                    graph.register_tensor(bias.clone());
                    input_ids.push(bias.id());
                }
                graph.record(result.id(), grad_fn, input_ids);
            });
        }

        result
    }

    /// Batch normalization over (N, H, W) per channel.
    ///
    /// `mean` and `var` must be the batch statistics of `self`, one
    /// value per channel; the recorded gradient accounts for their
    /// dependence on the input. The evaluation path (running
    /// statistics) does not use this op.
    ///
    /// # Shape
    ///
    /// - self: `[N, C, H, W]`
    /// - weight, bias: `[C]`
    /// - output: `[N, C, H, W]`
    #[must_use]
    pub fn batch_norm2d(
        &self,
        weight: &Tensor,
        bias: &Tensor,
        mean: &[f32],
        var: &[f32],
        eps: f32,
    ) -> Tensor {
        assert_eq!(self.ndim(), 4, "batch_norm2d expects (N, C, H, W) input");
        let (n, c, h, w) = (
            self.shape()[0],
            self.shape()[1],
            self.shape()[2],
            self.shape()[3],
        );
        assert_eq!(weight.numel(), c, "batch_norm2d weight length must equal C");
        assert_eq!(bias.numel(), c, "batch_norm2d bias length must equal C");
        assert_eq!(mean.len(), c, "batch_norm2d mean length must equal C");
        assert_eq!(var.len(), c, "batch_norm2d var length must equal C");

        let plane = h * w;
        let inv_std: Vec<f32> = var.iter().map(|&v| 1.0 / (v + eps).sqrt()).collect();

        let x = self.data();
        let gamma = weight.data();
        let beta = bias.data();
        let mut x_hat = vec![0.0f32; n * c * plane];
        let mut output = vec![0.0f32; n * c * plane];

        for b in 0..n {
            for ch in 0..c {
                let base = (b * c + ch) * plane;
                for idx in base..base + plane {
                    let xh = (x[idx] - mean[ch]) * inv_std[ch];
                    x_hat[idx] = xh;
                    output[idx] = gamma[ch] * xh + beta[ch];
                }
            }
        }

        let mut result = Tensor::new(&output, self.shape());

        if is_grad_enabled()
            && (self.requires_grad_enabled()
                || weight.requires_grad_enabled()
                || bias.requires_grad_enabled())
        {
            result.requires_grad_(true);
            let grad_fn = Arc::new(BatchNorm2dBackward {
                x_hat: Tensor::new(&x_hat, self.shape()),
                inv_std,
                weight: gamma.to_vec(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.register_tensor(weight.clone());
                graph.register_tensor(bias.clone());
                graph.record(result.id(), grad_fn, vec![self.id(), weight.id(), bias.id()]);
            });
        }

        result
    }

    /// Global average pooling: (N, C, H, W) → (N, C).
    ///
    /// Averages each channel over its spatial extent. Used both by the
    /// gate scorer and as the classifier head's pooling stage.
    #[must_use]
    pub fn global_avg_pool2d(&self) -> Tensor {
        assert_eq!(self.ndim(), 4, "global_avg_pool2d expects (N, C, H, W)");
        let (n, c, h, w) = (
            self.shape()[0],
            self.shape()[1],
            self.shape()[2],
            self.shape()[3],
        );
        let plane = h * w;

        let x = self.data();
        let mut output = vec![0.0f32; n * c];
        for b in 0..n {
            for ch in 0..c {
                let base = (b * c + ch) * plane;
                let sum: f32 = x[base..base + plane].iter().sum();
                output[b * c + ch] = sum / plane as f32;
            }
        }

        let mut result = Tensor::new(&output, &[n, c]);

        if is_grad_enabled() && self.requires_grad_enabled() {
            result.requires_grad_(true);
            let grad_fn = Arc::new(GlobalAvgPool2dBackward {
                input_shape: self.shape().to_vec(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.record(result.id(), grad_fn, vec![self.id()]);
            });
        }

        result
    }

    /// Per-channel scaling: z[n,c,h,w] = self[n,c,h,w] · scale[n,c].
    ///
    /// Broadcasts a per-sample, per-channel gate vector across the
    /// spatial dimensions. Gradients flow to both inputs.
    #[must_use]
    pub fn scale_channels(&self, scale: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 4, "scale_channels expects (N, C, H, W) input");
        assert_eq!(scale.ndim(), 2, "scale_channels expects (N, C) scale");
        assert_eq!(
            self.shape()[0],
            scale.shape()[0],
            "scale_channels batch mismatch"
        );
        assert_eq!(
            self.shape()[1],
            scale.shape()[1],
            "scale_channels channel mismatch"
        );

        let (n, c, h, w) = (
            self.shape()[0],
            self.shape()[1],
            self.shape()[2],
            self.shape()[3],
        );
        let plane = h * w;

        let x = self.data();
        let s = scale.data();
        let mut output = vec![0.0f32; n * c * plane];
        for b in 0..n {
            for ch in 0..c {
                let s_val = s[b * c + ch];
                let base = (b * c + ch) * plane;
                for idx in base..base + plane {
                    output[idx] = x[idx] * s_val;
                }
            }
        }

        let mut result = Tensor::new(&output, self.shape());

        if is_grad_enabled() && (self.requires_grad_enabled() || scale.requires_grad_enabled()) {
            result.requires_grad_(true);
            let grad_fn = Arc::new(ScaleChannelsBackward {
                x: self.clone(),
                scale: scale.clone(),
            });
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                graph.register_tensor(self.clone());
                graph.register_tensor(scale.clone());
                graph.record(result.id(), grad_fn, vec![self.id(), scale.id()]);
            });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad, no_grad};

    /// Numerical gradient via central differences.
    fn numerical_gradient<F>(f: F, x: &Tensor, eps: f32) -> Tensor
    where
        F: Fn(&Tensor) -> Tensor,
    {
        let mut grad_data = vec![0.0; x.numel()];

        for i in 0..x.numel() {
            let mut x_plus = x.data().to_vec();
            let mut x_minus = x.data().to_vec();
            x_plus[i] += eps;
            x_minus[i] -= eps;

            let y_plus = no_grad(|| f(&Tensor::new(&x_plus, x.shape())).item());
            let y_minus = no_grad(|| f(&Tensor::new(&x_minus, x.shape())).item());

            grad_data[i] = (y_plus - y_minus) / (2.0 * eps);
        }

        Tensor::new(&grad_data, x.shape())
    }

    fn check_gradient<F>(f: F, x: &Tensor, eps: f32, tol: f32) -> bool
    where
        F: Fn(&Tensor) -> Tensor,
    {
        clear_graph();

        let x_grad = x.clone().requires_grad();
        let x_id = x_grad.id();
        let y = f(&x_grad);
        y.backward();

        let analytical = get_grad(x_id).expect("No gradient computed");
        let numerical = numerical_gradient(&f, x, eps);

        let max_diff: f32 = analytical
            .data()
            .iter()
            .zip(numerical.data().iter())
            .map(|(a, n)| (a - n).abs())
            .fold(0.0, f32::max);

        clear_graph();
        max_diff < tol
    }

    #[test]
    fn test_add_forward_and_grad() {
        clear_graph();
        let x = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
        let y = Tensor::from_slice(&[3.0, 4.0]).requires_grad();

        let z = x.add(&y);
        assert_eq!(z.data(), &[4.0, 6.0]);

        z.sum().backward();
        assert_eq!(get_grad(x.id()).expect("grad x").data(), &[1.0, 1.0]);
        assert_eq!(get_grad(y.id()).expect("grad y").data(), &[1.0, 1.0]);
        clear_graph();
    }

    #[test]
    fn test_mul_grad_is_other_operand() {
        clear_graph();
        let x = Tensor::from_slice(&[2.0, 3.0]).requires_grad();
        let y = Tensor::from_slice(&[5.0, 7.0]).requires_grad();

        x.mul(&y).sum().backward();
        assert_eq!(get_grad(x.id()).expect("grad x").data(), &[5.0, 7.0]);
        assert_eq!(get_grad(y.id()).expect("grad y").data(), &[2.0, 3.0]);
        clear_graph();
    }

    #[test]
    fn test_mul_scalar_grad() {
        clear_graph();
        let x = Tensor::from_slice(&[1.0, -2.0]).requires_grad();
        x.mul_scalar(3.0).sum().backward();
        assert_eq!(get_grad(x.id()).expect("grad").data(), &[3.0, 3.0]);
        clear_graph();
    }

    #[test]
    fn test_relu_forward_and_grad() {
        clear_graph();
        let x = Tensor::from_slice(&[-1.0, 0.0, 2.0]).requires_grad();
        let y = x.relu();
        assert_eq!(y.data(), &[0.0, 0.0, 2.0]);

        y.sum().backward();
        assert_eq!(get_grad(x.id()).expect("grad").data(), &[0.0, 0.0, 1.0]);
        clear_graph();
    }

    #[test]
    fn test_l1_norm_forward_and_grad() {
        clear_graph();
        let x = Tensor::from_slice(&[1.0, -2.0, 3.0]).requires_grad();
        let n = x.l1_norm();
        assert_eq!(n.item(), 6.0);

        n.backward();
        assert_eq!(get_grad(x.id()).expect("grad").data(), &[1.0, -1.0, 1.0]);
        clear_graph();
    }

    #[test]
    fn test_matmul_forward() {
        let a = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = Tensor::new(&[5.0, 6.0, 7.0, 8.0], &[2, 2]);
        let c = a.matmul(&b);
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_gradient_matches_numerical() {
        let w = Tensor::new(&[0.5, -0.3, 0.2, 0.8, -0.1, 0.4], &[3, 2]);
        let x = Tensor::new(&[1.0, 2.0, -1.0, 0.5, 0.3, -0.7], &[2, 3]);

        assert!(check_gradient(|x| x.matmul(&w).sum(), &x, 1e-2, 1e-2));
    }

    #[test]
    fn test_broadcast_add_forward_and_grad() {
        clear_graph();
        let m = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).requires_grad();
        let b = Tensor::from_slice(&[10.0, 20.0]).requires_grad();

        let z = m.broadcast_add(&b);
        assert_eq!(z.data(), &[11.0, 22.0, 13.0, 24.0]);

        z.sum().backward();
        assert_eq!(get_grad(b.id()).expect("grad b").data(), &[2.0, 2.0]);
        clear_graph();
    }

    #[test]
    fn test_view_roundtrip_grad() {
        clear_graph();
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).requires_grad();
        let y = x.view(&[4]);
        assert_eq!(y.shape(), &[4]);

        y.sum().backward();
        let g = get_grad(x.id()).expect("grad");
        assert_eq!(g.shape(), &[2, 2]);
        assert_eq!(g.data(), &[1.0, 1.0, 1.0, 1.0]);
        clear_graph();
    }

    #[test]
    fn test_conv2d_known_values() {
        // 2x2 input, 2x2 kernel of ones, no padding: single output
        // position summing the whole input.
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
        let w = Tensor::new(&[1.0, 1.0, 1.0, 1.0], &[1, 1, 2, 2]);
        let y = x.conv2d(&w, None, 1, 0);
        assert_eq!(y.shape(), &[1, 1, 1, 1]);
        assert_eq!(y.item(), 10.0);
    }

    #[test]
    fn test_conv2d_padding_and_stride_shapes() {
        let x = Tensor::zeros(&[2, 3, 32, 32]);
        let w = Tensor::zeros(&[8, 3, 3, 3]);

        // padding 1, stride 1 preserves the spatial extent
        assert_eq!(x.conv2d(&w, None, 1, 1).shape(), &[2, 8, 32, 32]);
        // padding 1, stride 2 halves it
        assert_eq!(x.conv2d(&w, None, 2, 1).shape(), &[2, 8, 16, 16]);
        // no padding shrinks by kernel-1
        assert_eq!(x.conv2d(&w, None, 1, 0).shape(), &[2, 8, 30, 30]);
    }

    #[test]
    fn test_conv2d_bias_offsets_all_positions() {
        let x = Tensor::zeros(&[1, 1, 3, 3]);
        let w = Tensor::zeros(&[2, 1, 3, 3]);
        let b = Tensor::from_slice(&[1.5, -0.5]);
        let y = x.conv2d(&w, Some(&b), 1, 1);
        assert_eq!(y.shape(), &[1, 2, 3, 3]);
        assert!(y.data()[..9].iter().all(|&v| v == 1.5));
        assert!(y.data()[9..].iter().all(|&v| v == -0.5));
    }

    #[test]
    fn test_conv2d_input_gradient_matches_numerical() {
        let w = Tensor::new(
            &[
                0.2, -0.1, 0.3, 0.05, -0.25, 0.15, 0.1, 0.4, -0.3, 0.2, -0.15, 0.25, 0.35, -0.05,
                0.1, -0.2,
            ],
            &[2, 2, 2, 2],
        );
        let x = Tensor::new(
            &[
                0.5, -0.3, 0.8, 0.1, -0.6, 0.4, 0.2, -0.9, 0.7, 0.3, -0.2, 0.6, -0.4, 0.9, 0.1,
                -0.5, 0.2, 0.8,
            ],
            &[1, 2, 3, 3],
        );

        assert!(check_gradient(
            |x| x.conv2d(&w, None, 1, 1).sum(),
            &x,
            1e-2,
            1e-2
        ));
    }

    #[test]
    fn test_conv2d_weight_gradient_matches_numerical() {
        let x = Tensor::new(
            &[0.5, -0.3, 0.8, 0.1, -0.6, 0.4, 0.2, -0.9, 0.7],
            &[1, 1, 3, 3],
        );
        let w = Tensor::new(&[0.2, -0.1, 0.3, 0.05], &[1, 1, 2, 2]);

        assert!(check_gradient(
            |w| x.conv2d(w, None, 1, 0).sum(),
            &w,
            1e-2,
            1e-2
        ));
    }

    #[test]
    fn test_batch_norm2d_normalizes_batch() {
        // Two samples, one channel; stats computed over (N, H, W).
        let x = Tensor::new(&[1.0, 3.0, 5.0, 7.0], &[2, 1, 1, 2]);
        let weight = Tensor::ones(&[1]);
        let bias = Tensor::zeros(&[1]);

        let mean = [4.0];
        let var = [5.0]; // population variance of {1,3,5,7}
        let y = x.batch_norm2d(&weight, &bias, &mean, &var, 1e-5);

        let out_mean: f32 = y.data().iter().sum::<f32>() / 4.0;
        assert!(out_mean.abs() < 1e-6);
        let out_var: f32 = y.data().iter().map(|v| v * v).sum::<f32>() / 4.0;
        assert!((out_var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_batch_norm2d_gradient_matches_numerical() {
        let x = Tensor::new(
            &[0.5, -1.3, 0.8, 2.1, -0.6, 1.4, 0.2, -0.9, 0.7, 1.3, -0.2, 0.6],
            &[2, 1, 2, 3],
        );
        let weight = Tensor::new(&[1.5], &[1]);
        let bias = Tensor::new(&[0.2], &[1]);

        // Recompute batch stats inside the closure so the numerical
        // gradient sees their dependence on x.
        let bn = |x: &Tensor| {
            let m = x.numel() as f32;
            let mean: f32 = x.data().iter().sum::<f32>() / m;
            let var: f32 = x.data().iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / m;
            // Weight the positions unevenly so the gradient is not
            // identically zero under normalization.
            let coeffs = Tensor::new(
                &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0],
                x.shape(),
            );
            x.batch_norm2d(&weight, &bias, &[mean], &[var], 1e-5)
                .mul(&coeffs)
                .sum()
        };

        assert!(check_gradient(bn, &x, 1e-2, 1e-2));
    }

    #[test]
    fn test_global_avg_pool2d_forward_and_grad() {
        clear_graph();
        let x = Tensor::new(&[1.0, 3.0, 5.0, 7.0, 2.0, 4.0, 6.0, 8.0], &[1, 2, 2, 2])
            .requires_grad();
        let y = x.global_avg_pool2d();
        assert_eq!(y.shape(), &[1, 2]);
        assert_eq!(y.data(), &[4.0, 5.0]);

        y.sum().backward();
        let g = get_grad(x.id()).expect("grad");
        assert!(g.data().iter().all(|&v| (v - 0.25).abs() < 1e-6));
        clear_graph();
    }

    #[test]
    fn test_scale_channels_forward_and_grads() {
        clear_graph();
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[1, 2, 1, 2]).requires_grad();
        let s = Tensor::new(&[2.0, 0.0], &[1, 2]).requires_grad();

        let y = x.scale_channels(&s);
        assert_eq!(y.data(), &[2.0, 4.0, 0.0, 0.0]);

        y.sum().backward();
        assert_eq!(get_grad(x.id()).expect("grad x").data(), &[2.0, 2.0, 0.0, 0.0]);
        assert_eq!(get_grad(s.id()).expect("grad s").data(), &[3.0, 7.0]);
        clear_graph();
    }

    #[test]
    fn test_scale_channels_gradient_matches_numerical() {
        let s = Tensor::new(&[1.2, 0.4], &[1, 2]);
        let x = Tensor::new(&[0.5, -0.3, 0.8, 0.1, -0.6, 0.4, 0.2, -0.9], &[1, 2, 2, 2]);

        assert!(check_gradient(
            |x| x.scale_channels(&s).sum(),
            &x,
            1e-2,
            1e-2
        ));
    }
}
