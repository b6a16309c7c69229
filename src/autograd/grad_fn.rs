//! Gradient function trait and implementations.
//!
//! Each differentiable operation implements `GradFn` to define how
//! gradients flow backward through it. Dense backward passes (matmul)
//! go through trueno's SIMD kernels.

use super::tensor::Tensor;

/// Trait for functions that compute gradients during backward pass.
///
/// Each differentiable operation creates a `GradFn` implementation
/// that captures the context needed for gradient computation: either
/// the shapes involved or clones of the tensors themselves.
///
/// # Example Implementation
///
/// For element-wise addition z = x + y:
/// - ∂z/∂x = 1
/// - ∂z/∂y = 1
///
/// So `backward(grad_output)` returns [`grad_output`, `grad_output`].
pub trait GradFn: Send + Sync {
    /// Compute gradients with respect to inputs.
    ///
    /// # Arguments
    ///
    /// * `grad_output` - Gradient flowing back from downstream operations
    ///
    /// # Returns
    ///
    /// Vector of gradients, one per input tensor, in the input order
    /// used during the forward pass.
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor>;

    /// Human-readable name for debugging.
    fn name(&self) -> &'static str;
}

/// Reduce a gradient to the shape of a (possibly broadcast) input.
///
/// No-op when shapes already match. A `[N, M]` gradient reduces to a
/// `[M]` input by summing over rows, and any gradient reduces to a
/// single-element input by summing everything.
pub(crate) fn maybe_reduce_grad(grad: &Tensor, target_shape: &[usize]) -> Tensor {
    if grad.shape() == target_shape {
        return grad.clone();
    }

    let target_numel: usize = target_shape.iter().product();
    if target_numel == grad.numel() {
        return Tensor::new(grad.data(), target_shape);
    }

    if grad.ndim() == 2 && target_shape.len() == 1 && grad.shape()[1] == target_shape[0] {
        let (rows, cols) = (grad.shape()[0], grad.shape()[1]);
        let mut out = vec![0.0; cols];
        for i in 0..rows {
            for j in 0..cols {
                out[j] += grad.data()[i * cols + j];
            }
        }
        return Tensor::new(&out, target_shape);
    }

    if target_numel == 1 {
        let total: f32 = grad.data().iter().sum();
        return Tensor::new(&[total], target_shape);
    }

    panic!(
        "unsupported gradient reduction from {:?} to {target_shape:?}",
        grad.shape()
    );
}

/// 2D matrix product on raw row-major data via trueno.
fn matmul_data(a: &[f32], m: usize, k: usize, b: &[f32], n: usize) -> Vec<f32> {
    let a_matrix = trueno::Matrix::from_vec(m, k, a.to_vec()).expect("valid matrix dimensions");
    let b_matrix = trueno::Matrix::from_vec(k, n, b.to_vec()).expect("valid matrix dimensions");
    let result = a_matrix.matmul(&b_matrix).expect("matmul should succeed");
    result.as_slice().to_vec()
}

/// Transpose raw row-major data.
fn transpose_data(a: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut out = vec![0.0; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = a[i * cols + j];
        }
    }
    out
}

// ============================================================================
// Element-wise Operations
// ============================================================================

/// Gradient function for addition: z = x + y
pub(crate) struct AddBackward {
    pub(crate) x_shape: Vec<usize>,
    pub(crate) y_shape: Vec<usize>,
}

impl GradFn for AddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(x+y)/∂x = 1, ∂(x+y)/∂y = 1
        let grad_x = maybe_reduce_grad(grad_output, &self.x_shape);
        let grad_y = maybe_reduce_grad(grad_output, &self.y_shape);
        vec![grad_x, grad_y]
    }

    fn name(&self) -> &'static str {
        "AddBackward"
    }
}

/// Gradient function for subtraction: z = x - y
pub(crate) struct SubBackward {
    pub(crate) x_shape: Vec<usize>,
    pub(crate) y_shape: Vec<usize>,
}

impl GradFn for SubBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(x-y)/∂x = 1, ∂(x-y)/∂y = -1
        let grad_x = maybe_reduce_grad(grad_output, &self.x_shape);
        let grad_y_data: Vec<f32> = grad_output.data().iter().map(|&g| -g).collect();
        let grad_y_full = Tensor::new(&grad_y_data, grad_output.shape());
        let grad_y = maybe_reduce_grad(&grad_y_full, &self.y_shape);
        vec![grad_x, grad_y]
    }

    fn name(&self) -> &'static str {
        "SubBackward"
    }
}

/// Gradient function for multiplication: z = x * y
pub(crate) struct MulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(x*y)/∂x = y, ∂(x*y)/∂y = x
        let grad_x_data: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.y.data().iter())
            .map(|(&g, &y)| g * y)
            .collect();
        let grad_y_data: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| g * x)
            .collect();

        let grad_x = maybe_reduce_grad(
            &Tensor::new(&grad_x_data, grad_output.shape()),
            self.x.shape(),
        );
        let grad_y = maybe_reduce_grad(
            &Tensor::new(&grad_y_data, grad_output.shape()),
            self.y.shape(),
        );
        vec![grad_x, grad_y]
    }

    fn name(&self) -> &'static str {
        "MulBackward"
    }
}

/// Gradient function for negation: z = -x
pub(crate) struct NegBackward;

impl GradFn for NegBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(-x)/∂x = -1
        let grad_data: Vec<f32> = grad_output.data().iter().map(|&g| -g).collect();
        vec![Tensor::new(&grad_data, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "NegBackward"
    }
}

/// Gradient function for scalar multiplication: z = x * c
pub(crate) struct MulScalarBackward {
    pub(crate) scalar: f32,
}

impl GradFn for MulScalarBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(c*x)/∂x = c
        let grad_data: Vec<f32> = grad_output.data().iter().map(|&g| g * self.scalar).collect();
        vec![Tensor::new(&grad_data, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "MulScalarBackward"
    }
}

// ============================================================================
// Reduction Operations
// ============================================================================

/// Gradient function for sum: z = sum(x)
pub(crate) struct SumBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for SumBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂sum(x)/∂x_i = 1 for all i
        let g = grad_output.item();
        let numel: usize = self.input_shape.iter().product();
        vec![Tensor::new(&vec![g; numel], &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "SumBackward"
    }
}

/// Gradient function for mean: z = mean(x)
pub(crate) struct MeanBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for MeanBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂mean(x)/∂x_i = 1/n for all i
        let g = grad_output.item();
        let numel: usize = self.input_shape.iter().product();
        let grad_val = g / numel as f32;
        vec![Tensor::new(&vec![grad_val; numel], &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "MeanBackward"
    }
}

/// Gradient function for the L1 norm: z = Σ|x_i|
pub(crate) struct L1NormBackward {
    pub(crate) x: Tensor,
}

impl GradFn for L1NormBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂|x|/∂x = sign(x), with sign(0) = 0
        let g = grad_output.item();
        let grad_data: Vec<f32> = self
            .x
            .data()
            .iter()
            .map(|&x| {
                if x > 0.0 {
                    g
                } else if x < 0.0 {
                    -g
                } else {
                    0.0
                }
            })
            .collect();
        vec![Tensor::new(&grad_data, self.x.shape())]
    }

    fn name(&self) -> &'static str {
        "L1NormBackward"
    }
}

// ============================================================================
// Activation Functions
// ============================================================================

/// Gradient function for `ReLU`: z = max(0, x)
pub(crate) struct ReluBackward {
    pub(crate) x: Tensor,
}

impl GradFn for ReluBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂relu(x)/∂x = 1 if x > 0, else 0
        let grad_data: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| if x > 0.0 { g } else { 0.0 })
            .collect();
        vec![Tensor::new(&grad_data, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "ReluBackward"
    }
}

/// Gradient function for a fixed element-wise mask: z = x * mask
///
/// The mask is treated as a constant of the forward pass, so the
/// gradient simply passes through the kept slots and dies at the
/// zeroed ones. Used by winner-take-all channel selection.
pub(crate) struct MaskBackward {
    pub(crate) mask: Tensor,
}

impl GradFn for MaskBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad_data: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.mask.data().iter())
            .map(|(&g, &m)| g * m)
            .collect();
        vec![Tensor::new(&grad_data, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "MaskBackward"
    }
}

// ============================================================================
// Linear Algebra
// ============================================================================

/// Gradient function for matrix multiplication: z = x @ y
pub(crate) struct MatmulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MatmulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(x@y)/∂x = g @ yᵀ, ∂(x@y)/∂y = xᵀ @ g
        let (m, k) = (self.x.shape()[0], self.x.shape()[1]);
        let n = self.y.shape()[1];

        let y_t = transpose_data(self.y.data(), k, n);
        let grad_x = matmul_data(grad_output.data(), m, n, &y_t, k);

        let x_t = transpose_data(self.x.data(), m, k);
        let grad_y = matmul_data(&x_t, k, m, grad_output.data(), n);

        vec![
            Tensor::new(&grad_x, &[m, k]),
            Tensor::new(&grad_y, &[k, n]),
        ]
    }

    fn name(&self) -> &'static str {
        "MatmulBackward"
    }
}

/// Gradient function for 2D transpose: z = xᵀ
pub(crate) struct TransposeBackward;

impl GradFn for TransposeBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(xᵀ)/∂x transposes the gradient back
        let (rows, cols) = (grad_output.shape()[0], grad_output.shape()[1]);
        let data = transpose_data(grad_output.data(), rows, cols);
        vec![Tensor::new(&data, &[cols, rows])]
    }

    fn name(&self) -> &'static str {
        "TransposeBackward"
    }
}

/// Gradient function for row-broadcast addition: z = x + b
///
/// x is `[N, M]`, b is `[M]`.
pub(crate) struct BroadcastAddBackward {
    pub(crate) x_shape: Vec<usize>,
    pub(crate) y_shape: Vec<usize>,
}

impl GradFn for BroadcastAddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂z/∂x = g; ∂z/∂b sums g over rows
        let grad_x = Tensor::new(grad_output.data(), &self.x_shape);
        let grad_y = maybe_reduce_grad(grad_output, &self.y_shape);
        vec![grad_x, grad_y]
    }

    fn name(&self) -> &'static str {
        "BroadcastAddBackward"
    }
}

/// Gradient function for reshape: z = view(x, new_shape)
pub(crate) struct ViewBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for ViewBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![Tensor::new(grad_output.data(), &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "ViewBackward"
    }
}

// ============================================================================
// Loss Functions
// ============================================================================

/// Gradient function for cross-entropy loss (combined softmax + NLL,
/// mean reduction).
///
/// For L = mean(-log(softmax(x)[target])), the gradient is
/// (softmax(x) - `one_hot(targets)`) / batch.
pub(crate) struct CrossEntropyBackward {
    pub(crate) softmax_output: Tensor,
    pub(crate) targets: Vec<usize>,
}

impl GradFn for CrossEntropyBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let g = grad_output.item();
        let (batch, classes) = (
            self.softmax_output.shape()[0],
            self.softmax_output.shape()[1],
        );
        let scale = g / batch as f32;

        let mut grad = self.softmax_output.data().to_vec();
        for (b, &target) in self.targets.iter().enumerate() {
            grad[b * classes + target] -= 1.0;
        }
        for v in &mut grad {
            *v *= scale;
        }

        vec![Tensor::new(&grad, self.softmax_output.shape())]
    }

    fn name(&self) -> &'static str {
        "CrossEntropyBackward"
    }
}

// ============================================================================
// Convolution and Pooling
// ============================================================================

/// Gradient function for 2D convolution.
///
/// Produces gradients for input, weight, and (when present) bias, in
/// that order.
pub(crate) struct Conv2dBackward {
    pub(crate) input: Tensor,
    pub(crate) weight: Tensor,
    pub(crate) stride: usize,
    pub(crate) padding: usize,
    pub(crate) has_bias: bool,
}

impl GradFn for Conv2dBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (n, c_in, h, w) = (
            self.input.shape()[0],
            self.input.shape()[1],
            self.input.shape()[2],
            self.input.shape()[3],
        );
        let (c_out, kh, kw) = (
            self.weight.shape()[0],
            self.weight.shape()[2],
            self.weight.shape()[3],
        );
        let (oh, ow) = (grad_output.shape()[2], grad_output.shape()[3]);
        let (s, p) = (self.stride, self.padding);

        let x = self.input.data();
        let wt = self.weight.data();
        let g = grad_output.data();

        let mut grad_input = vec![0.0f32; n * c_in * h * w];
        let mut grad_weight = vec![0.0f32; c_out * c_in * kh * kw];
        let mut grad_bias = vec![0.0f32; c_out];

        for b in 0..n {
            for o in 0..c_out {
                for y in 0..oh {
                    for xo in 0..ow {
                        let g_val = g[((b * c_out + o) * oh + y) * ow + xo];
                        if g_val == 0.0 {
                            continue;
                        }
                        grad_bias[o] += g_val;

                        for i in 0..c_in {
                            for ky in 0..kh {
                                let iy = y * s + ky;
                                if iy < p || iy - p >= h {
                                    continue;
                                }
                                let iy = iy - p;
                                for kx in 0..kw {
                                    let ix = xo * s + kx;
                                    if ix < p || ix - p >= w {
                                        continue;
                                    }
                                    let ix = ix - p;

                                    let x_idx = ((b * c_in + i) * h + iy) * w + ix;
                                    let w_idx = ((o * c_in + i) * kh + ky) * kw + kx;

                                    grad_weight[w_idx] += g_val * x[x_idx];
                                    grad_input[x_idx] += g_val * wt[w_idx];
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut grads = vec![
            Tensor::new(&grad_input, self.input.shape()),
            Tensor::new(&grad_weight, self.weight.shape()),
        ];
        if self.has_bias {
            grads.push(Tensor::new(&grad_bias, &[c_out]));
        }
        grads
    }

    fn name(&self) -> &'static str {
        "Conv2dBackward"
    }
}

/// Gradient function for batch normalization over (N, H, W) per channel.
///
/// Captures the normalized input and the per-channel inverse standard
/// deviation from the forward pass. Gradients for input, weight, and
/// bias are returned in that order; frozen weights simply have their
/// gradient discarded by the graph.
pub(crate) struct BatchNorm2dBackward {
    pub(crate) x_hat: Tensor,
    pub(crate) inv_std: Vec<f32>,
    pub(crate) weight: Vec<f32>,
}

impl GradFn for BatchNorm2dBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (n, c, h, w) = (
            self.x_hat.shape()[0],
            self.x_hat.shape()[1],
            self.x_hat.shape()[2],
            self.x_hat.shape()[3],
        );
        let m = (n * h * w) as f32;
        let plane = h * w;

        let xh = self.x_hat.data();
        let g = grad_output.data();

        // Per-channel reductions: Σg and Σ(g·x̂)
        let mut sum_g = vec![0.0f32; c];
        let mut sum_gx = vec![0.0f32; c];
        for b in 0..n {
            for ch in 0..c {
                let base = (b * c + ch) * plane;
                for idx in base..base + plane {
                    sum_g[ch] += g[idx];
                    sum_gx[ch] += g[idx] * xh[idx];
                }
            }
        }

        let mut grad_input = vec![0.0f32; n * c * plane];
        for b in 0..n {
            for ch in 0..c {
                let coef = self.weight[ch] * self.inv_std[ch] / m;
                let base = (b * c + ch) * plane;
                for idx in base..base + plane {
                    grad_input[idx] = coef * (m * g[idx] - sum_g[ch] - xh[idx] * sum_gx[ch]);
                }
            }
        }

        vec![
            Tensor::new(&grad_input, self.x_hat.shape()),
            Tensor::new(&sum_gx, &[c]),
            Tensor::new(&sum_g, &[c]),
        ]
    }

    fn name(&self) -> &'static str {
        "BatchNorm2dBackward"
    }
}

/// Gradient function for global average pooling: (N, C, H, W) → (N, C)
pub(crate) struct GlobalAvgPool2dBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for GlobalAvgPool2dBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // Each spatial position receives g / (H·W)
        let (n, c, h, w) = (
            self.input_shape[0],
            self.input_shape[1],
            self.input_shape[2],
            self.input_shape[3],
        );
        let plane = h * w;
        let scale = 1.0 / plane as f32;

        let g = grad_output.data();
        let mut grad_input = vec![0.0f32; n * c * plane];
        for b in 0..n {
            for ch in 0..c {
                let g_val = g[b * c + ch] * scale;
                let base = (b * c + ch) * plane;
                for v in &mut grad_input[base..base + plane] {
                    *v = g_val;
                }
            }
        }

        vec![Tensor::new(&grad_input, &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "GlobalAvgPool2dBackward"
    }
}

/// Gradient function for per-channel scaling: z[n,c,h,w] = x[n,c,h,w] · s[n,c]
pub(crate) struct ScaleChannelsBackward {
    pub(crate) x: Tensor,
    pub(crate) scale: Tensor,
}

impl GradFn for ScaleChannelsBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂z/∂x = g · s (broadcast); ∂z/∂s = Σ_{h,w} g · x
        let (n, c, h, w) = (
            self.x.shape()[0],
            self.x.shape()[1],
            self.x.shape()[2],
            self.x.shape()[3],
        );
        let plane = h * w;

        let x = self.x.data();
        let s = self.scale.data();
        let g = grad_output.data();

        let mut grad_x = vec![0.0f32; n * c * plane];
        let mut grad_scale = vec![0.0f32; n * c];
        for b in 0..n {
            for ch in 0..c {
                let s_val = s[b * c + ch];
                let base = (b * c + ch) * plane;
                let mut acc = 0.0f32;
                for idx in base..base + plane {
                    grad_x[idx] = g[idx] * s_val;
                    acc += g[idx] * x[idx];
                }
                grad_scale[b * c + ch] = acc;
            }
        }

        vec![
            Tensor::new(&grad_x, self.x.shape()),
            Tensor::new(&grad_scale, &[n, c]),
        ]
    }

    fn name(&self) -> &'static str {
        "ScaleChannelsBackward"
    }
}
