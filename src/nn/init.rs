//! Weight initialization functions.
//!
//! Proper initialization is critical for training deep networks.
//! This module provides initialization schemes from the literature:
//!
//! - Xavier/Glorot (Glorot & Bengio, 2010) - for tanh/sigmoid activations
//! - Kaiming/He (He et al., 2015) - for `ReLU` activations
//!
//! # References
//!
//! - Glorot, X., & Bengio, Y. (2010). Understanding the difficulty of training
//!   deep feedforward neural networks. AISTATS.
//! - He, K., et al. (2015). Delving deep into rectifiers: Surpassing human-level
//!   performance on `ImageNet` classification. ICCV.

use crate::autograd::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Xavier uniform initialization (Glorot & Bengio, 2010).
///
/// Samples from U(-a, a) where a = sqrt(6 / (`fan_in` + `fan_out`)).
/// Suitable for tanh and sigmoid activations.
///
/// # Arguments
///
/// * `shape` - Shape of the tensor to initialize
/// * `fan_in` - Number of input features
/// * `fan_out` - Number of output features
/// * `seed` - Optional random seed for reproducibility
#[must_use]
pub fn xavier_uniform(shape: &[usize], fan_in: usize, fan_out: usize, seed: Option<u64>) -> Tensor {
    let a = (6.0 / (fan_in + fan_out) as f32).sqrt();
    uniform(shape, -a, a, seed)
}

/// Kaiming uniform initialization (He et al., 2015).
///
/// Samples from U(-bound, bound) where bound = sqrt(6 / `fan`).
/// Optimal for `ReLU` activations.
///
/// # Arguments
///
/// * `shape` - Shape of the tensor
/// * `fan` - Fan count for variance scaling: pass the fan-in to preserve
///   forward-pass variance, or the fan-out to preserve backward-pass
///   variance
/// * `seed` - Optional random seed
#[must_use]
pub fn kaiming_uniform(shape: &[usize], fan: usize, seed: Option<u64>) -> Tensor {
    let bound = (6.0 / fan as f32).sqrt();
    uniform(shape, -bound, bound, seed)
}

/// Uniform distribution initialization.
///
/// Samples from U(low, high).
pub(crate) fn uniform(shape: &[usize], low: f32, high: f32, seed: Option<u64>) -> Tensor {
    let numel: usize = shape.iter().product();
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let data: Vec<f32> = (0..numel).map(|_| rng.gen_range(low..high)).collect();

    Tensor::new(&data, shape)
}

/// Constant initialization.
pub(crate) fn constant(shape: &[usize], value: f32) -> Tensor {
    let numel: usize = shape.iter().product();
    Tensor::new(&vec![value; numel], shape)
}

/// Zeros initialization.
pub(crate) fn zeros(shape: &[usize]) -> Tensor {
    constant(shape, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xavier_uniform_bounds() {
        let t = xavier_uniform(&[100, 100], 100, 100, Some(42));
        let a = (6.0 / 200.0_f32).sqrt();

        for &val in t.data() {
            assert!(
                (-a..=a).contains(&val),
                "Value {val} out of bounds [-{a}, {a}]"
            );
        }
    }

    #[test]
    fn test_xavier_uniform_reproducible() {
        let t1 = xavier_uniform(&[10, 10], 10, 10, Some(42));
        let t2 = xavier_uniform(&[10, 10], 10, 10, Some(42));

        assert_eq!(t1.data(), t2.data());
    }

    #[test]
    fn test_kaiming_uniform_bounds() {
        let t = kaiming_uniform(&[100, 50], 50, Some(42));
        let bound = (6.0 / 50.0_f32).sqrt();

        for &val in t.data() {
            assert!(val >= -bound && val <= bound);
        }
    }

    #[test]
    fn test_kaiming_uniform_fan_out_widens_bound() {
        // With fewer output units the bound grows: sqrt(6/16) > sqrt(6/64).
        let narrow = kaiming_uniform(&[16, 64], 16, Some(7));
        let bound = (6.0 / 16.0_f32).sqrt();
        assert!(narrow.data().iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn test_constant_initialization() {
        let t = constant(&[5, 5], 3.14);
        assert!(t.data().iter().all(|&x| (x - 3.14).abs() < 1e-6));
        assert_eq!(t.numel(), 25);
    }

    #[test]
    fn test_zeros() {
        let z = zeros(&[3, 3]);
        assert!(z.data().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_uniform_no_seed() {
        // Without seed, should still work (entropy-based)
        let t1 = uniform(&[100], 0.0, 1.0, None);
        let t2 = uniform(&[100], 0.0, 1.0, None);

        // Very unlikely to be identical
        let same = t1
            .data()
            .iter()
            .zip(t2.data())
            .all(|(a, b)| (a - b).abs() < 1e-10);
        assert!(!same, "Two entropy-seeded tensors should differ");
    }
}
