//! Neural network building blocks.
//!
//! This module provides PyTorch-compatible layers following the API
//! design described in Paszke et al. (2019).
//!
//! # Architecture
//!
//! The nn module is organized around the [`Module`] trait, which defines
//! the interface for stateless layers:
//!
//! - **Layers**: [`Linear`], [`Conv2d`]
//! - **Pooling**: [`GlobalAvgPool2d`]
//! - **Normalization**: [`BatchNorm2d`] (inherent `&mut self` forward,
//!   since training mode updates running statistics)
//!
//! Training support lives in the public submodules: [`loss`] for the
//! classification objective, [`optim`] for Adam, and [`serialize`] for
//! `SafeTensors` checkpoints.
//!
//! # Example
//!
//! ```ignore
//! use podar::nn::{Conv2d, Module};
//! use podar::autograd::Tensor;
//!
//! let conv = Conv2d::with_options(3, 64, 3, 1, 1, true);
//! let x = Tensor::zeros(&[8, 3, 32, 32]);
//! let y = conv.forward(&x); // [8, 64, 32, 32]
//! ```
//!
//! # References
//!
//! - Paszke, A., et al. (2019). `PyTorch`: An imperative style, high-performance
//!   deep learning library. `NeurIPS`.
//! - Glorot, X., & Bengio, Y. (2010). Understanding the difficulty of training
//!   deep feedforward neural networks. AISTATS.
//! - He, K., et al. (2015). Delving deep into rectifiers. ICCV.

mod conv;
mod init;
mod linear;
pub mod loss;
mod module;
mod normalization;
pub mod optim;
pub mod serialize;

pub use conv::{Conv2d, GlobalAvgPool2d};
pub use init::{kaiming_uniform, xavier_uniform};
pub use linear::Linear;
pub use loss::CrossEntropyLoss;
pub use module::Module;
pub use normalization::BatchNorm2d;
pub use optim::{Adam, Optimizer};
pub use serialize::StateDict;
