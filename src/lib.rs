//! Podar: dynamic channel gating for convolutional networks in pure Rust.
//!
//! Podar trains a CIFAR-10 classifier whose convolution blocks learn to
//! switch channels on and off per input. A lightweight scorer predicts
//! each output channel's salience from the block input, a
//! winner-take-all step keeps the strongest fraction, and an L1 cost on
//! the surviving gate values steers training toward cheap gates.
//! Suppressed channels are zeroed whole, so a runtime can skip their
//! convolution work without changing the network's answers.
//!
//! # Quick Start
//!
//! ```
//! use podar::autograd::Tensor;
//! use podar::model::GatedCifarNet;
//!
//! // Keep the strongest half of every block's channels.
//! let mut net = GatedCifarNet::with_seed(0.5, Some(1))?;
//!
//! let image = Tensor::zeros(&[1, 3, 32, 32]);
//! let (logits, cost) = net.forward(&image);
//!
//! assert_eq!(logits.shape(), &[1, 10]);
//! assert!(cost.item() >= 0.0);
//! # Ok::<(), podar::PodarError>(())
//! ```
//!
//! # Modules
//!
//! - [`autograd`]: Tape-based reverse-mode automatic differentiation
//! - [`primitives`]: Flat storage behind tensors
//! - [`nn`]: Layers, loss, optimizer, and state-dict snapshots
//! - [`gate`]: Channel scoring, winner-take-all, and the gated block
//! - [`model`]: The plain and gated CIFAR-10 networks
//! - [`data`]: CIFAR-10 binary loading and batching
//! - [`train`]: Training driver with warm starts along the sparsity ladder
//! - [`serialization`]: SafeTensors tensor files
//!
//! # References
//!
//! - Gao, X., et al. (2019). Dynamic channel pruning: Feature boosting
//!   and suppression. ICLR.

pub mod autograd;
pub mod data;
pub mod error;
pub mod gate;
pub mod model;
pub mod nn;
pub mod primitives;
pub mod serialization;
pub mod train;

pub use autograd::Tensor;
pub use error::{PodarError, Result};
