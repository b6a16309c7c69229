//! Dynamic channel gating (feature boosting and suppression).
//!
//! Each gated convolution block learns, per input, which of its output
//! channels matter. A [`ChannelScorer`] reduces the block input to one
//! raw importance score per output channel, [`winner_take_all`] keeps
//! the top scores under a sparsity budget and zeroes the rest, and the
//! surviving scores rescale the convolution output channel-wise. The L1
//! norm of the gate vector feeds the training objective as a sparsity
//! penalty, pushing the scorer toward cheap channel subsets.
//!
//! Blocks come in two typed variants selected at construction:
//! [`PlainBlock`] (convolve, normalize, rectify) and [`GatedBlock`]
//! (the same pipeline modulated by the gate, returning the sparsity
//! cost alongside the feature map).
//!
//! # References
//!
//! - Gao, X., et al. (2019). Dynamic channel pruning: Feature boosting
//!   and suppression. ICLR.

mod block;
mod scorer;
mod wta;

pub use block::{GatedBlock, PlainBlock};
pub use scorer::ChannelScorer;
pub use wta::winner_take_all;
