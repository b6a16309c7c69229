//! Core compute primitives.
//!
//! `Vector` is the flat storage behind every tensor. Heavier linear
//! algebra (GEMM) is delegated to trueno at the op layer.

mod vector;

pub use vector::Vector;
