//! Checkpoint serialization.
//!
//! Network checkpoints use the `SafeTensors` format:
//! ```text
//! [8-byte header: u64 metadata length (little-endian)]
//! [JSON metadata: tensor names, dtypes, shapes, data_offsets]
//! [Raw tensor data: F32 values in little-endian]
//! ```
//!
//! Industry-standard format compatible with the `HuggingFace` ecosystem,
//! so checkpoints written here can be inspected with standard tooling.

pub mod safetensors;

pub use safetensors::SafeTensorsMetadata;
