//! Network checkpoint serialization.
//!
//! State dictionaries map parameter names to raw data and shapes, and
//! round-trip through the SafeTensors file format. Names are chosen by
//! the network (for example `layers.0.conv.weight`), which lets a
//! checkpoint be loaded selectively when warm-starting a differently
//! configured network.
//!
//! # Example
//!
//! ```ignore
//! use podar::nn::serialize::{load_state_dict, save_state_dict};
//!
//! let state = model.state_dict();
//! save_state_dict("model.safetensors", &state).unwrap();
//!
//! let restored = load_state_dict("model.safetensors").unwrap();
//! model.load_state_dict(&restored).unwrap();
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use crate::serialization::safetensors::{extract_tensor, load_safetensors, save_safetensors};

/// State dictionary: mapping from parameter names to tensor data and shapes.
pub type StateDict = BTreeMap<String, (Vec<f32>, Vec<usize>)>;

/// Save a state dictionary to a SafeTensors file.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_state_dict<P: AsRef<Path>>(path: P, state: &StateDict) -> Result<(), String> {
    save_safetensors(path, state)
}

/// Load a state dictionary from a SafeTensors file.
///
/// # Errors
///
/// Returns an error if the file is missing, malformed, or holds a
/// tensor whose byte range does not match its shape.
pub fn load_state_dict<P: AsRef<Path>>(path: P) -> Result<StateDict, String> {
    let (metadata, raw_data) = load_safetensors(path)?;

    let mut state = StateDict::new();

    for (name, tensor_meta) in metadata {
        let data = extract_tensor(&raw_data, &tensor_meta)?;
        state.insert(name, (data, tensor_meta.shape));
    }

    Ok(state)
}

/// Keep only the entries whose name ends with one of `suffixes`.
///
/// Used when warm-starting: loading a dense checkpoint into a gated
/// network copies only convolution parameters, and moving between
/// sparsity levels copies weights and biases but not running statistics.
#[must_use]
pub fn filter_by_suffix(state: &StateDict, suffixes: &[&str]) -> StateDict {
    state
        .iter()
        .filter(|(name, _)| suffixes.iter().any(|s| name.ends_with(s)))
        .map(|(name, entry)| (name.clone(), entry.clone()))
        .collect()
}
