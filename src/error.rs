//! Error types for podar operations.
//!
//! Provides rich error context for library consumers.

use std::fmt;

/// Main error type for podar operations.
///
/// Covers configuration errors caught at model construction (invalid
/// sparsity ratios, bad hyperparameters), snapshot and dataset I/O, and
/// state-dict restoration failures.
///
/// # Examples
///
/// ```
/// use podar::error::PodarError;
///
/// let err = PodarError::InvalidSparsity {
///     value: 1.5,
///     constraint: "must be in [0, 1]".to_string(),
/// };
/// assert!(err.to_string().contains("sparsity"));
/// ```
#[derive(Debug)]
pub enum PodarError {
    /// Tensor dimensions don't match for the operation.
    DimensionMismatch {
        /// Expected dimensions description
        expected: String,
        /// Actual dimensions found
        actual: String,
    },

    /// Sparsity ratio outside the valid range.
    InvalidSparsity {
        /// Provided ratio
        value: f32,
        /// Constraint description
        constraint: String,
    },

    /// Invalid hyperparameter value provided.
    InvalidHyperparameter {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// A parameter name expected by the model is absent from a state dict.
    MissingParameter {
        /// Fully qualified parameter name
        name: String,
    },

    /// Dataset file is missing, truncated, or malformed.
    Dataset {
        /// Offending path
        path: String,
        /// Error description
        message: String,
    },

    /// I/O error (file not found, permission denied, etc.).
    Io(std::io::Error),

    /// Serialization/deserialization error.
    Serialization(String),

    /// Generic error with string message.
    Other(String),
}

impl fmt::Display for PodarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodarError::DimensionMismatch { expected, actual } => {
                write!(f, "Tensor dimension mismatch: expected {expected}, got {actual}")
            }
            PodarError::InvalidSparsity { value, constraint } => {
                write!(f, "Invalid sparsity ratio {value}: {constraint}")
            }
            PodarError::InvalidHyperparameter {
                param,
                value,
                constraint,
            } => {
                write!(f, "Invalid hyperparameter: {param} = {value}, expected {constraint}")
            }
            PodarError::MissingParameter { name } => {
                write!(f, "Missing parameter in state dict: {name}")
            }
            PodarError::Dataset { path, message } => {
                write!(f, "Dataset error ({path}): {message}")
            }
            PodarError::Io(e) => write!(f, "I/O error: {e}"),
            PodarError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            PodarError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for PodarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PodarError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PodarError {
    fn from(err: std::io::Error) -> Self {
        PodarError::Io(err)
    }
}

impl From<&str> for PodarError {
    fn from(msg: &str) -> Self {
        PodarError::Other(msg.to_string())
    }
}

impl From<String> for PodarError {
    fn from(msg: String) -> Self {
        PodarError::Other(msg)
    }
}

impl PodarError {
    /// Create a sparsity ratio error with the standard range constraint.
    #[must_use]
    pub fn invalid_sparsity(value: f32) -> Self {
        Self::InvalidSparsity {
            value,
            constraint: "must be in [0, 1]".to_string(),
        }
    }

    /// Create a dimension mismatch error with descriptive context.
    #[must_use]
    pub fn dimension_mismatch(context: &str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            expected: format!("{context}={expected}"),
            actual: format!("{actual}"),
        }
    }

    /// Create a dataset error for a concrete path.
    #[must_use]
    pub fn dataset(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::Dataset {
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}

#[allow(clippy::cmp_owned)]
impl PartialEq<&str> for PodarError {
    fn eq(&self, other: &&str) -> bool {
        self.to_string() == *other
    }
}

#[allow(clippy::cmp_owned)]
impl PartialEq<PodarError> for &str {
    fn eq(&self, other: &PodarError) -> bool {
        *self == other.to_string()
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, PodarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_display() {
        let err = PodarError::DimensionMismatch {
            expected: "(4, 3, 32, 32)".to_string(),
            actual: "(4, 1, 32, 32)".to_string(),
        };
        assert!(err.to_string().contains("dimension mismatch"));
        assert!(err.to_string().contains("(4, 3, 32, 32)"));
        assert!(err.to_string().contains("(4, 1, 32, 32)"));
    }

    #[test]
    fn test_invalid_sparsity_display() {
        let err = PodarError::invalid_sparsity(1.5);
        let msg = err.to_string();
        assert!(msg.contains("Invalid sparsity ratio 1.5"));
        assert!(msg.contains("[0, 1]"));
    }

    #[test]
    fn test_invalid_hyperparameter_display() {
        let err = PodarError::InvalidHyperparameter {
            param: "batch_size".to_string(),
            value: "0".to_string(),
            constraint: "batch_size > 0".to_string(),
        };
        assert!(err.to_string().contains("batch_size"));
        assert!(err.to_string().contains("expected batch_size > 0"));
    }

    #[test]
    fn test_missing_parameter_display() {
        let err = PodarError::MissingParameter {
            name: "layers.0.conv.weight".to_string(),
        };
        assert!(err.to_string().contains("layers.0.conv.weight"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: PodarError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_string_conversions() {
        let err: PodarError = "something broke".into();
        assert_eq!(err, "something broke");

        let err: PodarError = String::from("owned message").into();
        assert_eq!("owned message", err);
    }

    #[test]
    fn test_dataset_display() {
        let err = PodarError::dataset(
            std::path::Path::new("data/data_batch_1.bin"),
            "truncated record",
        );
        let msg = err.to_string();
        assert!(msg.contains("data_batch_1.bin"));
        assert!(msg.contains("truncated record"));
    }
}
