//! Error types for regularization operations.

use ffd_core::FieldError;
use thiserror::Error;

/// Main error type for regularization operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    /// Error raised by the field model.
    #[error("Field error: {0}")]
    Field(#[from] FieldError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Gradient lattice does not match the control-point grid.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Result type for regularization operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}
