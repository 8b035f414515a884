//! Error types for the field model and the reference engines.

use thiserror::Error;

use crate::field::Representation;

/// Errors raised while building or transforming fields and control-point grids.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    /// Only 2D and 3D lattices are supported.
    #[error("Unsupported dimension: {0} (expected 2 or 3)")]
    UnsupportedDimension(usize),

    /// Invalid lattice geometry.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Payload length does not match the lattice.
    #[error("Payload length mismatch: expected {expected} vectors, got {actual}")]
    PayloadLength { expected: usize, actual: usize },

    /// Two lattices that must agree do not.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The operation requires a specific representation.
    #[error("Representation error: expected {expected:?} field, got {actual:?}")]
    Representation {
        expected: Representation,
        actual: Representation,
    },

    /// Invalid mask content.
    #[error("Invalid mask: {0}")]
    InvalidMask(String),

    /// Invalid velocity parametrization.
    #[error("Invalid parametrization: {0}")]
    InvalidParametrization(String),
}

/// Result type for field operations.
pub type Result<T> = std::result::Result<T, FieldError>;

impl FieldError {
    /// Create an invalid geometry error.
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    /// Create an invalid mask error.
    pub fn mask(msg: impl Into<String>) -> Self {
        Self::InvalidMask(msg.into())
    }

    /// Create an invalid parametrization error.
    pub fn parametrization(msg: impl Into<String>) -> Self {
        Self::InvalidParametrization(msg.into())
    }

    /// Shape mismatch between two lattices.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FieldError::geometry("zero spacing");
        assert_eq!(err.to_string(), "Invalid geometry: zero spacing");
    }

    #[test]
    fn test_shape_mismatch() {
        let err = FieldError::shape_mismatch(&[4, 4], &[4, 5]);
        let msg = err.to_string();
        assert!(msg.contains("expected [4, 4]"));
        assert!(msg.contains("got [4, 5]"));
    }
}
