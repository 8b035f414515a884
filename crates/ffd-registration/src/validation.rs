//! Validation and comparison utilities for regularization workflows.
//!
//! Covers input checks on control-point grids and gradient buffers, and the
//! difference metrics used to compare two evaluations of the same quantity.

use ffd_core::{ControlPointGrid, FieldGeometry, Mask, VectorField};
use tracing::warn;

use crate::error::{RegistrationError, Result};

/// Validate that a gradient buffer lives on the grid's lattice.
pub fn validate_gradient_lattice<const D: usize>(
    grid: &ControlPointGrid<D>,
    gradient: &VectorField<D>,
) -> Result<()> {
    let expected = grid.geometry().shape();
    let actual = gradient.geometry().shape();
    if expected != actual {
        return Err(RegistrationError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Validate that an exact-mode mask refers to the reference field.
pub fn validate_mask<const D: usize>(reference: &FieldGeometry<D>, mask: &Mask) -> Result<()> {
    mask.ensure_voxel_count(reference.voxel_count())?;
    Ok(())
}

/// Largest `2·|a - b|` over all components of two payloads.
///
/// NaN in either input is reported as a warning and otherwise propagates
/// into the returned maximum.
pub fn max_abs_difference(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(RegistrationError::ShapeMismatch {
            expected: vec![a.len()],
            actual: vec![b.len()],
        });
    }
    if a.iter().any(|v| v.is_nan()) {
        warn!("max_abs_difference: NaN in the first input");
    }
    if b.iter().any(|v| v.is_nan()) {
        warn!("max_abs_difference: NaN in the second input");
    }
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| 2.0 * (f64::from(*x) - f64::from(*y)).abs())
        .fold(0.0, |acc, d| if d > acc || d.is_nan() { d } else { acc }))
}

/// [`max_abs_difference`] over two vector fields on the same lattice.
pub fn max_field_difference<const D: usize>(a: &VectorField<D>, b: &VectorField<D>) -> Result<f64> {
    a.geometry().ensure_same_lattice(b.geometry())?;
    max_abs_difference(a.data().as_flattened(), b.data().as_flattened())
}

/// `|reference - other| / |reference|`, or the absolute difference when the
/// reference is zero.
pub fn relative_difference(reference: f64, other: f64) -> f64 {
    let diff = (reference - other).abs();
    if reference == 0.0 {
        diff
    } else {
        diff / reference.abs()
    }
}
