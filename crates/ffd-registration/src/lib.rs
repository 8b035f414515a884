//! Regularization engines of the free-form deformation reference path.
//!
//! Jacobian-determinant penalties and gradients, bending energy and folding
//! correction over cubic B-spline control-point grids.

pub mod error;
pub mod regularization;
pub mod validation;

pub use error::{RegistrationError, Result};
pub use regularization::{
    approx_bending_energy, approx_bending_energy_gradient, correct_folding, correct_folding_until_valid,
    jacobian_penalty, jacobian_penalty_gradient, JacobianMode, PenaltyTerm, Regularizer,
};
pub use validation::{max_abs_difference, max_field_difference, relative_difference};
