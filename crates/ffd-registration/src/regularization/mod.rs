//! Regularization of control-point grids.
//!
//! - Approximate bending energy and its gradient.
//! - Jacobian-determinant penalty, approximate and exact, and its gradient.
//! - Folding correction of negative-determinant sites.

pub mod bending_energy;
pub mod folding;
pub mod jacobian;
pub mod trait_;

pub use bending_energy::{approx_bending_energy, approx_bending_energy_gradient, BendingEnergyRegularizer};
pub use folding::{correct_folding, correct_folding_until_valid, FoldingReport, FOLDING_CORRECTION_STEP};
pub use jacobian::{
    jacobian_determinants, jacobian_matrices, jacobian_penalty, jacobian_penalty_gradient, JacobianMode,
    JacobianRegularizer, PenaltyTerm, FOLDED_SITE_PENALTY,
};
pub use trait_::Regularizer;
